use std::env;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub worker: WorkerConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    pub fn from_env() -> Self {
        Self {
            scheduler: SchedulerConfig::from_env(),
            worker: WorkerConfig::from_env(),
        }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!(
            "  scheduler: cpu_slots={}, remote_io_slots={}, long_task_warn={}s",
            self.scheduler.cpu_slots,
            self.scheduler.remote_io_slots,
            self.scheduler.long_task_warn_seconds
        );
        tracing::info!("  worker:    threads={}", self.worker.threads);
    }
}

// ── Scheduler ─────────────────────────────────────────────────

/// Admission-scheduler limits. One slot count per resource class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Max tasks running local CPU work at once.
    #[serde(default = "default_cpu_slots")]
    pub cpu_slots: usize,
    /// Max tasks running remote I/O at once.
    #[serde(default = "default_remote_io_slots")]
    pub remote_io_slots: usize,
    /// Warn at task teardown when total execution exceeds this.
    #[serde(default = "default_long_task_warn")]
    pub long_task_warn_seconds: u64,
}

fn default_cpu_slots() -> usize { 8 }
fn default_remote_io_slots() -> usize { 8 }
fn default_long_task_warn() -> u64 { 60 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cpu_slots: default_cpu_slots(),
            remote_io_slots: default_remote_io_slots(),
            long_task_warn_seconds: default_long_task_warn(),
        }
    }
}

impl SchedulerConfig {
    fn from_env() -> Self {
        Self {
            cpu_slots: env_usize("QUARRY_CPU_SLOTS", default_cpu_slots()),
            remote_io_slots: env_usize("QUARRY_REMOTE_IO_SLOTS", default_remote_io_slots()),
            long_task_warn_seconds: env_u64(
                "QUARRY_LONG_TASK_WARN_SECONDS",
                default_long_task_warn(),
            ),
        }
    }

    pub fn long_task_warn(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.long_task_warn_seconds)
    }
}

// ── Worker ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of worker threads. 0 = num_cpus.
    #[serde(default)]
    pub threads: usize,
    /// Label reported in diagnostics.
    #[serde(default = "default_node_name")]
    pub node_name: String,
}

fn default_node_name() -> String { "quarry-node".to_string() }

impl WorkerConfig {
    fn from_env() -> Self {
        Self {
            threads: env_usize("QUARRY_WORKER_THREADS", 0),
            node_name: env_or("QUARRY_NODE_NAME", &default_node_name()),
        }
    }

    /// Resolve worker thread count (0 means use available parallelism).
    pub fn resolved_threads(&self) -> usize {
        if self.threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.threads
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_config_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.cpu_slots, 8);
        assert_eq!(config.remote_io_slots, 8);
        assert_eq!(config.long_task_warn_seconds, 60);
        assert_eq!(config.long_task_warn(), std::time::Duration::from_secs(60));
    }

    #[test]
    fn resolved_threads() {
        let mut config = WorkerConfig { threads: 0, node_name: default_node_name() };
        // 0 means auto-detect
        assert!(config.resolved_threads() > 0);

        config.threads = 6;
        assert_eq!(config.resolved_threads(), 6);
    }
}
