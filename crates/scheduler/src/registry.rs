//! Node-wide view over every scheduler, for monitoring endpoints asking
//! "is this node overloaded, and on what queries".

use std::sync::Arc;

use quarry_core::SchedulerConfig;

use crate::scheduler::Scheduler;
use crate::snapshot::TaskSnapshot;
use crate::types::ResourceClass;

/// One [`Scheduler`] per resource class, built from config at startup and
/// shared by all worker threads.
pub struct SchedulerRegistry {
    cpu: Arc<Scheduler>,
    remote_io: Arc<Scheduler>,
}

impl SchedulerRegistry {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            cpu: Arc::new(Scheduler::new(ResourceClass::Cpu, config.cpu_slots)),
            remote_io: Arc::new(Scheduler::new(ResourceClass::RemoteIo, config.remote_io_slots)),
        }
    }

    pub fn get(&self, class: ResourceClass) -> &Arc<Scheduler> {
        match class {
            ResourceClass::Cpu => &self.cpu,
            ResourceClass::RemoteIo => &self.remote_io,
        }
    }

    pub fn schedulers(&self) -> impl Iterator<Item = &Arc<Scheduler>> {
        ResourceClass::ALL.iter().map(|class| self.get(*class))
    }

    /// Snapshots of every running and waiting task across all classes.
    ///
    /// Task lists are cloned under each scheduler's lock, then snapshotted
    /// with no scheduler lock held; stack capture is best-effort per task.
    pub fn snapshot_all(&self, capture_stack: bool) -> Vec<TaskSnapshot> {
        let mut tasks = Vec::new();
        for scheduler in self.schedulers() {
            tasks.extend(scheduler.running_tasks());
            tasks.extend(scheduler.waiting_tasks());
        }
        tasks.iter().map(|task| task.snapshot(capture_stack)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Task, TaskMeta};

    #[test]
    fn registry_builds_from_config() {
        let config = SchedulerConfig { cpu_slots: 3, remote_io_slots: 5, ..Default::default() };
        let registry = SchedulerRegistry::new(&config);
        assert_eq!(registry.get(ResourceClass::Cpu).slots(), 3);
        assert_eq!(registry.get(ResourceClass::RemoteIo).slots(), 5);
        assert_eq!(registry.schedulers().count(), 2);
    }

    #[test]
    fn snapshot_all_covers_running_and_waiting() {
        let registry = SchedulerRegistry::new(&SchedulerConfig {
            cpu_slots: 1,
            ..Default::default()
        });
        let cpu = Arc::clone(registry.get(ResourceClass::Cpu));

        let running = Task::create("running", "test", None, None, TaskMeta::default());
        cpu.schedule(&running).unwrap();

        let queued = Task::create("queued", "test", None, None, TaskMeta::default());
        let waiter = {
            let cpu = Arc::clone(&cpu);
            let queued = Arc::clone(&queued);
            std::thread::spawn(move || cpu.schedule(&queued))
        };
        while cpu.waiting_len() == 0 {
            std::thread::yield_now();
        }

        let snaps = registry.snapshot_all(false);
        assert_eq!(snaps.len(), 2);
        assert_eq!(snaps.iter().filter(|s| s.is_running()).count(), 1);

        cpu.finish(&running);
        waiter.join().unwrap().unwrap();
        cpu.finish(&queued);
    }
}
