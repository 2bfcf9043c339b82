use serde::{Deserialize, Serialize};

/// Process-wide unique task identifier.
pub type TaskId = u64;

/// Independently limited admission pools. A task may pass through several
/// classes over its lifetime (a CPU phase, then a remote-fetch phase), and
/// wait/execution time is attributed separately per class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceClass {
    /// Local query execution on a worker thread.
    Cpu,
    /// Waiting on remote shard/file fetches.
    RemoteIo,
}

impl ResourceClass {
    pub const ALL: [ResourceClass; 2] = [ResourceClass::Cpu, ResourceClass::RemoteIo];

    pub fn name(&self) -> &'static str {
        match self {
            ResourceClass::Cpu => "cpu",
            ResourceClass::RemoteIo => "remote_io",
        }
    }
}

impl std::fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
