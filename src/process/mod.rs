//! Process supervision: PID files, the in-memory registry and the lifecycle policy.
pub mod pid_file;
pub mod registry;
pub mod supervisor;

pub use registry::{ManagedProcess, ProcessRegistry, ProcessSummary, Tracking};
pub use supervisor::{
    ProcessStatus, ProcessSupervisor, StartOptions, StartOutcome, StopAllReport, StopOutcome,
    StopRequest, SupervisorTiming,
};
