pub mod config;
pub mod control;
pub mod estimator;
pub mod ffmpeg;
pub mod ffprobe;
pub mod heartbeat;
pub mod recovery;
pub mod replace;
pub mod scan;
pub mod schedule;
pub mod sidecar;
pub mod state;
pub mod supervisor;

pub use config::{FolderConfig, WatchdogConfig};
pub use control::{ControlCommand, ControlHandle, WorkerSnapshot, WorkerStatus};
pub use estimator::{Estimate, Estimator, Verdict};
pub use heartbeat::Heartbeat;
pub use recovery::{recover, RecoveryReport};
pub use replace::ReplaceError;
pub use scan::{Candidate, ScanSummary};
pub use schedule::{FolderSchedule, FolderStatus};
pub use state::{Ledger, Stats, StateStore};
pub use supervisor::{CycleOutcome, Supervisor, TickReport};
