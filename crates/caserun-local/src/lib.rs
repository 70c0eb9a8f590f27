pub mod args;
pub mod engine;
pub mod executor;
pub mod killer;
pub mod output;
pub mod script;
pub mod supervisor;
pub mod sweep;

pub use engine::{Engine, TaskStatusView};
pub use executor::{TaskExecutor, TaskSummary};
pub use killer::{default_killer, KillMode, ProcessInfo, ProcessTreeKiller};
pub use supervisor::{Completion, LaunchError, ProcessHandle, ProcessSupervisor};
pub use sweep::ProcessSweeper;
