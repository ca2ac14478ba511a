mod run;
mod session;

pub use run::{make_run_id, Run, RunStatus, Step, Task, WorkStatus};
pub use session::SessionInfo;
