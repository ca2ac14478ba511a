pub mod export;
pub mod platforms;
pub mod runs;
pub mod settings;

pub use export::cmd_export;
pub use platforms::cmd_platforms;
pub use runs::{handle_runs_command, RunsCommand};
pub use settings::{handle_config_command, ConfigCommand};
