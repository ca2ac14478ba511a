#![allow(
    clippy::needless_borrows_for_generic_args,
    clippy::manual_range_contains,
    clippy::derivable_impls,
    clippy::type_complexity,
    clippy::len_zero,
    dead_code,
    unused_imports,
    unused_variables,
    unused_mut
)]

pub mod artifact;
pub mod bridge;
pub mod catalog;
pub mod config;
pub mod db;
pub mod driver;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod repo;
pub mod session;
pub mod store;
pub mod view;

pub use artifact::{Artifact, ArtifactWriter};
pub use bridge::{
    Command, CommandSender, DisplayEndpoint, Event, EventEmitter, ExecutionEndpoint, SyncBridge,
};
pub use catalog::{PlatformCatalog, PlatformSpec, StepTemplate, SubRunSpec, TaskTemplate};
pub use config::{
    ensure_data_dir, get_data_dir, BridgeConfig, CatalogConfig, ConfigLoadError, DatabaseConfig,
    LoggingConfig, OrchestratorConfig, SessionsConfig, StoreConfig, SurferConfig,
};
pub use db::{init_database, init_memory_database, Database};
pub use driver::{
    DriverError, DriverRegistry, ExtractionDriver, PageSnapshotDriver, StepContext, StepReport,
    StepTarget,
};
pub use error::{CliErrorDisplay, EntityKind, SurferError, SurferResult};
pub use models::{make_run_id, Run, RunStatus, SessionInfo, Step, Task, WorkStatus};
pub use orchestrator::{Orchestrator, Pacer, StopProbe, StopSignal};
pub use repo::{MemoryRunRepository, RunRecordRepository, SqliteRunRepository};
pub use session::{
    normalize_user_agent, BrowserBackend, BrowserPage, HttpBackend, NavigationEvent, PageHygiene,
    SessionHandle, SessionMultiplexer,
};
pub use store::{RunPatch, RunStore, Transition, TransitionOutcome, WorkPatch};
pub use view::{format_elapsed, Notice, RunView};
