//! Core library for the drover job execution tool.
//!
//! The crate describes a computational job once and runs it on any of
//! several execution targets (the local shell, a remote host over SSH, a
//! container, or a batch cluster) behind one uniform session contract,
//! then retrieves its results regardless of where it ran. The
//! [`orchestrator::Orchestrator`] drives each job through its
//! prepare, submit, follow, and fetch lifecycle.

pub mod config;
pub mod inventory;
pub mod orchestrator;
pub mod provenance;
pub mod resource;
pub mod session;
pub mod staging;
pub mod submission;
pub mod test_support;

pub use config::{ConfigError, DroverConfig};
pub use inventory::{Inventory, InventoryError, InventoryStore, TomlInventoryStore};
pub use orchestrator::{
    DEFAULT_ROOT_DIRECTORY, FetchReport, FollowOutcome, JobPhase, JobSpec, JobSpecBuilder,
    JobSpecError, Orchestrator, OrchestratorError,
};
pub use provenance::{JobRecord, PackageEntry, PackageListing};
pub use resource::{
    ConfigFragment, ConfigurationError, ContainerResource, DeleteRequest, ManagerError, Resource,
    ResourceConfig, ResourceError, ResourceManager, ResourceStatus, ShellResource, SshResource,
};
pub use session::{
    BatchItemOutput, CommandError, CommandOutput, CommandRunner, ContainerSession,
    ContainerSessionConfig, ExecOutput, ExecuteOptions, ProcessCommandRunner, Session,
    SessionError, ShellSession, SshSession, SshSessionConfig, TransferError,
};
pub use staging::{DataStaging, PairStaging, PlainStaging, StagingError};
pub use submission::{
    BatchConfig, BatchSubmission, JobStatus, LocalSubmission, PollError, SubmissionBackend,
    SubmissionError, SubmissionHandle, SubmitOptions,
};
