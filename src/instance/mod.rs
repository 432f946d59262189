//! Game server instances.
//!
//! - [`types`]: instance records, lifecycle states and creation specs
//! - [`resources`]: memory/CPU limit translation
//! - [`monitoring`]: per-instance monitoring settings
//! - [`filesystem`]: file operations on instance volumes
//! - [`manager`]: the lifecycle state machine

pub mod filesystem;
pub mod manager;
pub mod monitoring;
pub mod resources;
pub mod types;

pub use filesystem::{
    FileOperation, FileOutcome, FilesystemError, FilesystemMutator, HelperContainerMutator,
    InMemoryFilesystem,
};
pub use manager::{InstanceError, InstanceManager, ManagerConfig};
pub use monitoring::{ExpositionSettings, MonitoringConfig, RconSettings};
pub use resources::ResourceError;
pub use types::*;
