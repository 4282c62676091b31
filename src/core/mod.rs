pub mod allocator;
pub mod matcher;
pub mod parser;
pub mod provisioner;
pub mod readiness;
pub mod resolver;
pub mod snapshot;
pub mod target_resolver;

pub use crate::domain::model::{AssignmentRecord, ProxyDescriptor, TargetSpec};
pub use crate::domain::ports::{ConfigStore, ProcessSupervisor, ProviderCatalog};
pub use crate::utils::error::Result;
pub use resolver::{ProxyResolver, ResolutionAction, ResolveOutcome};
