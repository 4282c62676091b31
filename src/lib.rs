pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;
pub use config::AppConfig;

pub use adapters::store::{FileConfigStore, MemoryConfigStore};
pub use adapters::supervisor::{DryRunSupervisor, ShellSupervisor};
pub use core::resolver::{ProxyResolver, ResolutionAction, ResolveOutcome};
pub use utils::error::{ProxyError, Result};
