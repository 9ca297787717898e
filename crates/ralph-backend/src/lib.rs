//! The `Backend` capability trait, a concurrent registry of live backends,
//! rate-limit text/header parsing, argument-templating helpers for an
//! external-process contract, and two concrete backends used for testing
//! and demonstration.

mod error;
mod mock;
mod rate_limit;
mod registry;
mod scripted;
mod template;
mod trait_def;

pub use error::BackendError;
pub use mock::MockBackend;
pub use rate_limit::parse as parse_rate_limit;
pub use registry::BackendRegistry;
pub use scripted::ScriptedBackend;
pub use template::{build_args, substitute, TemplateVars};
pub use trait_def::Backend;
