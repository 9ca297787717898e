//! The control-plane: a typed, validated policy document plus a watcher
//! that hot-reloads it and fans changes out to subscribers.

mod config;
mod error;
mod watcher;

pub use config::{
    BackendConfig, BackendType, ControlConfig, DispatchMode, MemoryConfig, ModelPrice, ModelRule,
    Models, Override, RotationConfig, RotationMode, ScheduleAction, ScheduleRule,
    ScheduleTrigger, Thresholds, ContextProcessingConfig,
};
pub use error::ControlConfigError;
pub use watcher::ControlWatcher;
