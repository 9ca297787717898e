//! The control-plane policy document: the typed shape of the YAML file an
//! operator edits to steer a running session without restarting it.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::ControlConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    #[default]
    Sequential,
    Parallel,
    RoundRobin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RotationMode {
    #[default]
    None,
    TimeSliced,
    RoundRobin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RotationConfig {
    #[serde(default)]
    pub mode: RotationMode,
    /// Required and positive when `mode == time_sliced`.
    #[serde(default)]
    pub interval_secs: Option<u64>,
    #[serde(default)]
    pub order: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_summary_interval")]
    pub summary_interval: u32,
    #[serde(default)]
    pub summary_model: Option<String>,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_max_raw_turns")]
    pub max_raw_turns: u32,
}

fn default_summary_interval() -> u32 {
    10
}
fn default_retention_days() -> u32 {
    30
}
fn default_max_raw_turns() -> u32 {
    1000
}

impl Default for MemoryConfig {
    fn default() -> Self {
        MemoryConfig {
            enabled: false,
            summary_interval: default_summary_interval(),
            summary_model: None,
            retention_days: default_retention_days(),
            max_raw_turns: default_max_raw_turns(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ContextProcessingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub max_output_tokens: u32,
    #[serde(default)]
    pub budget_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Thresholds {
    #[serde(default)]
    pub max_requests_per_window: u32,
    #[serde(default)]
    pub max_cost_per_hour: f64,
    #[serde(default)]
    pub max_context_pct: u32,
    #[serde(default)]
    pub max_consecutive_errors: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ModelRule {
    pub when: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Models {
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub rules: Vec<ModelRule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendType {
    #[default]
    External,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BackendConfig {
    #[serde(rename = "type", default)]
    pub backend_type: BackendType,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub models: Models,
}

fn default_true() -> bool {
    true
}

impl BackendConfig {
    /// Render `options` as sorted `--key value` pairs, deterministic across
    /// runs regardless of map iteration order.
    pub fn option_args(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.options.len() * 2);
        for (key, value) in &self.options {
            out.push(format!("--{key}"));
            out.push(value.clone());
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleAction {
    Pause,
    Resume,
    SetMode { mode: String },
    SetBackend { name: String },
    RotateBackend,
    NextBackend,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ScheduleTrigger {
    #[serde(default)]
    pub at_iteration: Option<u64>,
    #[serde(default)]
    pub every_iterations: Option<u64>,
    #[serde(default)]
    pub on_error: Option<String>,
    #[serde(default)]
    pub when: Option<String>,
    #[serde(default)]
    pub cron: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRule {
    #[serde(default)]
    pub trigger: ScheduleTrigger,
    pub action: ScheduleAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Override {
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub active_backends: Vec<String>,
    #[serde(default)]
    pub next_action: Option<ScheduleAction>,
    #[serde(default)]
    pub per_backend_option_overrides: HashMap<String, BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ModelPrice {
    pub input_per_million: u64,
    pub output_per_million: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ControlConfig {
    #[serde(default)]
    pub backends: HashMap<String, BackendConfig>,
    #[serde(default)]
    pub mode: DispatchMode,
    #[serde(default)]
    pub rotation: RotationConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub context_processing: ContextProcessingConfig,
    #[serde(default)]
    pub schedule: Vec<ScheduleRule>,
    #[serde(rename = "override", default)]
    pub overrides: Override,
    #[serde(default)]
    pub cost_table: HashMap<String, ModelPrice>,
}

impl ControlConfig {
    /// Parse a YAML document. Empty bytes yield an empty, default config
    /// (not validated — callers must call [`ControlConfig::validate`]
    /// separately, matching the distinction between "is well-formed" and
    /// "is policy-valid").
    pub fn parse(bytes: &[u8]) -> Result<Self, ControlConfigError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(ControlConfig::default());
        }
        let cfg: ControlConfig = serde_yaml::from_slice(bytes)?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ControlConfigError> {
        if self.backends.is_empty() {
            return Err(ControlConfigError::Validation(
                "at least one backend must be configured".into(),
            ));
        }
        if self.rotation.mode == RotationMode::TimeSliced {
            match self.rotation.interval_secs {
                Some(secs) if secs > 0 => {}
                _ => {
                    return Err(ControlConfigError::Validation(
                        "rotation.interval_secs must be positive when mode is time_sliced".into(),
                    ))
                }
            }
        }
        for (name, backend) in &self.backends {
            if backend.thresholds.max_context_pct > 100 {
                return Err(ControlConfigError::Validation(format!(
                    "backend '{name}': max_context_pct must be within [0, 100]"
                )));
            }
            match backend.backend_type {
                BackendType::Internal => {
                    if backend.command.is_some() || !backend.args.is_empty() {
                        return Err(ControlConfigError::Validation(format!(
                            "backend '{name}': an internal backend must not set command or args"
                        )));
                    }
                }
                BackendType::External => {
                    if backend.command.is_none() {
                        return Err(ControlConfigError::Validation(format!(
                            "backend '{name}': a non-internal backend must set a command"
                        )));
                    }
                }
            }
            for rule in &backend.models.rules {
                if rule.when.trim().is_empty() || rule.model.trim().is_empty() {
                    return Err(ControlConfigError::Validation(format!(
                        "backend '{name}': model rules require a non-empty 'when' and 'model'"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_bytes_parse_to_default() {
        let cfg = ControlConfig::parse(b"").unwrap();
        assert_eq!(cfg, ControlConfig::default());
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let yaml = b"mode: sequential\nsome_future_field: true\nbackends:\n  claude:\n    command: claude\n";
        let cfg = ControlConfig::parse(yaml).unwrap();
        assert_eq!(cfg.mode, DispatchMode::Sequential);
        assert!(cfg.backends.contains_key("claude"));
    }

    #[test]
    fn requires_at_least_one_backend() {
        let cfg = ControlConfig::default();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn time_sliced_requires_positive_interval() {
        let mut cfg = ControlConfig::default();
        cfg.backends.insert(
            "claude".into(),
            BackendConfig {
                command: Some("claude".into()),
                ..Default::default()
            },
        );
        cfg.rotation.mode = RotationMode::TimeSliced;
        assert!(cfg.validate().is_err());
        cfg.rotation.interval_secs = Some(30);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn internal_backend_rejects_command() {
        let mut cfg = ControlConfig::default();
        cfg.backends.insert(
            "builtin".into(),
            BackendConfig {
                backend_type: BackendType::Internal,
                command: Some("nope".into()),
                ..Default::default()
            },
        );
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn external_backend_requires_command() {
        let mut cfg = ControlConfig::default();
        cfg.backends.insert("ext".into(), BackendConfig::default());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn option_args_are_sorted_for_determinism() {
        let mut backend = BackendConfig {
            command: Some("claude".into()),
            ..Default::default()
        };
        backend.options.insert("temperature".into(), "0.2".into());
        backend.options.insert("budget".into(), "10".into());
        assert_eq!(
            backend.option_args(),
            vec![
                "--budget".to_string(),
                "10".to_string(),
                "--temperature".to_string(),
                "0.2".to_string(),
            ]
        );
    }
}
