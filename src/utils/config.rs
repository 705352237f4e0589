// src/utils/config.rs
//! Configuration loading
//!
//! Layers, lowest to highest precedence:
//!
//! 1. Built-in defaults
//! 2. Optional config file (TOML/YAML/JSON, picked by extension), from an
//!    explicit path or `FOLIO_TELEMETRY_CONFIG`
//! 3. Environment variables, e.g. `FOLIO_TELEMETRY__PIPELINE__BUFFER_SIZE=100`

use crate::capture::event::{EventKind, Severity};
use crate::capture::redact::DEFAULT_SENSITIVE_PATTERNS;
use crate::recording::exporter::ExportFormat;
use crate::recording::pipeline::PipelineConfig;
use crate::sink::SinkConfig;
use crate::utils::errors::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "FOLIO_TELEMETRY_CONFIG";

const ENV_PREFIX: &str = "FOLIO_TELEMETRY";

/// Keys whose environment values are comma-separated lists
const ENV_LIST_KEYS: [&str; 4] = [
    "filter.enabled_kinds",
    "filter.excluded_selectors",
    "filter.excluded_actions",
    "filter.sensitive_field_patterns",
];

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub pipeline: PipelineConfig,
    pub filter: FilterConfig,
    pub sink: SinkConfig,
    pub logging: LoggingConfig,
    pub export: Option<ExportConfig>,
}

impl TelemetryConfig {
    /// Load from `FOLIO_TELEMETRY_CONFIG` (if set) and the environment
    pub fn load() -> Result<Self> {
        let path = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
        Self::load_from(path.as_deref())
    }

    /// Load from an optional file plus the environment
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        Self::load_layers(path, environment())
    }

    fn load_layers(path: Option<&Path>, env: Environment) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            debug!("Loading configuration from {:?}", path);
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(env);

        let config: TelemetryConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.pipeline.validate()?;
        crate::capture::filter::FilterRule::from_config(&self.filter)?;
        Ok(())
    }
}

/// `FOLIO_TELEMETRY__<SECTION>__<KEY>` variables
fn environment() -> Environment {
    ENV_LIST_KEYS.iter().fold(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .list_separator(",")
            .try_parsing(true),
        |env, key| env.with_list_parse_key(key),
    )
}

/// Sampling, exclusion and redaction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Kinds to capture; `None` captures every kind
    pub enabled_kinds: Option<BTreeSet<EventKind>>,

    /// Fraction of occurrences kept, within [0, 1]
    pub sample_rate: f64,

    /// Targets containing any of these are dropped
    pub excluded_selectors: Vec<String>,

    /// Activity actions containing any of these (case-insensitive) are dropped
    pub excluded_actions: Vec<String>,

    /// Case-insensitive regexes over payload field names
    pub sensitive_field_patterns: Vec<String>,

    /// Activities below this severity are dropped
    pub min_severity: Severity,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enabled_kinds: None,
            sample_rate: 1.0,
            excluded_selectors: Vec::new(),
            excluded_actions: Vec::new(),
            sensitive_field_patterns: DEFAULT_SENSITIVE_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            min_severity: Severity::Low,
        }
    }
}

/// Log output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// History export written when the binary shuts down
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    pub format: ExportFormat,
    pub path: PathBuf,
}
