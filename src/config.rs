//! Configuration management for the surrogate PV server

use crate::formatter::Protocol;
use crate::server::ReactorSettings;
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub nats: NatsConfig,
    pub model: ModelConfig,
    #[serde(default)]
    pub server: ServerConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

/// NATS connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL
    pub url: String,
    /// Root subject for inbound input writes
    pub put_subject: String,
    /// Root subject for published PV updates
    pub pv_subject: String,
}

/// Surrogate model configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Path to the model metadata JSON
    pub artifact: PathBuf,
    /// JSON 2-D array used as the default image input
    #[serde(default)]
    pub stock_image: Option<PathBuf>,
    /// Number of threads for ONNX inference per session (default: 1)
    #[serde(default = "default_onnx_threads")]
    pub onnx_threads: usize,
    /// Physical default values in input order; empty means range midpoints
    #[serde(default)]
    pub default_inputs: Vec<f64>,
}

fn default_onnx_threads() -> usize {
    1
}

/// PV publication settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default = "default_precision")]
    pub precision: u32,
    #[serde(default)]
    pub color_mode: i64,
}

fn default_prefix() -> String {
    "smvm".to_string()
}

fn default_precision() -> u32 {
    8
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            protocol: Protocol::default(),
            precision: default_precision(),
            color_mode: 0,
        }
    }
}

impl ServerConfig {
    pub fn reactor_settings(&self) -> ReactorSettings {
        ReactorSettings {
            prefix: self.prefix.clone(),
            protocol: self.protocol,
            precision: self.precision,
            color_mode: self.color_mode,
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Number of inference worker threads
    pub workers: usize,
    /// Seconds between metrics summaries
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,
}

fn default_metrics_interval() -> u64 {
    30
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load configuration from a specific path, then apply `SURROGATE__*` overrides
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(Environment::with_prefix("SURROGATE").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            nats: NatsConfig {
                url: "nats://localhost:4222".to_string(),
                put_subject: "pv.put".to_string(),
                pv_subject: "pv.update".to_string(),
            },
            model: ModelConfig {
                artifact: PathBuf::from("models/model.json"),
                stock_image: None,
                onnx_threads: 1,
                default_inputs: Vec::new(),
            },
            server: ServerConfig::default(),
            pipeline: PipelineConfig {
                workers: 4,
                metrics_interval_secs: 30,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "json".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.nats.url, "nats://localhost:4222");
        assert_eq!(config.server.prefix, "smvm");
        assert_eq!(config.server.precision, 8);
        assert_eq!(config.server.protocol, Protocol::AttributedNd);
        assert_eq!(config.pipeline.workers, 4);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
[nats]
url = "nats://nats:4222"
put_subject = "pv.put"
pv_subject = "pv.update"

[model]
artifact = "models/both.json"
default_inputs = [0.348, 0.0403]

[server]
protocol = "ca"

[pipeline]
workers = 2

[logging]
level = "debug"
format = "pretty"
"#
        )
        .unwrap();

        let config = AppConfig::load_from_path(file.path()).unwrap();

        assert_eq!(config.nats.url, "nats://nats:4222");
        assert_eq!(config.model.artifact, PathBuf::from("models/both.json"));
        assert_eq!(config.model.default_inputs, vec![0.348, 0.0403]);
        assert_eq!(config.model.onnx_threads, 1);
        assert_eq!(config.server.protocol, Protocol::Flattened);
        assert_eq!(config.server.prefix, "smvm");
        assert_eq!(config.pipeline.metrics_interval_secs, 30);

        let settings = config.server.reactor_settings();
        assert_eq!(settings.pv_name("sigma_x"), "smvm:sigma_x");
    }

    #[test]
    fn test_environment_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
[nats]
url = "nats://localhost:4222"
put_subject = "pv.put"
pv_subject = "pv.update"

[model]
artifact = "models/model.json"

[server]
protocol = "pva"

[pipeline]
workers = 1

[logging]
level = "info"
format = "json"
"#
        )
        .unwrap();

        // test_load_from_file also resolves to Flattened, so parallel loads agree
        std::env::set_var("SURROGATE__SERVER__PROTOCOL", "ca");
        let config = AppConfig::load_from_path(file.path());
        std::env::remove_var("SURROGATE__SERVER__PROTOCOL");

        assert_eq!(config.unwrap().server.protocol, Protocol::Flattened);
    }
}
