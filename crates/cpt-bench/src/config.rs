use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::Level;

const DEFAULT_BELIEF_CACHE_CAPACITY: usize = 256;
const RUN_ID_ALLOWED: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789._-";

/// Root evaluation configuration loaded from YAML.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct EvaluationConfig {
    pub run_id: String,
    pub instance: InstanceConfig,
    pub simulation: SimulationConfig,
    pub oracle: OracleConfig,
    pub outputs: OutputsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Directory relative instance paths are resolved against.
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl EvaluationConfig {
    /// Load configuration from a YAML file on disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let path_buf = path.to_path_buf();
        let file = File::open(path).map_err(|source| ConfigError::Read {
            source,
            path: path_buf.clone(),
        })?;
        let reader = BufReader::new(file);
        let mut cfg: EvaluationConfig =
            serde_yaml::from_reader(reader).map_err(|source| ConfigError::Parse {
                source,
                path: path_buf.clone(),
            })?;
        cfg.base_dir = path.parent().map(Path::to_path_buf);
        cfg.validate().map_err(|source| ConfigError::Invalid {
            path: path_buf,
            source,
        })?;
        Ok(cfg)
    }

    /// Validate the configuration without performing I/O.
    pub fn validate(&mut self) -> Result<(), ValidationError> {
        validate_run_id(&self.run_id)?;
        self.instance.validate()?;
        self.simulation.validate()?;
        self.outputs.validate(&self.run_id)?;
        self.logging.normalize();
        self.oracle.normalize();
        Ok(())
    }

    /// Resolve output templates (e.g., `{run_id}` placeholders) into concrete paths.
    pub fn resolved_outputs(&self) -> ResolvedOutputs {
        ResolvedOutputs {
            jsonl: resolve_template(&self.run_id, &self.outputs.jsonl),
            summary_md: resolve_template(&self.run_id, &self.outputs.summary_md),
            plots_dir: resolve_template(&self.run_id, &self.outputs.plots_dir),
        }
    }

    pub fn instance_path(&self) -> PathBuf {
        match self.base_dir.as_ref() {
            Some(base) if self.instance.path.is_relative() => base.join(&self.instance.path),
            _ => self.instance.path.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct InstanceConfig {
    pub path: PathBuf,
}

impl InstanceConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.path.as_os_str().is_empty() {
            return Err(ValidationError::InvalidField {
                field: "instance.path".to_string(),
                message: "instance path must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Monte-Carlo sampling configuration block.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SimulationConfig {
    pub runs: usize,
    pub seed: Option<u64>,
    #[serde(default = "default_belief_cache_capacity")]
    pub belief_cache_capacity: usize,
}

impl SimulationConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.runs == 0 {
            return Err(ValidationError::InvalidField {
                field: "simulation.runs".to_string(),
                message: "number of runs must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

fn default_belief_cache_capacity() -> usize {
    DEFAULT_BELIEF_CACHE_CAPACITY
}

/// Policy oracle consulted during simulation.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct OracleConfig {
    pub kind: OracleKind,
    #[serde(default)]
    pub params: serde_yaml::Value,
}

impl OracleConfig {
    fn normalize(&mut self) {
        if self.params.is_null() {
            self.params = serde_yaml::Value::Mapping(Default::default());
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OracleKind {
    Deterministic,
    Stochastic,
    Uniform,
    PolicyGraph,
    External,
}

/// Output artifact configuration.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct OutputsConfig {
    pub jsonl: String,
    pub summary_md: String,
    pub plots_dir: String,
}

impl OutputsConfig {
    fn validate(&self, run_id: &str) -> Result<(), ValidationError> {
        for (label, value) in [
            ("outputs.jsonl", &self.jsonl),
            ("outputs.summary_md", &self.summary_md),
            ("outputs.plots_dir", &self.plots_dir),
        ] {
            if value.trim().is_empty() {
                return Err(ValidationError::InvalidField {
                    field: label.to_string(),
                    message: "path must not be empty".to_string(),
                });
            }

            let resolved = resolve_template(run_id, value);
            if resolved.components().count() == 0 {
                return Err(ValidationError::InvalidField {
                    field: label.to_string(),
                    message: "resolved path is invalid".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Logging configuration defaults to disabled structured logs.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default)]
    pub enable_structured: bool,
    #[serde(default = "default_tracing_level")]
    pub tracing_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enable_structured: false,
            tracing_level: default_tracing_level(),
        }
    }
}

impl LoggingConfig {
    fn normalize(&mut self) {
        if self.tracing_level.trim().is_empty() {
            self.tracing_level = default_tracing_level();
        }
    }

    pub fn level(&self) -> Option<Level> {
        match self.tracing_level.to_ascii_lowercase().as_str() {
            "trace" => Some(Level::TRACE),
            "debug" => Some(Level::DEBUG),
            "info" => Some(Level::INFO),
            "warn" | "warning" => Some(Level::WARN),
            "error" => Some(Level::ERROR),
            _ => None,
        }
    }
}

fn default_tracing_level() -> String {
    "info".to_string()
}

fn validate_run_id(run_id: &str) -> Result<(), ValidationError> {
    if run_id.trim().is_empty() {
        return Err(ValidationError::InvalidField {
            field: "run_id".to_string(),
            message: "run_id must not be empty".to_string(),
        });
    }

    if !run_id.chars().all(|c| RUN_ID_ALLOWED.contains(c)) {
        return Err(ValidationError::InvalidField {
            field: "run_id".to_string(),
            message: "run_id may only contain alphanumeric characters, '.', '_' or '-'".to_string(),
        });
    }

    Ok(())
}

fn resolve_template(run_id: &str, template: &str) -> PathBuf {
    let replaced = template.replace("{run_id}", run_id);
    PathBuf::from(replaced)
}

/// Fully resolved output paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOutputs {
    pub jsonl: PathBuf,
    pub summary_md: PathBuf,
    pub plots_dir: PathBuf,
}

/// Errors surfaced when loading configuration files.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("failed to parse config {path:?}: {source}")]
    Parse {
        #[source]
        source: serde_yaml::Error,
        path: PathBuf,
    },
    #[error("invalid configuration in {path:?}: {source}")]
    Invalid {
        path: PathBuf,
        source: ValidationError,
    },
}

impl ConfigError {
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. }
            | ConfigError::Parse { path, .. }
            | ConfigError::Invalid { path, .. } => path.as_path(),
        }
    }
}

/// Validation failures captured with contextual metadata.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{field}: {message}")]
    InvalidField { field: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASIC_YAML: &str = r#"
run_id: "toy_cmdp"
instance:
  path: "instances/toy_cmdp.yaml"
simulation:
  runs: 5000
  seed: 42
oracle:
  kind: "deterministic"
  params:
    action: 1
outputs:
  jsonl: "bench/out/{run_id}/runs.jsonl"
  summary_md: "bench/out/{run_id}/summary.md"
  plots_dir: "bench/out/{run_id}/plots"
logging:
  enable_structured: true
  tracing_level: "debug"
"#;

    #[test]
    fn loads_and_validates_basic_config() {
        let mut cfg: EvaluationConfig = serde_yaml::from_str(BASIC_YAML).expect("parse yaml");
        cfg.validate().expect("validate");

        assert_eq!(cfg.simulation.belief_cache_capacity, DEFAULT_BELIEF_CACHE_CAPACITY);
        assert_eq!(cfg.oracle.kind, OracleKind::Deterministic);
        assert_eq!(cfg.logging.level(), Some(Level::DEBUG));

        let outputs = cfg.resolved_outputs();
        assert_eq!(
            outputs.jsonl,
            PathBuf::from("bench/out/toy_cmdp/runs.jsonl")
        );
    }

    #[test]
    fn rejects_zero_runs() {
        let yaml = BASIC_YAML.replace("runs: 5000", "runs: 0");
        let mut cfg: EvaluationConfig = serde_yaml::from_str(&yaml).expect("parse");
        let err = cfg.validate().expect_err("should fail");
        assert!(matches!(
            err,
            ValidationError::InvalidField { field, .. } if field == "simulation.runs"
        ));
    }

    #[test]
    fn rejects_invalid_run_id() {
        let yaml = BASIC_YAML.replace("run_id: \"toy_cmdp\"", "run_id: \"toy cmdp\"");
        let mut cfg: EvaluationConfig = serde_yaml::from_str(&yaml).expect("parse");
        let err = cfg.validate().expect_err("invalid run id");
        assert!(matches!(
            err,
            ValidationError::InvalidField { field, .. } if field == "run_id"
        ));
    }

    #[test]
    fn rejects_unknown_oracle_kind() {
        let yaml = BASIC_YAML.replace("kind: \"deterministic\"", "kind: \"oracle_of_delphi\"");
        assert!(serde_yaml::from_str::<EvaluationConfig>(&yaml).is_err());
    }

    #[test]
    fn missing_params_become_empty_mapping() {
        let yaml = BASIC_YAML.replace("  params:\n    action: 1\n", "");
        let mut cfg: EvaluationConfig = serde_yaml::from_str(&yaml).expect("parse");
        cfg.validate().expect("valid");
        assert!(cfg.oracle.params.is_mapping());
    }

    #[test]
    fn relative_instance_paths_follow_config_directory() {
        let mut cfg: EvaluationConfig = serde_yaml::from_str(BASIC_YAML).expect("parse");
        assert_eq!(cfg.instance_path(), PathBuf::from("instances/toy_cmdp.yaml"));
        cfg.base_dir = Some(PathBuf::from("bench"));
        assert_eq!(
            cfg.instance_path(),
            PathBuf::from("bench/instances/toy_cmdp.yaml")
        );
    }

    #[test]
    fn config_file_errors_carry_the_path() {
        let err = EvaluationConfig::from_path("does/not/exist.yaml").expect_err("missing file");
        assert!(matches!(err, ConfigError::Read { .. }));
        assert_eq!(err.path(), Path::new("does/not/exist.yaml"));
    }
}
