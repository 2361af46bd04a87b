use facefind_core::matcher::{DEFAULT_MIN_CONFIDENCE, DEFAULT_TOLERANCE};
use facefind_core::{Metric, ToleranceMatcher};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Service configuration.
///
/// Resolved from built-in defaults, then an optional TOML file named by
/// `FACEFIND_CONFIG`, then `FACEFIND_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory where enrolled face images are saved. Also scanned at
    /// startup to fill the bootstrap cache.
    pub image_dir: PathBuf,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Maximum embedding distance for a match.
    pub tolerance: f32,
    /// Minimum rounded confidence for a match to be reported.
    pub min_confidence: f32,
    /// HTTP listen address.
    pub bind_addr: String,
    /// Upper bound on a request body, in bytes.
    pub max_upload_bytes: usize,
    /// Whether to build the bootstrap cache at startup.
    pub bootstrap: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    db_path: Option<PathBuf>,
    image_dir: Option<PathBuf>,
    model_dir: Option<PathBuf>,
    tolerance: Option<f32>,
    min_confidence: Option<f32>,
    bind_addr: Option<String>,
    max_upload_bytes: Option<usize>,
    bootstrap: Option<bool>,
}

impl FileConfig {
    fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl Config {
    /// Defaults with every path rooted under `data_dir`.
    pub fn with_data_dir(data_dir: &Path) -> Self {
        Self {
            db_path: data_dir.join("missing_persons.db"),
            image_dir: data_dir.join("known_people"),
            model_dir: data_dir.join("models"),
            tolerance: DEFAULT_TOLERANCE,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            bootstrap: true,
        }
    }

    /// Load configuration from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let env = |key: &str| std::env::var(key).ok();
        let file = match env("FACEFIND_CONFIG") {
            Some(path) => FileConfig::read(Path::new(&path))?,
            None => FileConfig::default(),
        };
        Ok(Self::resolve(file, env))
    }

    fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = env("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facefind");
        let defaults = Self::with_data_dir(&data_dir);

        Self {
            db_path: env("FACEFIND_DB_PATH")
                .map(PathBuf::from)
                .or(file.db_path)
                .unwrap_or(defaults.db_path),
            image_dir: env("FACEFIND_IMAGE_DIR")
                .map(PathBuf::from)
                .or(file.image_dir)
                .unwrap_or(defaults.image_dir),
            model_dir: env("FACEFIND_MODEL_DIR")
                .map(PathBuf::from)
                .or(file.model_dir)
                .unwrap_or(defaults.model_dir),
            tolerance: parsed(&env, "FACEFIND_TOLERANCE")
                .or(file.tolerance)
                .unwrap_or(defaults.tolerance),
            min_confidence: parsed(&env, "FACEFIND_MIN_CONFIDENCE")
                .or(file.min_confidence)
                .unwrap_or(defaults.min_confidence),
            bind_addr: env("FACEFIND_BIND_ADDR")
                .or(file.bind_addr)
                .unwrap_or(defaults.bind_addr),
            max_upload_bytes: parsed(&env, "FACEFIND_MAX_UPLOAD_BYTES")
                .or(file.max_upload_bytes)
                .unwrap_or(defaults.max_upload_bytes),
            bootstrap: env("FACEFIND_BOOTSTRAP")
                .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
                .or(file.bootstrap)
                .unwrap_or(defaults.bootstrap),
        }
    }

    /// Matcher using the configured thresholds and the provider's metric.
    pub fn matcher(&self, metric: Metric) -> ToleranceMatcher {
        ToleranceMatcher::new(self.tolerance, self.min_confidence, metric)
    }
}

fn parsed<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    env(key).and_then(|v| v.parse().ok())
}
