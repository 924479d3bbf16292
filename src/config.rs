use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::audio::spectrogram::SpectrogramParams;

pub const CONFIG_FILE: &str = "stemgenre.toml";

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub features: SpectrogramParams,
    #[serde(default)]
    pub separator: SeparatorConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize)]
pub struct SeparatorConfig {
    #[serde(default = "default_program")]
    pub program: String,
    /// `{input}` and `{output}` are substituted per request.
    #[serde(default = "default_args")]
    pub args: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model_path")]
    pub path: PathBuf,
    #[serde(default = "default_stats_dir")]
    pub stats_dir: PathBuf,
    #[serde(default = "default_threads")]
    pub threads: usize,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for SeparatorConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: default_model_path(),
            stats_dir: default_stats_dir(),
            threads: default_threads(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_program() -> String { "spleeter".into() }
fn default_args() -> Vec<String> {
    ["separate", "-p", "spleeter:4stems", "-o", "{output}", "{input}"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_model_path() -> PathBuf { PathBuf::from("models/genre_classifier.onnx") }
fn default_stats_dir() -> PathBuf { PathBuf::from("normalization-params") }
fn default_threads() -> usize { 1 }
fn default_host() -> String { "0.0.0.0".into() }
fn default_port() -> u16 { 5002 }
fn default_max_upload_bytes() -> usize { 10 * 1024 * 1024 }

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse config: {}", path.display()))
}

/// Explicit path first, then `./stemgenre.toml`, then the per-user config locations.
pub fn find_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let local = PathBuf::from(CONFIG_FILE);
    if local.exists() {
        return Some(local);
    }
    if let Some(home) = dirs::home_dir() {
        let xdg = home.join(".config").join("stemgenre").join("config.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }
    if let Some(config_dir) = dirs::config_dir() {
        let platform = config_dir.join("stemgenre").join("config.toml");
        if platform.exists() {
            return Some(platform);
        }
    }
    None
}

/// Loads the config the binary runs with.
///
/// An explicitly named file must load; its errors are returned. A discovered file that
/// fails to load is reported and replaced by defaults, and no file at all means defaults.
pub fn resolve_config(explicit: Option<&Path>) -> Result<Config> {
    if let Some(path) = explicit {
        let cfg = load_config(path)?;
        log::info!("Loaded config from {}", path.display());
        return Ok(cfg);
    }
    match find_config_path(None) {
        Some(path) => match load_config(&path) {
            Ok(cfg) => {
                log::info!("Loaded config from {}", path.display());
                Ok(cfg)
            }
            Err(err) => {
                log::warn!("{:#}; using defaults", err);
                Ok(Config::default())
            }
        },
        None => Ok(Config::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_training_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.features, SpectrogramParams::default());
        assert_eq!(cfg.features.feature_shape(), [128, 862, 1]);
        assert_eq!(cfg.features.n_fft, 2048);
        assert_eq!(cfg.features.hop_length, 512);
        assert_eq!(cfg.separator.program, "spleeter");
        assert_eq!(cfg.server.port, 5002);
        assert_eq!(cfg.server.max_upload_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [features]
            hop_length = 256

            [model]
            path = "/srv/model.onnx"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.features.hop_length, 256);
        assert_eq!(cfg.features.n_mels, 128);
        assert_eq!(cfg.model.path, PathBuf::from("/srv/model.onnx"));
        assert_eq!(cfg.model.stats_dir, PathBuf::from("normalization-params"));
    }

    #[test]
    fn load_config_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[features\nn_fft = ").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn malformed_explicit_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stemgenre.toml");
        std::fs::write(&path, "[features]\nn_fft = \"2048\"\n").unwrap();
        let err = resolve_config(Some(&path)).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config"));
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(resolve_config(Some(&dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn valid_explicit_config_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stemgenre.toml");
        std::fs::write(&path, "[features]\nn_mels = 64\n").unwrap();
        let cfg = resolve_config(Some(&path)).unwrap();
        assert_eq!(cfg.features.n_mels, 64);
    }

    #[test]
    fn explicit_path_wins() {
        let path = Path::new("/etc/custom.toml");
        assert_eq!(find_config_path(Some(path)), Some(path.to_path_buf()));
    }
}
