use anyhow::{Context, Result};
use facematch_core::{
    BandsError, ConfidenceBands, EuclideanMatcher, DEFAULT_DESCRIPTOR_LEN,
    DEFAULT_EXCELLENT_BELOW, DEFAULT_GOOD_BELOW, DEFAULT_MATCH_THRESHOLD,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// CLI configuration: defaults, then the optional TOML file, then `FACEMATCH_*`
/// environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Maximum Euclidean distance reported as a match.
    pub match_threshold: f32,
    /// Distances below this are Excellent.
    pub excellent_below: f32,
    /// Distances below this (and not Excellent) are Good.
    pub good_below: f32,
    /// Length of descriptors produced by the embedding model.
    pub descriptor_len: usize,
    /// Number of entries shown by `list` and `stats`.
    pub recent_limit: usize,
    /// Where `backup` writes export files.
    pub backup_dir: PathBuf,
}

/// On-disk overrides. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    db_path: Option<PathBuf>,
    match_threshold: Option<f32>,
    excellent_below: Option<f32>,
    good_below: Option<f32>,
    descriptor_len: Option<usize>,
    recent_limit: Option<usize>,
    backup_dir: Option<PathBuf>,
}

impl Config {
    /// Load from `FACEMATCH_CONFIG` (or the XDG default) and the environment.
    pub fn load() -> Result<Self> {
        let env = |key: &str| std::env::var(key).ok();
        let path = env("FACEMATCH_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(default_config_path);
        let file = read_file_config(&path)?;
        Ok(Self::resolve(file, env))
    }

    fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let db_path = env("FACEMATCH_DB_PATH")
            .map(PathBuf::from)
            .or(file.db_path)
            .unwrap_or_else(|| data_dir(&env).join("faces.db"));
        let backup_dir = env("FACEMATCH_BACKUP_DIR")
            .map(PathBuf::from)
            .or(file.backup_dir)
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            db_path,
            match_threshold: parsed(&env, "FACEMATCH_MATCH_THRESHOLD")
                .or(file.match_threshold)
                .unwrap_or(DEFAULT_MATCH_THRESHOLD),
            excellent_below: parsed(&env, "FACEMATCH_EXCELLENT_BELOW")
                .or(file.excellent_below)
                .unwrap_or(DEFAULT_EXCELLENT_BELOW),
            good_below: parsed(&env, "FACEMATCH_GOOD_BELOW")
                .or(file.good_below)
                .unwrap_or(DEFAULT_GOOD_BELOW),
            descriptor_len: parsed(&env, "FACEMATCH_DESCRIPTOR_LEN")
                .or(file.descriptor_len)
                .unwrap_or(DEFAULT_DESCRIPTOR_LEN),
            recent_limit: parsed(&env, "FACEMATCH_RECENT_LIMIT")
                .or(file.recent_limit)
                .unwrap_or(5),
            backup_dir,
        }
    }

    pub fn bands(&self) -> Result<ConfidenceBands, BandsError> {
        ConfidenceBands::new(self.excellent_below, self.good_below)
    }

    pub fn matcher(&self) -> EuclideanMatcher {
        EuclideanMatcher::new(self.match_threshold, self.descriptor_len)
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig> {
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

fn parsed<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable setting");
            None
        }
    }
}

fn home_subdir(var: Option<String>, fallback: &str) -> PathBuf {
    var.map(PathBuf::from).unwrap_or_else(|| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(home).join(fallback)
    })
}

fn data_dir(env: &impl Fn(&str) -> Option<String>) -> PathBuf {
    home_subdir(env("XDG_DATA_HOME"), ".local/share").join("facematch")
}

fn default_config_path() -> PathBuf {
    home_subdir(std::env::var("XDG_CONFIG_HOME").ok(), ".config")
        .join("facematch")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::resolve(FileConfig::default(), env_of(&[("XDG_DATA_HOME", "/data")]));
        assert_eq!(config.db_path, PathBuf::from("/data/facematch/faces.db"));
        assert_eq!(config.match_threshold, 0.7);
        assert_eq!(config.excellent_below, 0.3);
        assert_eq!(config.good_below, 0.6);
        assert_eq!(config.descriptor_len, 128);
        assert_eq!(config.recent_limit, 5);
        assert!(config.bands().is_ok());
    }

    #[test]
    fn test_env_overrides_file() {
        let file: FileConfig = toml::from_str(
            r#"
            db_path = "/file/faces.db"
            match_threshold = 0.5
            good_below = 0.45
            "#,
        )
        .unwrap();
        let config = Config::resolve(
            file,
            env_of(&[
                ("FACEMATCH_MATCH_THRESHOLD", "0.65"),
                ("FACEMATCH_DESCRIPTOR_LEN", "512"),
            ]),
        );

        assert_eq!(config.db_path, PathBuf::from("/file/faces.db"));
        assert_eq!(config.match_threshold, 0.65);
        assert_eq!(config.good_below, 0.45);
        assert_eq!(config.descriptor_len, 512);
        assert_eq!(config.matcher().descriptor_len, 512);
    }

    #[test]
    fn test_unparseable_env_falls_back() {
        let config = Config::resolve(
            FileConfig::default(),
            env_of(&[("FACEMATCH_MATCH_THRESHOLD", "close"), ("XDG_DATA_HOME", "/d")]),
        );
        assert_eq!(config.match_threshold, 0.7);
    }

    #[test]
    fn test_unknown_file_key_is_rejected() {
        assert!(toml::from_str::<FileConfig>("threshold = 0.6").is_err());
    }

    #[test]
    fn test_missing_file_is_default() {
        let file = read_file_config(Path::new("/nonexistent/facematch.toml")).unwrap();
        assert!(file.db_path.is_none());
    }

    #[test]
    fn test_inverted_bands_rejected() {
        let config = Config::resolve(
            FileConfig::default(),
            env_of(&[
                ("FACEMATCH_EXCELLENT_BELOW", "0.6"),
                ("FACEMATCH_GOOD_BELOW", "0.3"),
                ("XDG_DATA_HOME", "/d"),
            ]),
        );
        assert!(config.bands().is_err());
    }
}
