use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub const WATCH_DIR_NAME: &str = "IMAGES_TO_UPLOAD";

fn default_upload_url() -> Url {
    "https://sudea-servidor.onrender.com/upload".parse().unwrap()
}

fn default_form_field() -> String {
    "file".to_string()
}

fn default_settle_delay_ms() -> u64 {
    1000
}

fn default_open_attempts() -> u32 {
    5
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_extensions() -> Vec<String> {
    vec!["png".to_string(), "jpg".to_string(), "jpeg".to_string()]
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("failed to parse config file {0}: {1}")]
    Parse(PathBuf, serde_yaml::Error),
    #[error("cannot resolve watch directory: {0}")]
    WatchDir(std::io::Error),
    #[error("open_attempts must be at least 1")]
    NoAttempts,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    pub prometheus_bind: Option<SocketAddr>,
    // defaults to IMAGES_TO_UPLOAD next to the executable
    pub watch_dir: Option<PathBuf>,
    #[serde(default = "default_upload_url")]
    pub upload_url: Url,
    #[serde(default = "default_form_field")]
    pub form_field: String,
    pub api_token: Option<String>,
    // crude debounce before the first read, the writer may still hold the file
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_open_attempts")]
    pub open_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            prometheus_bind: None,
            watch_dir: None,
            upload_url: default_upload_url(),
            form_field: default_form_field(),
            api_token: None,
            settle_delay_ms: default_settle_delay_ms(),
            open_attempts: default_open_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            extensions: default_extensions(),
        }
    }
}

impl Config {
    /// Loads the YAML config at `path`. A missing file yields the built-in defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Read(path.to_path_buf(), e)),
        };
        Self::parse(&raw).map_err(|e| match e {
            ConfigError::Parse(_, e) => ConfigError::Parse(path.to_path_buf(), e),
            e => e,
        })
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let config: Config =
            serde_yaml::from_str(raw).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        if config.open_attempts == 0 {
            return Err(ConfigError::NoAttempts);
        }
        Ok(config)
    }

    pub fn resolve_watch_dir(&self) -> Result<PathBuf, ConfigError> {
        if let Some(dir) = &self.watch_dir {
            return Ok(dir.clone());
        }
        let exe = std::env::current_exe().map_err(ConfigError::WatchDir)?;
        let parent = exe.parent().unwrap_or_else(|| Path::new("."));
        Ok(parent.join(WATCH_DIR_NAME))
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Config path selection: explicit flag, then `SUDEA_CONFIG`, then `./uploader.yaml`.
pub fn config_path(flag: Option<&Path>) -> PathBuf {
    if let Some(path) = flag {
        return path.to_path_buf();
    }
    let var = std::env::var("SUDEA_CONFIG").unwrap_or_default();
    if var.is_empty() {
        PathBuf::from("./uploader.yaml")
    } else {
        PathBuf::from(var)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = Config::parse("{}").unwrap();
        assert_eq!(
            config.upload_url.as_str(),
            "https://sudea-servidor.onrender.com/upload"
        );
        assert_eq!(config.form_field, "file");
        assert_eq!(config.open_attempts, 5);
        assert_eq!(config.settle_delay(), Duration::from_secs(1));
        assert_eq!(config.retry_delay(), Duration::from_secs(1));
        assert_eq!(config.extensions, vec!["png", "jpg", "jpeg"]);
        assert!(config.api_token.is_none());
    }

    #[test]
    fn overrides_are_applied() {
        let config = Config::parse(
            r#"
upload_url: "http://127.0.0.1:3000/api/detect-local-yolo"
form_field: image
api_token: abc123
open_attempts: 3
retry_delay_ms: 2000
watch_dir: /tmp/incoming
"#,
        )
        .unwrap();
        assert_eq!(config.form_field, "image");
        assert_eq!(config.api_token.as_deref(), Some("abc123"));
        assert_eq!(config.open_attempts, 3);
        assert_eq!(config.retry_delay(), Duration::from_secs(2));
        assert_eq!(
            config.resolve_watch_dir().unwrap(),
            PathBuf::from("/tmp/incoming")
        );
    }

    #[test]
    fn zero_attempts_is_rejected() {
        assert!(matches!(
            Config::parse("open_attempts: 0"),
            Err(ConfigError::NoAttempts)
        ));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("nope.yaml")).unwrap();
        assert_eq!(config.open_attempts, 5);
    }

    #[test]
    fn bad_yaml_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uploader.yaml");
        std::fs::write(&path, "open_attempts: [").unwrap();
        match Config::load(&path) {
            Err(ConfigError::Parse(p, _)) => assert_eq!(p, path),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn default_watch_dir_sits_next_to_executable() {
        let dir = Config::default().resolve_watch_dir().unwrap();
        assert_eq!(dir.file_name().unwrap(), WATCH_DIR_NAME);
    }

    #[test]
    fn explicit_flag_wins() {
        assert_eq!(
            config_path(Some(Path::new("/etc/sudea.yaml"))),
            PathBuf::from("/etc/sudea.yaml")
        );
    }
}
