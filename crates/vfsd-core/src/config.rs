//! Layered configuration: built-in defaults, an optional TOML file,
//! `VFSD_`-prefixed environment variables, then CLI flags — in increasing
//! priority. Only [`DaemonConfig::load`]'s callers apply CLI overrides; this
//! module handles the file+env layers and leaves flag application to the
//! caller, which already owns a parsed `clap` struct.

use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub bus_address: Option<String>,
    pub socket_dir: Option<String>,
    pub worker_threads: usize,
    pub stat_cache_ttl_ms: u64,
    pub list_cache_ttl_ms: u64,
    pub ftp_max_connections_per_pool: usize,
    pub ftp_prefer_epsv: bool,
    pub log_level: String,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        DaemonConfig {
            bus_address: None,
            socket_dir: None,
            worker_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            stat_cache_ttl_ms: 5000,
            list_cache_ttl_ms: 5000,
            ftp_max_connections_per_pool: 4,
            ftp_prefer_epsv: true,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl DaemonConfig {
    /// Builds a config from defaults, overlaid by `path` (if it exists) and
    /// then by any recognized `VFSD_*` environment variable.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = DaemonConfig::default();

        if let Some(path) = path {
            if path.exists() {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
                config = toml::from_str(&text)
                    .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
            }
        }

        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("VFSD_BUS_ADDRESS") {
            self.bus_address = Some(v);
        }
        if let Ok(v) = std::env::var("VFSD_SOCKET_DIR") {
            self.socket_dir = Some(v);
        }
        if let Ok(v) = std::env::var("VFSD_WORKER_THREADS") {
            if let Ok(n) = v.parse() {
                self.worker_threads = n;
            }
        }
        if let Ok(v) = std::env::var("VFSD_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Ok(v) = std::env::var("VFSD_LOG_FORMAT") {
            match v.as_str() {
                "json" => self.log_format = LogFormat::Json,
                "pretty" => self.log_format = LogFormat::Pretty,
                _ => {}
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Read(std::path::PathBuf, std::io::Error),
    #[error("failed to parse config file {0}: {1}")]
    Parse(std::path::PathBuf, toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let config = DaemonConfig::default();
        assert_eq!(config.stat_cache_ttl_ms, 5000);
        assert!(config.ftp_prefer_epsv);
        assert!(config.worker_threads >= 1);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = DaemonConfig::load(Some(Path::new("/nonexistent/vfsd.toml"))).unwrap();
        assert_eq!(config.ftp_max_connections_per_pool, 4);
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "ftp_max_connections_per_pool = 8\nlog_level = \"debug\"\n").unwrap();
        let config = DaemonConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.ftp_max_connections_per_pool, 8);
        assert_eq!(config.log_level, "debug");
        // unspecified fields still take their defaults
        assert!(config.ftp_prefer_epsv);
    }

    #[test]
    fn env_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "log_level = \"debug\"\n").unwrap();
        unsafe {
            std::env::set_var("VFSD_LOG_LEVEL", "trace");
        }
        let config = DaemonConfig::load(Some(file.path())).unwrap();
        unsafe {
            std::env::remove_var("VFSD_LOG_LEVEL");
        }
        assert_eq!(config.log_level, "trace");
    }

    #[test]
    fn bad_toml_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "this is not valid toml = = =").unwrap();
        let err = DaemonConfig::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_, _)));
    }
}
