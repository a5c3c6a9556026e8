// Configuration management with layered sources (file, then environment)

use crate::errors::ValidationError;
use crate::models::{CompressionConfig, EncryptionConfig, Job, Provider, ProviderConfig};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root settings tree for the agent process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Control-plane base URL.
    pub api: String,
    /// Root directory for per-run temp files.
    pub temp_dir: String,
    pub auth: AuthSettings,
    #[serde(default)]
    pub log: LogSettings,
    #[serde(default)]
    pub jobs: Vec<JobSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    /// Identity-provider base URL.
    pub server: String,
    pub username: String,
    pub password: String,
    pub client_id: String,
    pub audience: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    pub level: String,
    /// Log file path, or "stdout".
    pub path: String,
    pub max_size_mb: u64,
    pub max_backups: u32,
    pub max_age_days: u32,
    pub compress: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            path: "stdout".to_string(),
            max_size_mb: 5,
            max_backups: 3,
            max_age_days: 28,
            compress: true,
        }
    }
}

/// Raw job descriptor as written in the config file; the `config` map is
/// coerced to its typed variant when the catalog is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub id: String,
    pub provider: Provider,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub compression: CompressionConfig,
    #[serde(default)]
    pub encryption: EncryptionConfig,
}

impl Settings {
    /// Load with layered precedence: config file, then `AGENT__`-prefixed
    /// environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config.yaml")
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::from(path.as_ref()).required(false))
            .add_source(
                Environment::with_prefix("AGENT")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate everything that would otherwise only fail mid-run.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.api.is_empty() {
            return Err(ValidationError::InvalidSettings(
                "api URL cannot be empty".to_string(),
            ));
        }
        if self.temp_dir.is_empty() {
            return Err(ValidationError::InvalidSettings(
                "temp_dir cannot be empty".to_string(),
            ));
        }
        if self.auth.server.is_empty() {
            return Err(ValidationError::InvalidSettings(
                "auth.server cannot be empty".to_string(),
            ));
        }
        if self.auth.username.is_empty() || self.auth.password.is_empty() {
            return Err(ValidationError::InvalidSettings(
                "auth credentials cannot be empty".to_string(),
            ));
        }
        if self.auth.client_id.is_empty() {
            return Err(ValidationError::InvalidSettings(
                "auth.client_id cannot be empty".to_string(),
            ));
        }
        for job in &self.jobs {
            if job.id.is_empty() {
                return Err(ValidationError::InvalidSettings(
                    "job id cannot be empty".to_string(),
                ));
            }
            if job.encryption.enabled && job.encryption.key.is_empty() {
                return Err(ValidationError::InvalidSettings(format!(
                    "job {}: encryption enabled without a key",
                    job.id
                )));
            }
            if job.compression.enabled && job.compression.level > 9 {
                return Err(ValidationError::InvalidSettings(format!(
                    "job {}: compression level must be 0..=9",
                    job.id
                )));
            }
        }
        Ok(())
    }

    /// Coerce every job spec into its typed form.
    pub fn typed_jobs(&self) -> Result<Vec<Job>, ValidationError> {
        self.jobs
            .iter()
            .map(|spec| {
                let config = ProviderConfig::from_value(spec.provider, spec.config.clone())
                    .map_err(|e| {
                        ValidationError::InvalidConfig(format!("job {}: {}", spec.id, e))
                    })?;
                Ok(Job {
                    id: spec.id.clone(),
                    provider: spec.provider,
                    config,
                    compression: spec.compression.clone(),
                    encryption: spec.encryption.clone(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings {
            api: "https://api.example.com".to_string(),
            temp_dir: "/var/tmp/agent".to_string(),
            auth: AuthSettings {
                server: "https://id.example.com".to_string(),
                username: "agent@example.com".to_string(),
                password: "secret".to_string(),
                client_id: "client".to_string(),
                audience: "https://api.example.com".to_string(),
            },
            log: LogSettings::default(),
            jobs: vec![JobSpec {
                id: "j1".to_string(),
                provider: Provider::Http,
                config: serde_json::json!({"endpoint": "https://example.com/x"}),
                compression: CompressionConfig::default(),
                encryption: EncryptionConfig::default(),
            }],
        }
    }

    #[test]
    fn test_valid_settings_pass() {
        assert!(settings().validate().is_ok());
        assert_eq!(settings().typed_jobs().unwrap().len(), 1);
    }

    #[test]
    fn test_empty_api_is_rejected() {
        let mut s = settings();
        s.api = String::new();
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_encryption_without_key_is_rejected() {
        let mut s = settings();
        s.jobs[0].encryption.enabled = true;
        assert!(s.validate().is_err());

        s.jobs[0].encryption.key = hex::encode([7u8; 32]);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_compression_level_bounds() {
        let mut s = settings();
        s.jobs[0].compression.enabled = true;
        s.jobs[0].compression.level = 10;
        assert!(s.validate().is_err());
        s.jobs[0].compression.level = 9;
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_load_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            r#"
api: https://api.example.com
temp_dir: /var/tmp/agent
auth:
  server: https://id.example.com
  username: agent@example.com
  password: secret
  client_id: client
  audience: https://api.example.com
log:
  level: debug
  path: stdout
  max_size_mb: 10
  max_backups: 2
  max_age_days: 7
  compress: false
jobs:
  - id: mysql-prod
    provider: mysql
    config:
      connection_string: "backup:pw@tcp(db:3306)/orders"
    compression:
      enabled: true
      algorithm: zip
      level: 6
"#,
        )
        .unwrap();

        let loaded = Settings::load_from_path(&path).unwrap();
        assert_eq!(loaded.log.level, "debug");
        assert_eq!(loaded.jobs.len(), 1);
        assert_eq!(loaded.jobs[0].provider, Provider::Mysql);
        assert!(loaded.validate().is_ok());

        let jobs = loaded.typed_jobs().unwrap();
        assert!(matches!(jobs[0].config, ProviderConfig::Mysql(_)));
        assert!(jobs[0].compression.enabled);
    }

    #[test]
    fn test_unknown_provider_fails_at_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            r#"
api: https://api.example.com
temp_dir: /tmp
auth: { server: s, username: u, password: p, client_id: c, audience: a }
jobs:
  - id: j1
    provider: gopher
    config: {}
"#,
        )
        .unwrap();
        assert!(Settings::load_from_path(&path).is_err());
    }
}
