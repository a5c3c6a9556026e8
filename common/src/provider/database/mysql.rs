// MySQL acquirer: mysqldump driven from a strictly parsed DSN

use super::SQL_MIME;
use crate::artifact::Artifact;
use crate::errors::{AcquireError, ValidationError};
use crate::models::{Job, ProviderConfig};
use crate::process::{run_streaming, CommandSpec};
use crate::provider::{config_mismatch, Acquirer};
use crate::runtime::{RunContext, StepContext};
use async_trait::async_trait;
use tracing::{info, instrument};

pub struct MysqlAcquirer;

#[async_trait]
impl Acquirer for MysqlAcquirer {
    #[instrument(skip(self, job, run_ctx, step), fields(job_id = %job.id))]
    async fn acquire(
        &self,
        job: &Job,
        run_ctx: &RunContext,
        step: &StepContext,
    ) -> Result<Artifact, AcquireError> {
        let ProviderConfig::Mysql(cfg) = &job.config else {
            return Err(config_mismatch(job.provider));
        };

        let dsn = MysqlDsn::parse(&cfg.connection_string)?;

        let name = format!("{}.sql", job.id);
        let dest = run_ctx.temp_dir.join(&name);
        let file = tokio::fs::File::create(&dest)
            .await
            .map_err(|e| AcquireError::Io(format!("failed to create {}: {}", dest.display(), e)))?;

        let mut spec = CommandSpec::new("mysqldump")
            .args(["-h", &dsn.host])
            .args(["-P".to_string(), dsn.port.to_string()])
            .args(["-u", &dsn.username])
            .args([
                "--single-transaction",
                "--quick",
                "--lock-tables=false",
                "--routines",
                "--triggers",
            ])
            .arg(&dsn.database);
        if !dsn.password.is_empty() {
            // Passed through the environment so it never shows up in ps.
            spec = spec.env("MYSQL_PWD", &dsn.password);
        }

        info!(host = %dsn.host, port = dsn.port, database = %dsn.database, "Running mysqldump");
        crate::provider::cleanup_on_error(run_streaming(&spec, file, step).await, &dest).await?;

        let artifact = Artifact::describe(&dest, name, SQL_MIME).await?;
        info!(size = artifact.size, "MySQL dump complete");
        Ok(artifact)
    }
}

/// Parsed form of `user[:password]@tcp(host[:port])/database[?params]`.
///
/// The parser is strict: every structural token must be present and every
/// component non-empty, and a malformed DSN is a terminal validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MysqlDsn {
    pub username: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub database: String,
}

impl MysqlDsn {
    pub fn parse(dsn: &str) -> Result<Self, ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidFieldValue {
            field: "connection_string".to_string(),
            reason: reason.to_string(),
        };

        // Credentials may contain '@'; the transport marker owns the last one.
        let at = dsn.rfind('@').ok_or_else(|| invalid("missing '@'"))?;
        let (credentials, rest) = dsn.split_at(at);
        let rest = &rest[1..];

        let (username, password) = match credentials.split_once(':') {
            Some((user, pass)) => (user, pass),
            None => (credentials, ""),
        };
        if username.is_empty() {
            return Err(invalid("empty username"));
        }

        let addr = rest
            .strip_prefix("tcp(")
            .ok_or_else(|| invalid("expected 'tcp(' after '@'"))?;
        let close = addr.find(')').ok_or_else(|| invalid("unterminated address"))?;
        let (host_port, after_addr) = addr.split_at(close);
        let after_addr = &after_addr[1..];

        let (host, port) = match host_port.split_once(':') {
            Some((host, port)) => {
                let port: u16 = port
                    .parse()
                    .map_err(|_| invalid(&format!("invalid port: {}", port)))?;
                if port == 0 {
                    return Err(invalid("port must be greater than 0"));
                }
                (host, port)
            }
            None => (host_port, 3306),
        };
        if host.is_empty() {
            return Err(invalid("empty host"));
        }

        let database = after_addr
            .strip_prefix('/')
            .ok_or_else(|| invalid("expected '/' before database name"))?;
        let database = database.split('?').next().unwrap_or(database);
        if database.is_empty() {
            return Err(invalid("empty database name"));
        }

        Ok(Self {
            username: username.to_string(),
            password: password.to_string(),
            host: host.to_string(),
            port,
            database: database.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_dsn() {
        let dsn = MysqlDsn::parse("backup:s3cret@tcp(db.internal:3307)/orders?tls=true").unwrap();
        assert_eq!(
            dsn,
            MysqlDsn {
                username: "backup".to_string(),
                password: "s3cret".to_string(),
                host: "db.internal".to_string(),
                port: 3307,
                database: "orders".to_string(),
            }
        );
    }

    #[test]
    fn test_default_port_and_empty_password() {
        let dsn = MysqlDsn::parse("root@tcp(localhost)/app").unwrap();
        assert_eq!(dsn.port, 3306);
        assert_eq!(dsn.password, "");
    }

    #[test]
    fn test_password_containing_at_sign() {
        let dsn = MysqlDsn::parse("u:p@ss@tcp(h:3306)/db").unwrap();
        assert_eq!(dsn.username, "u");
        assert_eq!(dsn.password, "p@ss");
    }

    #[test]
    fn test_malformed_dsns_are_rejected() {
        for bad in [
            "",
            "no-at-sign",
            "u:p@host:3306/db",       // missing tcp()
            "u:p@tcp(host:3306/db",   // unterminated address
            "u:p@tcp(host:3306)db",   // missing slash
            "u:p@tcp(host:3306)/",    // empty database
            "u:p@tcp(:3306)/db",      // empty host
            "u:p@tcp(host:zero)/db",  // non-numeric port
            "u:p@tcp(host:0)/db",     // zero port
            ":p@tcp(host:3306)/db",   // empty username
        ] {
            assert!(MysqlDsn::parse(bad).is_err(), "accepted: {}", bad);
        }
    }

    #[test]
    fn test_malformed_dsn_is_terminal() {
        use crate::errors::Classify;
        let err = MysqlDsn::parse("garbage").unwrap_err();
        assert!(err.is_terminal());
    }
}
