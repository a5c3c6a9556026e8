// Mailbox acquirer: walks IMAP folders into one mbox or a zip of .eml files
// The gmail tag is the same acquirer pinned to Google's IMAP endpoint.

use crate::artifact::Artifact;
use crate::errors::AcquireError;
use crate::models::{Job, MailConfig, MailExportFormat, Provider, ProviderConfig};
use crate::provider::{config_mismatch, Acquirer};
use crate::runtime::{Heartbeat, RunContext, StepContext};
use async_trait::async_trait;
use chrono::Utc;
use imap::types::NameAttribute;
use std::io::Write;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const GMAIL_HOST: &str = "imap.gmail.com";
const GMAIL_PORT: u16 = 993;

pub struct MailAcquirer;

#[async_trait]
impl Acquirer for MailAcquirer {
    #[instrument(skip(self, job, run_ctx, step), fields(job_id = %job.id, provider = %job.provider))]
    async fn acquire(
        &self,
        job: &Job,
        run_ctx: &RunContext,
        step: &StepContext,
    ) -> Result<Artifact, AcquireError> {
        let ProviderConfig::Mail(cfg) = &job.config else {
            return Err(config_mismatch(job.provider));
        };

        let (host, port) = endpoint(cfg, job.provider);
        let (name, mime) = match cfg.export_format {
            MailExportFormat::Mbox => (format!("{}.mbox", job.id), "application/mbox"),
            MailExportFormat::Eml => (format!("{}.zip", job.id), "application/zip"),
        };
        let dest = run_ctx.temp_dir.join(&name);

        info!(host = %host, port, format = ?cfg.export_format, "Starting mailbox export");

        let cfg = cfg.clone();
        let dest_clone = dest.clone();
        let cancel = step.cancel.clone();
        let heartbeat = step.heartbeat.clone();
        let exported = tokio::task::spawn_blocking(move || {
            export(&cfg, &host, port, &dest_clone, &cancel, &heartbeat)
        })
        .await
        .map_err(|e| AcquireError::Io(format!("mail export task failed: {}", e)));
        let exported = super::cleanup_on_error(exported.and_then(|r| r), &dest).await?;

        let artifact = Artifact::describe(&dest, name, mime).await?;
        info!(messages = exported, size = artifact.size, "Mailbox export complete");
        Ok(artifact)
    }
}

fn endpoint(cfg: &MailConfig, provider: Provider) -> (String, u16) {
    if provider == Provider::Gmail {
        (GMAIL_HOST.to_string(), GMAIL_PORT)
    } else {
        (cfg.host.clone(), cfg.port)
    }
}

fn export(
    cfg: &MailConfig,
    host: &str,
    port: u16,
    dest: &PathBuf,
    cancel: &CancellationToken,
    heartbeat: &Heartbeat,
) -> Result<u64, AcquireError> {
    let tls = native_tls::TlsConnector::new()
        .map_err(|e| AcquireError::Connect(format!("failed to build TLS connector: {}", e)))?;
    let client = imap::connect((host, port), host, &tls)
        .map_err(|e| AcquireError::Connect(format!("failed to dial {}:{}: {}", host, port, e)))?;

    let mut session = client
        .login(&cfg.username, &cfg.password)
        .map_err(|(e, _)| AcquireError::Auth(format!("login failed for {}: {}", cfg.username, e)))?;

    let names = session
        .list(Some(""), Some("*"))
        .map_err(|e| AcquireError::Protocol(format!("failed to list mailboxes: {}", e)))?;

    let mailboxes: Vec<String> = names
        .iter()
        .filter(|name| !name.attributes().contains(&NameAttribute::NoSelect))
        .map(|name| name.name().to_string())
        .filter(|name| cfg.folders.is_empty() || cfg.folders.iter().any(|f| f == name))
        .collect();

    debug!(count = mailboxes.len(), "Selected mailboxes");

    let result = match cfg.export_format {
        MailExportFormat::Mbox => export_mbox(&mut session, &mailboxes, dest, cancel, heartbeat),
        MailExportFormat::Eml => export_eml(&mut session, &mailboxes, dest, cancel, heartbeat),
    };

    if let Err(e) = session.logout() {
        warn!(error = %e, "IMAP logout failed");
    }
    result
}

fn export_mbox<S: std::io::Read + std::io::Write>(
    session: &mut imap::Session<S>,
    mailboxes: &[String],
    dest: &PathBuf,
    cancel: &CancellationToken,
    heartbeat: &Heartbeat,
) -> Result<u64, AcquireError> {
    let mut out = std::io::BufWriter::new(std::fs::File::create(dest).map_err(|e| {
        AcquireError::Io(format!("failed to create {}: {}", dest.display(), e))
    })?);

    let mut exported: u64 = 0;
    for mailbox in mailboxes {
        if cancel.is_cancelled() {
            return Err(AcquireError::Cancelled);
        }

        let selected = match session.select(mailbox) {
            Ok(selected) => selected,
            Err(e) => {
                warn!(mailbox = %mailbox, error = %e, "Failed to select mailbox, skipping");
                continue;
            }
        };
        if selected.exists == 0 {
            continue;
        }

        let messages = session
            .fetch("1:*", "(RFC822 INTERNALDATE)")
            .map_err(|e| AcquireError::Protocol(format!("fetch failed in {}: {}", mailbox, e)))?;

        for message in messages.iter() {
            if cancel.is_cancelled() {
                return Err(AcquireError::Cancelled);
            }
            let Some(body) = message.body() else {
                warn!(mailbox = %mailbox, seq = message.message, "Message without body");
                continue;
            };

            let date = message
                .internal_date()
                .map(|d| d.format("%a %b %e %H:%M:%S %Y").to_string())
                .unwrap_or_else(|| Utc::now().format("%a %b %e %H:%M:%S %Y").to_string());
            write_mbox_message(&mut out, &date, body)
                .map_err(|e| AcquireError::Io(format!("failed to write mbox: {}", e)))?;

            exported += 1;
            heartbeat.beat();
        }
    }

    out.flush()
        .map_err(|e| AcquireError::Io(e.to_string()))?;
    Ok(exported)
}

fn export_eml<S: std::io::Read + std::io::Write>(
    session: &mut imap::Session<S>,
    mailboxes: &[String],
    dest: &PathBuf,
    cancel: &CancellationToken,
    heartbeat: &Heartbeat,
) -> Result<u64, AcquireError> {
    let out = std::fs::File::create(dest)
        .map_err(|e| AcquireError::Io(format!("failed to create {}: {}", dest.display(), e)))?;
    let mut zip = ZipWriter::new(out);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut exported: u64 = 0;
    for mailbox in mailboxes {
        if cancel.is_cancelled() {
            return Err(AcquireError::Cancelled);
        }

        let selected = match session.select(mailbox) {
            Ok(selected) => selected,
            Err(e) => {
                warn!(mailbox = %mailbox, error = %e, "Failed to select mailbox, skipping");
                continue;
            }
        };
        if selected.exists == 0 {
            continue;
        }

        let messages = session
            .fetch("1:*", "(RFC822 UID)")
            .map_err(|e| AcquireError::Protocol(format!("fetch failed in {}: {}", mailbox, e)))?;

        for message in messages.iter() {
            if cancel.is_cancelled() {
                return Err(AcquireError::Cancelled);
            }
            let Some(body) = message.body() else {
                continue;
            };
            let id = message.uid.unwrap_or(message.message);

            zip.start_file(format!("{}/{}.eml", mailbox, id), options)
                .map_err(|e| AcquireError::Io(format!("failed to open zip entry: {}", e)))?;
            zip.write_all(body)
                .map_err(|e| AcquireError::Io(format!("failed to write zip entry: {}", e)))?;

            exported += 1;
            heartbeat.beat();
        }
    }

    zip.finish()
        .map_err(|e| AcquireError::Io(format!("failed to finish zip: {}", e)))?;
    Ok(exported)
}

/// Append one message in mboxrd form: a `From ` separator with the message
/// date, the body with `From `-lines quoted, and a blank-line terminator.
fn write_mbox_message<W: Write>(out: &mut W, date: &str, body: &[u8]) -> std::io::Result<()> {
    writeln!(out, "From - {}", date)?;
    for line in body.split_inclusive(|&b| b == b'\n') {
        if needs_stuffing(line) {
            out.write_all(b">")?;
        }
        out.write_all(line)?;
    }
    out.write_all(b"\n\n")?;
    Ok(())
}

/// True for lines matching `^>*From ` (mboxrd quoting).
fn needs_stuffing(line: &[u8]) -> bool {
    let mut rest = line;
    while let Some((b'>', tail)) = rest.split_first() {
        rest = tail;
    }
    rest.starts_with(b"From ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mail_cfg() -> MailConfig {
        MailConfig {
            host: "mail.example.com".to_string(),
            port: 993,
            username: "u".to_string(),
            password: "p".to_string(),
            folders: Vec::new(),
            export_format: MailExportFormat::Mbox,
        }
    }

    #[test]
    fn test_gmail_pins_endpoint() {
        let (host, port) = endpoint(&mail_cfg(), Provider::Gmail);
        assert_eq!(host, "imap.gmail.com");
        assert_eq!(port, 993);

        let (host, port) = endpoint(&mail_cfg(), Provider::Imap);
        assert_eq!(host, "mail.example.com");
        assert_eq!(port, 993);
    }

    #[test]
    fn test_from_line_stuffing() {
        assert!(needs_stuffing(b"From me@example.com\n"));
        assert!(needs_stuffing(b">From quoted\n"));
        assert!(needs_stuffing(b">>>From deeply quoted\n"));
        assert!(!needs_stuffing(b"Frome is not From\n"));
        assert!(!needs_stuffing(b"X-From: header\n"));
    }

    #[test]
    fn test_mbox_message_layout() {
        let mut out = Vec::new();
        write_mbox_message(
            &mut out,
            "Mon Jan  5 10:00:00 2026",
            b"Subject: hi\n\nFrom the road.\nbye\n",
        )
        .unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("From - Mon Jan  5 10:00:00 2026\n"));
        assert!(text.contains("\n>From the road.\n"));
        assert!(text.ends_with("bye\n\n\n"));
    }
}
