// Cancellable subprocess execution for acquirers that shell out
// (curl, git, mysqldump, pg_dump, sqlcmd, redis-cli)

use crate::errors::AcquireError;
use crate::runtime::StepContext;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Grace period between SIGTERM and SIGKILL.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Keep at most this much stderr for diagnostics.
const STDERR_TAIL: usize = 16 * 1024;

/// A subprocess invocation with optional working directory, environment and
/// wall-clock timeout.
#[derive(Debug)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub workdir: Option<String>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            workdir: None,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn workdir(mut self, dir: impl Into<String>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn build(&self, stdout: Stdio) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

/// Run a command to completion, discarding stdout.
pub async fn run(spec: &CommandSpec, step: &StepContext) -> Result<(), AcquireError> {
    run_streaming(spec, tokio::io::sink(), step).await
}

/// Run a command, copying its stdout into `sink` as it is produced.
///
/// Cancellation and timeout both terminate the child with SIGTERM, escalating
/// to SIGKILL after a grace period. Non-zero exits carry the stderr tail.
pub async fn run_streaming<W>(
    spec: &CommandSpec,
    mut sink: W,
    step: &StepContext,
) -> Result<(), AcquireError>
where
    W: AsyncWrite + Unpin,
{
    debug!(program = %spec.program, args = ?spec.args, "Spawning subprocess");

    let mut child = spec
        .build(Stdio::piped())
        .spawn()
        .map_err(|e| AcquireError::CommandSpawn {
            program: spec.program.clone(),
            detail: e.to_string(),
        })?;

    let mut stdout = child.stdout.take().ok_or_else(|| AcquireError::CommandSpawn {
        program: spec.program.clone(),
        detail: "stdout not captured".to_string(),
    })?;
    let mut stderr = child.stderr.take().ok_or_else(|| AcquireError::CommandSpawn {
        program: spec.program.clone(),
        detail: "stderr not captured".to_string(),
    })?;

    let stderr_task = tokio::spawn(async move {
        let mut tail = Vec::new();
        let mut buf = [0u8; 4096];
        while let Ok(n) = stderr.read(&mut buf).await {
            if n == 0 {
                break;
            }
            tail.extend_from_slice(&buf[..n]);
            if tail.len() > STDERR_TAIL {
                let cut = tail.len() - STDERR_TAIL;
                tail.drain(..cut);
            }
        }
        String::from_utf8_lossy(&tail).into_owned()
    });

    let timeout = spec.timeout.unwrap_or(Duration::from_secs(30 * 60));
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    // Phase 1: drain stdout into the sink. The child's handle stays free so
    // an interruption can terminate it.
    let mut buf = vec![0u8; 32 * 1024];
    let drained: Result<(), Interrupt> = loop {
        tokio::select! {
            read = stdout.read(&mut buf) => {
                let n = read
                    .map_err(|e| AcquireError::Io(format!("failed to read child stdout: {}", e)))?;
                if n == 0 {
                    break Ok(());
                }
                sink.write_all(&buf[..n])
                    .await
                    .map_err(|e| AcquireError::Io(format!("failed to write child output: {}", e)))?;
                step.heartbeat.beat();
            }
            _ = step.cancel.cancelled() => break Err(Interrupt::Cancelled),
            _ = &mut deadline => break Err(Interrupt::TimedOut),
        }
    };

    if let Err(interrupt) = drained {
        terminate(&mut child, &spec.program).await;
        return Err(interrupt_error(interrupt, spec, timeout));
    }

    sink.flush()
        .await
        .map_err(|e| AcquireError::Io(format!("failed to flush child output: {}", e)))?;

    // Phase 2: reap the child, still bounded by cancellation and deadline.
    let waited = tokio::select! {
        status = child.wait() => Some(
            status.map_err(|e| AcquireError::Io(format!("failed to wait for child: {}", e)))?,
        ),
        _ = step.cancel.cancelled() => None,
        _ = &mut deadline => None,
    };
    let status = match waited {
        Some(status) => status,
        None => {
            let interrupt = if step.cancel.is_cancelled() {
                Interrupt::Cancelled
            } else {
                Interrupt::TimedOut
            };
            terminate(&mut child, &spec.program).await;
            return Err(interrupt_error(interrupt, spec, timeout));
        }
    };

    let stderr_tail = stderr_task.await.unwrap_or_default();

    if !status.success() {
        return Err(AcquireError::CommandFailed {
            program: spec.program.clone(),
            code: status.code(),
            stderr: stderr_tail,
        });
    }

    if !stderr_tail.is_empty() {
        debug!(program = %spec.program, stderr = %stderr_tail, "Subprocess diagnostics");
    }

    Ok(())
}

enum Interrupt {
    Cancelled,
    TimedOut,
}

fn interrupt_error(interrupt: Interrupt, spec: &CommandSpec, timeout: Duration) -> AcquireError {
    match interrupt {
        Interrupt::Cancelled => {
            warn!(program = %spec.program, "Cancellation requested, subprocess terminated");
            AcquireError::Cancelled
        }
        Interrupt::TimedOut => {
            warn!(program = %spec.program, timeout_secs = timeout.as_secs(), "Subprocess timed out");
            AcquireError::Timeout {
                program: spec.program.clone(),
                seconds: timeout.as_secs(),
            }
        }
    }
}

/// SIGTERM, wait out the grace period, then SIGKILL.
async fn terminate(child: &mut Child, program: &str) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_ok() {
            debug!(program, "Subprocess exited after SIGTERM");
            return;
        }
        warn!(program, "Subprocess ignored SIGTERM, sending SIGKILL");
    }

    let _ = child.kill().await;
    let _ = child.wait().await;
}
