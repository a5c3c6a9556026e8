// Per-run execution context shared by every pipeline step
// Cancellation fans out through a token; heartbeats fan in to the dispatch
// layer so redelivery timers do not fire during long steps.

use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Liveness signal emitted by long-running steps (at least every 30 seconds;
/// acquirers beat per page, per object or per message batch).
#[derive(Clone)]
pub struct Heartbeat {
    tx: Option<mpsc::Sender<()>>,
}

impl Heartbeat {
    /// Heartbeat wired to the dispatch layer.
    pub fn new(tx: mpsc::Sender<()>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Heartbeat that goes nowhere; used by tests and one-shot invocations.
    pub fn noop() -> Self {
        Self { tx: None }
    }

    /// Signal liveness. Never blocks; a full channel means a beat is already
    /// in flight, which is just as good.
    pub fn beat(&self) {
        if let Some(tx) = &self.tx {
            let _ = tx.try_send(());
        }
    }
}

/// Cancellation and liveness handle passed into every step.
#[derive(Clone)]
pub struct StepContext {
    pub cancel: CancellationToken,
    pub heartbeat: Heartbeat,
}

impl StepContext {
    pub fn new(cancel: CancellationToken, heartbeat: Heartbeat) -> Self {
        Self { cancel, heartbeat }
    }

    /// Detached context for one-shot invocations and tests.
    pub fn detached() -> Self {
        Self {
            cancel: CancellationToken::new(),
            heartbeat: Heartbeat::noop(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Per-invocation scratch state; not persisted anywhere.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Root under which this run places its temp files, isolated by name.
    pub temp_dir: PathBuf,
}

impl RunContext {
    pub fn new(temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_heartbeat_forwards_beats() {
        let (tx, mut rx) = mpsc::channel(1);
        let hb = Heartbeat::new(tx);
        hb.beat();
        assert!(rx.recv().await.is_some());
    }

    #[test]
    fn test_full_heartbeat_channel_does_not_block() {
        let (tx, _rx) = mpsc::channel(1);
        let hb = Heartbeat::new(tx);
        hb.beat();
        hb.beat();
        hb.beat();
    }

    #[test]
    fn test_detached_context_is_never_cancelled() {
        let ctx = StepContext::detached();
        assert!(!ctx.is_cancelled());
        ctx.heartbeat.beat();
    }
}
