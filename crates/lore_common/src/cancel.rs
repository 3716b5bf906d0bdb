//! Deadlines and cancellation for external calls.
//!
//! Every call that leaves the process (LLM, graph store, source adapters)
//! runs under `with_deadline`, which resolves to a typed interruption
//! instead of a partial result. Dropping the inner future cancels the call.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Why a guarded call did not complete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    Timeout(Duration),
    Cancelled,
}

/// Owner side: trips the signal for every clone of the paired `CancelSignal`
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Observer side, cheap to clone into tasks
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    rx: Option<watch::Receiver<bool>>,
}

/// Create a connected handle/signal pair
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (
        CancelHandle { tx: Arc::new(tx) },
        CancelSignal { rx: Some(rx) },
    )
}

impl CancelSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Resolves once cancelled; pends forever otherwise
    pub async fn cancelled(&self) {
        let Some(rx) = &self.rx else {
            return std::future::pending().await;
        };
        let mut rx = rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Handle dropped without cancelling
                return std::future::pending().await;
            }
        }
    }
}

/// Run `fut` until it completes, the deadline passes, or `cancel` fires
pub async fn with_deadline<F>(
    fut: F,
    timeout: Duration,
    cancel: &CancelSignal,
) -> Result<F::Output, Interrupt>
where
    F: Future,
{
    if cancel.is_cancelled() {
        return Err(Interrupt::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupt::Cancelled),
        res = tokio::time::timeout(timeout, fut) => res.map_err(|_| Interrupt::Timeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completes_within_deadline() {
        let res = with_deadline(async { 7 }, Duration::from_secs(1), &CancelSignal::never()).await;
        assert_eq!(res, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out() {
        let slow = tokio::time::sleep(Duration::from_secs(10));
        let res = with_deadline(slow, Duration::from_secs(5), &CancelSignal::never()).await;
        assert_eq!(res, Err(Interrupt::Timeout(Duration::from_secs(5))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_pending_call() {
        let (handle, signal) = cancel_pair();
        let task = tokio::spawn(async move {
            with_deadline(
                tokio::time::sleep(Duration::from_secs(60)),
                Duration::from_secs(120),
                &signal,
            )
            .await
        });
        tokio::task::yield_now().await;
        handle.cancel();
        assert_eq!(task.await.unwrap(), Err(Interrupt::Cancelled));
    }

    #[tokio::test]
    async fn test_already_cancelled_short_circuits() {
        let (handle, signal) = cancel_pair();
        handle.cancel();
        assert!(signal.is_cancelled());
        let res = with_deadline(async { 1 }, Duration::from_secs(1), &signal).await;
        assert_eq!(res, Err(Interrupt::Cancelled));
    }
}
