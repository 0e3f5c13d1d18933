//! Cancellation signals for planning calls.
//!
//! A [`CancelToken`] combines an optional explicit signal, fired through a
//! [`CancelHandle`], with an optional deadline. Pure computations poll it with
//! [`CancelToken::check`]; async I/O races against [`CancelToken::cancelled`].

use std::time::{Duration, Instant};

use tokio::sync::watch;

use crate::error::{CancelReason, DeliveryError, Result};

/// Fires the cancellation observed by every token created from it.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Create a handle with no cancellation fired yet.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// A token observing this handle, with no deadline.
    pub fn token(&self) -> CancelToken {
        CancelToken {
            signal: Some(self.tx.subscribe()),
            deadline: None,
        }
    }

    /// Cancel every token observing this handle.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Observes cancellation for one call.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    signal: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

impl CancelToken {
    /// A token that never cancels.
    pub fn never() -> Self {
        Self::default()
    }

    /// A token that cancels once `timeout` has elapsed from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::never().tighten(Instant::now() + timeout)
    }

    /// Apply `deadline` unless an earlier one is already set.
    pub fn tighten(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Why this token is cancelled, if it is.
    pub fn reason(&self) -> Option<CancelReason> {
        if let Some(signal) = &self.signal {
            if *signal.borrow() {
                return Some(CancelReason::Requested);
            }
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(CancelReason::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }

    /// Returns the cancellation condition if the token has fired.
    pub fn check(&self) -> Result<()> {
        match self.reason() {
            Some(reason) => Err(DeliveryError::Cancelled { reason }),
            None => Ok(()),
        }
    }

    /// Resolves when the token fires. Never resolves for [`CancelToken::never`].
    pub async fn cancelled(&self) -> CancelReason {
        let signal = async {
            match &self.signal {
                Some(rx) => {
                    let mut rx = rx.clone();
                    let fired = rx.wait_for(|fired| *fired).await.is_ok();
                    // A dropped handle can no longer cancel.
                    if !fired {
                        std::future::pending::<()>().await;
                    }
                }
                None => std::future::pending::<()>().await,
            }
        };
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = signal => CancelReason::Requested,
            _ = deadline => CancelReason::DeadlineExceeded,
        }
    }

    /// Run `fut` unless the token fires first.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        self.check()?;
        tokio::select! {
            biased;
            reason = self.cancelled() => Err(DeliveryError::Cancelled { reason }),
            result = fut => result,
        }
    }
}
