// src/cancellation.rs

//! Cooperative cancellation.
//!
//! A [`CancellationTokenSource`] owns the cancelled flag; every
//! [`CancellationToken`] handed out by it observes the source live. Tokens can
//! also be built as fixed values ([`CancellationToken::never`],
//! [`CancellationToken::cancelled_token`]) for contexts where cancellation is
//! structurally impossible or has already happened.
//!
//! Nothing here polls: [`CancellationToken::cancelled`] completes exactly when
//! the source is cancelled, and never completes for a token that cannot be
//! cancelled, so it can be raced in `tokio::select!` without a timeout.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

/// Owner of a cancellation flag.
///
/// Cloning a source yields another handle to the same flag.
#[derive(Clone)]
pub struct CancellationTokenSource {
    tx: Arc<watch::Sender<bool>>,
}

impl CancellationTokenSource {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Create a source that cancels itself once `delay` has elapsed.
    ///
    /// Must be called from within a Tokio runtime. The timer does not keep the
    /// source alive: if every handle is dropped first, the timer does nothing.
    pub fn with_delay(delay: Duration) -> Self {
        let source = Self::new();
        let weak = Arc::downgrade(&source.tx);

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = weak.upgrade() {
                debug!(delay_ms = delay.as_millis() as u64, "cancellation delay elapsed");
                cancel_sender(&tx);
            }
        });

        source
    }

    /// Request cancellation.
    ///
    /// Only the first call has an effect; returns `true` for that call.
    pub fn cancel(&self) -> bool {
        cancel_sender(&self.tx)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// A token that reflects this source's live state.
    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            inner: TokenInner::Live(self.tx.subscribe()),
        }
    }
}

impl Default for CancellationTokenSource {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationTokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationTokenSource")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

fn cancel_sender(tx: &watch::Sender<bool>) -> bool {
    tx.send_if_modified(|cancelled| {
        if *cancelled {
            false
        } else {
            *cancelled = true;
            true
        }
    })
}

#[derive(Clone)]
enum TokenInner {
    Fixed(bool),
    Live(watch::Receiver<bool>),
}

/// Read-only view of a cancellation flag.
#[derive(Clone)]
pub struct CancellationToken {
    inner: TokenInner,
}

impl CancellationToken {
    /// A token that can never be cancelled.
    pub fn never() -> Self {
        Self {
            inner: TokenInner::Fixed(false),
        }
    }

    /// A token that is already cancelled.
    pub fn cancelled_token() -> Self {
        Self {
            inner: TokenInner::Fixed(true),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match &self.inner {
            TokenInner::Fixed(value) => *value,
            TokenInner::Live(rx) => *rx.borrow(),
        }
    }

    /// Wait until cancellation occurs.
    ///
    /// Never completes if the token cannot be cancelled, including a live
    /// token whose source was dropped without cancelling.
    pub async fn cancelled(&self) {
        match &self.inner {
            TokenInner::Fixed(true) => {}
            TokenInner::Fixed(false) => std::future::pending::<()>().await,
            TokenInner::Live(rx) => {
                let mut rx = rx.clone();
                if rx.wait_for(|cancelled| *cancelled).await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::never()
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.inner {
            TokenInner::Fixed(_) => "fixed",
            TokenInner::Live(_) => "live",
        };
        f.debug_struct("CancellationToken")
            .field("kind", &kind)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
