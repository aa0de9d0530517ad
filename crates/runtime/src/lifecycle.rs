//! Host lifecycle signal.
//!
//! The host owns a [`HostLifecycle`] and invalidates it when the screen
//! that started a request goes away. Sessions race every suspension point
//! against the signal and stop as soon as it fires.

use crate::{Error, Result};
use std::future::Future;
use tokio::sync::watch;

/// Owner side of the lifecycle signal.
#[derive(Debug)]
pub struct HostLifecycle {
    tx: watch::Sender<bool>,
}

impl Default for HostLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl HostLifecycle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// A signal that sessions can watch.
    pub fn signal(&self) -> LifecycleSignal {
        LifecycleSignal {
            rx: Some(self.tx.subscribe()),
        }
    }

    /// Mark the host as gone. Every session watching this signal abandons.
    pub fn invalidate(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_invalidated(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Watcher side of the lifecycle signal.
#[derive(Debug, Clone)]
pub struct LifecycleSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl LifecycleSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_invalidated(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Completes once the host is invalidated.
    ///
    /// If the owner is dropped without invalidating, this never completes.
    pub async fn invalidated(&mut self) {
        if let Some(rx) = self.rx.as_mut() {
            if rx.wait_for(|gone| *gone).await.is_ok() {
                return;
            }
        }
        std::future::pending::<()>().await;
    }

    /// Await `fut` unless the host goes away first.
    pub async fn guard<F: Future>(&mut self, fut: F) -> Result<F::Output> {
        if self.is_invalidated() {
            return Err(Error::Abandoned);
        }
        tokio::select! {
            biased;
            _ = self.invalidated() => Err(Error::Abandoned),
            out = fut => Ok(out),
        }
    }
}
