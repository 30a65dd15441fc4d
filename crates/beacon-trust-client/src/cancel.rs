//! Drop-based cancellation.
//!
//! A [`CallToken`] is owned by whoever started a request. Every
//! [`CallWatch`] derived from it observes cancellation as soon as the
//! token is dropped.

use tokio::sync::watch;

/// Owner side: the request is live while this exists.
#[derive(Debug)]
pub struct CallToken {
    tx: watch::Sender<()>,
}

impl Default for CallToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CallToken {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(());
        Self { tx }
    }

    pub fn watch(&self) -> CallWatch {
        CallWatch {
            rx: self.tx.subscribe(),
        }
    }

    /// Cancel explicitly; same as dropping the token.
    pub fn cancel(self) {
        drop(self);
    }
}

/// Liveness check held by in-flight work.
#[derive(Debug, Clone)]
pub struct CallWatch {
    rx: watch::Receiver<()>,
}

impl CallWatch {
    pub fn is_cancelled(&self) -> bool {
        self.rx.has_changed().is_err()
    }

    /// Resolves once the token is gone.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        while rx.changed().await.is_ok() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_drop_cancels_every_watch() {
        let token = CallToken::new();
        let a = token.watch();
        let b = a.clone();
        assert!(!a.is_cancelled());

        let waiter = tokio::spawn(async move { b.cancelled().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        drop(token);
        assert!(a.is_cancelled());
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_watch_taken_after_cancel() {
        let token = CallToken::new();
        let watch = token.watch();
        token.cancel();
        watch.cancelled().await;
        assert!(watch.is_cancelled());
    }
}
