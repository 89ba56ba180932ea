//! One-shot broadcast signal
//!
//! Fires at most once; any number of listeners can wait on it before or after
//! it fires. Firing again is a no-op, so callers never need to coordinate who
//! fires first.

use tokio::sync::watch;
use tracing::debug;

/// A condition that flips from unfired to fired exactly once
#[derive(Debug)]
pub struct Signal {
    name: &'static str,
    tx: watch::Sender<bool>,
}

impl Signal {
    /// Create an unfired signal
    pub fn new(name: &'static str) -> Self {
        let (tx, _) = watch::channel(false);
        Self { name, tx }
    }

    /// Fire the signal
    ///
    /// Returns true only for the call that actually fired it.
    pub fn fire(&self) -> bool {
        let first = self.tx.send_if_modified(|fired| {
            if *fired {
                false
            } else {
                *fired = true;
                true
            }
        });
        debug!(signal = self.name, first, "Signal::fire: called");
        first
    }

    /// Whether the signal has fired
    pub fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }

    /// Create a listener that can outlive borrows of the signal
    pub fn listener(&self) -> SignalListener {
        SignalListener {
            rx: self.tx.subscribe(),
        }
    }

    /// Wait until the signal fires
    pub async fn fired(&self) {
        self.listener().fired().await;
    }
}

/// Owned view of a [`Signal`] for use inside spawned tasks
#[derive(Debug, Clone)]
pub struct SignalListener {
    rx: watch::Receiver<bool>,
}

impl SignalListener {
    /// Wait until the signal fires
    ///
    /// Also returns if the signal itself was dropped, since it can then never fire.
    pub async fn fired(&mut self) {
        let _ = self.rx.wait_for(|fired| *fired).await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_fires_once() {
        let signal = Signal::new("test");
        assert!(!signal.is_fired());
        assert!(signal.fire());
        assert!(!signal.fire());
        assert!(signal.is_fired());
    }

    #[tokio::test]
    async fn test_late_listener_sees_fired() {
        let signal = Signal::new("test");
        signal.fire();

        let mut listener = signal.listener();
        tokio::time::timeout(Duration::from_secs(1), listener.fired())
            .await
            .expect("fired signal should resolve immediately");
    }

    #[tokio::test]
    async fn test_many_waiters_released() {
        let signal = Signal::new("test");
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let mut listener = signal.listener();
                tokio::spawn(async move { listener.fired().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.fire();

        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("waiter should be released")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_dropped_signal_releases_listener() {
        let signal = Signal::new("test");
        let mut listener = signal.listener();
        drop(signal);

        tokio::time::timeout(Duration::from_secs(1), listener.fired())
            .await
            .expect("listener should not hang on a dropped signal");
    }
}
