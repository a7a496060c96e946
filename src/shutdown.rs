// src/shutdown.rs
//! Process-wide cancellation built on `tokio::sync::watch`.

use tokio::sync::watch;

/// Owner side: flips the flag once.
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

/// Observer side, cheap to clone into every task.
#[derive(Clone, Debug)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        // no receivers left is fine
        let _ = self.tx.send(true);
    }

    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }
}

impl Shutdown {
    /// A signal that never fires.
    pub fn never() -> Self {
        channel().1
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been triggered. If the trigger is dropped
    /// without firing, this never resolves.
    pub async fn wait(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_returns_after_trigger() {
        let (trigger, mut sd) = channel();
        assert!(!sd.is_triggered());
        let handle = tokio::spawn(async move {
            sd.wait().await;
            sd.is_triggered()
        });
        trigger.trigger();
        assert!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn never_does_not_fire() {
        let mut sd = Shutdown::never();
        let r = tokio::time::timeout(Duration::from_millis(20), sd.wait()).await;
        assert!(r.is_err());
        assert!(!sd.is_triggered());
    }

    #[tokio::test]
    async fn late_subscribers_see_the_flag() {
        let (trigger, _sd) = channel();
        trigger.trigger();
        let mut late = trigger.subscribe();
        assert!(late.is_triggered());
        late.wait().await;
    }
}
