//! Activation-wide wake-up signal
//!
//! Every task of an activation shares one [`Coordinator`]. Publishing a
//! variable, finishing a node or instance, and aborting the activation all
//! broadcast on it; waiters re-check their own predicate after every wake-up,
//! since one signal serves many unrelated predicates.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

/// Broadcast signal plus the activation's abort flag
#[derive(Debug)]
pub struct Coordinator {
    generation: watch::Sender<u64>,
    aborted: AtomicBool,
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl Coordinator {
    /// Create a coordinator
    pub fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            generation,
            aborted: AtomicBool::new(false),
        }
    }

    /// Wake every waiter
    pub fn notify(&self) {
        self.generation.send_modify(|g| *g = g.wrapping_add(1));
    }

    /// Release all current and future waiters
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        self.notify();
    }

    /// Whether the activation was aborted
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Wait until `probe` yields a value
    ///
    /// Gives up once `finished` holds or the activation is aborted, after one
    /// last probe so a value published right before finishing is not missed.
    pub async fn wait_for<T>(
        &self,
        probe: impl Fn() -> Option<T>,
        finished: impl Fn() -> bool,
    ) -> Option<T> {
        // Subscribe before probing so a notification between the probe and
        // the wait is not lost.
        let mut changes = self.generation.subscribe();
        loop {
            if let Some(value) = probe() {
                return Some(value);
            }
            if finished() || self.is_aborted() {
                return probe();
            }
            if changes.changed().await.is_err() {
                return probe();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_returns_published_value() {
        let coordinator = Arc::new(Coordinator::new());
        let value = Arc::new(std::sync::Mutex::new(None::<String>));

        let waiter = {
            let coordinator = Arc::clone(&coordinator);
            let value = Arc::clone(&value);
            tokio::spawn(async move {
                coordinator
                    .wait_for(|| value.lock().unwrap().clone(), || false)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        *value.lock().unwrap() = Some("ready".to_string());
        coordinator.notify();

        assert_eq!(waiter.await.unwrap().as_deref(), Some("ready"));
    }

    #[tokio::test]
    async fn test_abort_releases_waiters() {
        let coordinator = Arc::new(Coordinator::new());

        let waiter = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.wait_for(|| None::<u32>, || false).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        coordinator.abort();

        let result = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, None);
    }
}
