//! Image-load deduplication
//!
//! Each distinct image name is pulled at most once per activation. The first
//! requester performs the pull; concurrent requesters for the same name wait
//! for it and observe the same outcome.

use crate::driver::ContainerDriver;
use crate::error::{Result, StevedoreError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;
use tracing::info;

/// Load state of one image
#[derive(Debug)]
pub struct ImageLoad {
    name: String,
    outcome: OnceCell<std::result::Result<(), String>>,
}

impl ImageLoad {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            outcome: OnceCell::new(),
        }
    }

    /// Image name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the load has finished
    pub fn is_complete(&self) -> bool {
        self.outcome.initialized()
    }

    /// Error of a finished load
    pub fn error(&self) -> Option<&str> {
        match self.outcome.get() {
            Some(Err(message)) => Some(message),
            _ => None,
        }
    }
}

/// Per-activation map from image name to its load
#[derive(Debug, Default)]
pub struct ImageCache {
    entries: Mutex<HashMap<String, Arc<ImageLoad>>>,
}

impl ImageCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Load an image, sharing the pull with concurrent requesters
    pub async fn load(&self, driver: &dyn ContainerDriver, name: &str) -> Result<()> {
        let entry = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(
                entries
                    .entry(name.to_string())
                    .or_insert_with(|| Arc::new(ImageLoad::new(name))),
            )
        };

        let outcome = entry
            .outcome
            .get_or_init(|| async {
                info!("Loading image {}", name);
                driver.pull(name).await.map_err(|e| e.to_string())
            })
            .await;

        outcome.clone().map_err(|message| StevedoreError::ImageLoad {
            image: name.to_string(),
            message,
        })
    }

    /// Snapshot of a load, if the image was requested
    pub fn get(&self, name: &str) -> Option<Arc<ImageLoad>> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::MockDriver;
    use std::time::Duration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_concurrent_loads_pull_once() {
        let temp = tempdir().unwrap();
        let driver = Arc::new(MockDriver::new(temp.path()).pull_delay(Duration::from_millis(50)));
        let cache = Arc::new(ImageCache::new());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let driver = Arc::clone(&driver);
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                cache.load(driver.as_ref(), "busybox").await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(driver.count("pull busybox"), 1);
        assert!(cache.get("busybox").unwrap().is_complete());
    }

    #[tokio::test]
    async fn test_failed_load_is_shared() {
        let temp = tempdir().unwrap();
        let driver = Arc::new(
            MockDriver::new(temp.path())
                .pull_delay(Duration::from_millis(20))
                .failing_image("missing:1"),
        );
        let cache = Arc::new(ImageCache::new());

        let mut handles = Vec::new();
        for _ in 0..4 {
            let driver = Arc::clone(&driver);
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                cache.load(driver.as_ref(), "missing:1").await
            }));
        }

        let mut messages = Vec::new();
        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            messages.push(err.to_string());
        }

        assert_eq!(driver.count("pull missing:1"), 1);
        assert!(messages.iter().all(|m| m == &messages[0]));
        assert!(cache.get("missing:1").unwrap().error().is_some());
    }

    #[tokio::test]
    async fn test_distinct_images_pull_separately() {
        let temp = tempdir().unwrap();
        let driver = MockDriver::new(temp.path());
        let cache = ImageCache::new();

        cache.load(&driver, "alpine").await.unwrap();
        cache.load(&driver, "busybox").await.unwrap();
        cache.load(&driver, "alpine").await.unwrap();

        assert_eq!(driver.count("pull "), 2);
    }
}
