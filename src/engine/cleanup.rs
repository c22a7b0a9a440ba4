use std::sync::{Arc, Mutex};

use async_trait::async_trait;

/// Resource that has to be released asynchronously
///
/// Stands in for `AsyncDrop`. Implementations must be idempotent: the
/// collector calls `teardown` once, but a drop guard may race it.
#[async_trait]
pub trait AsyncTeardown: Sync + Send {
    async fn teardown(&self);
}

/// Collects [`AsyncTeardown`] values and releases them in reverse order
#[derive(Default)]
pub struct TeardownCollector {
    items: Mutex<Vec<Arc<dyn AsyncTeardown>>>,
}

impl TeardownCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, item: Arc<dyn AsyncTeardown>) {
        if let Ok(mut items) = self.items.lock() {
            items.push(item);
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().map(|i| i.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tear everything down; later calls find nothing left to do
    pub async fn teardown_all(&self) {
        let items = match self.items.lock() {
            Ok(mut items) => std::mem::take(&mut *items),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for item in items.into_iter().rev() {
            item.teardown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        id: u32,
        log: Arc<Mutex<Vec<u32>>>,
    }

    #[async_trait]
    impl AsyncTeardown for Recorder {
        async fn teardown(&self) {
            self.log.lock().unwrap().push(self.id);
        }
    }

    #[tokio::test]
    async fn test_reverse_order_and_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let collector = TeardownCollector::new();
        for id in 1..=3 {
            collector.add(Arc::new(Recorder {
                id,
                log: log.clone(),
            }));
        }
        assert_eq!(collector.len(), 3);
        collector.teardown_all().await;
        collector.teardown_all().await;
        assert_eq!(*log.lock().unwrap(), vec![3, 2, 1]);
        assert!(collector.is_empty());
    }

    #[test]
    fn test_empty_collector() {
        let collector = TeardownCollector::new();
        tokio_test::block_on(collector.teardown_all());
        assert!(collector.is_empty());
    }
}
