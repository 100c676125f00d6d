//! Connected subscriber registry.

use crate::session::Subscriber;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Tracks every connected subscriber.
///
/// The lock guards only map operations and is released before any I/O.
#[derive(Default)]
pub struct Registry {
    subscribers: Mutex<HashMap<Uuid, Arc<Subscriber>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, subscriber: Arc<Subscriber>) {
        self.subscribers.lock().insert(subscriber.id(), subscriber);
    }

    pub fn remove(&self, id: &Uuid) -> Option<Arc<Subscriber>> {
        self.subscribers.lock().remove(id)
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<Subscriber>> {
        self.subscribers.lock().get(id).cloned()
    }

    /// Snapshot of the subscribers with data transmission on.
    pub fn streaming_subscribers(&self) -> Vec<Arc<Subscriber>> {
        self.subscribers
            .lock()
            .values()
            .filter(|s| s.is_streaming() && !s.is_closed())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.lock().is_empty()
    }

    pub fn streaming_count(&self) -> usize {
        self.subscribers
            .lock()
            .values()
            .filter(|s| s.is_streaming())
            .count()
    }

    /// Removes and closes every subscriber. Returns how many were closed.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<_> = self.subscribers.lock().drain().map(|(_, s)| s).collect();
        let count = drained.len();
        for subscriber in drained {
            subscriber.close().await;
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SubscriberState;

    fn subscriber(port: u16) -> Arc<Subscriber> {
        let peer = format!("127.0.0.1:{}", port).parse().unwrap();
        Arc::new(Subscriber::new(peer, Box::new(tokio::io::sink())))
    }

    #[test]
    fn test_add_get_remove() {
        let registry = Registry::new();
        assert!(registry.is_empty());

        let sub = subscriber(1000);
        let id = sub.id();
        registry.add(sub);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&id).unwrap().peer().port(), 1000);

        assert!(registry.remove(&id).is_some());
        assert!(registry.remove(&id).is_none());
        assert!(registry.get(&id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_streaming_snapshot() {
        let registry = Registry::new();
        let subs: Vec<_> = (0..4).map(|i| subscriber(2000 + i)).collect();
        for sub in &subs {
            registry.add(sub.clone());
        }
        subs[1].set_streaming(true);
        subs[3].set_streaming(true);

        let mut ports: Vec<_> = registry
            .streaming_subscribers()
            .iter()
            .map(|s| s.peer().port())
            .collect();
        ports.sort();
        assert_eq!(ports, vec![2001, 2003]);
        assert_eq!(registry.streaming_count(), 2);

        // The snapshot is detached from later toggles
        let snapshot = registry.streaming_subscribers();
        subs[1].set_streaming(false);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.streaming_count(), 1);
    }

    #[tokio::test]
    async fn test_close_all() {
        let registry = Registry::new();
        let subs: Vec<_> = (0..3).map(|i| subscriber(3000 + i)).collect();
        for sub in &subs {
            sub.set_streaming(true);
            registry.add(sub.clone());
        }

        assert_eq!(registry.close_all().await, 3);
        assert!(registry.is_empty());
        for sub in &subs {
            assert_eq!(sub.state(), SubscriberState::Closed);
        }
        assert_eq!(registry.close_all().await, 0);
    }
}
