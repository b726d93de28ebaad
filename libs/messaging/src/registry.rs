//! Registry of available messaging backends
//!
//! Factories come and go at runtime. The registry resolves them by type name
//! and tells listeners about every change. A listener that fails (or
//! panics) is logged and skipped; the others are still notified.
//!
//! Listeners are held weakly so that a client listening to the registry it
//! was built from does not keep itself alive.

use crate::{ClientFactory, FactoryListener};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

#[derive(Clone, Copy)]
enum Change {
    Added,
    Removed,
}

#[derive(Default)]
pub struct FactoryRegistry {
    factories: RwLock<HashMap<String, Arc<dyn ClientFactory>>>,
    listeners: Mutex<Vec<Weak<dyn FactoryListener>>>,
}

impl std::fmt::Debug for FactoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryRegistry")
            .field("factories", &self.type_names())
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory
    ///
    /// Returns `false` and changes nothing if a factory with the same type
    /// name is already registered.
    pub async fn register(&self, factory: Arc<dyn ClientFactory>) -> bool {
        let type_name = factory.type_name().to_string();
        {
            let mut factories = self.factories.write();
            if factories.contains_key(&type_name) {
                tracing::warn!(
                    "Messaging factory '{}' is already registered, ignoring",
                    type_name
                );
                return false;
            }
            factories.insert(type_name.clone(), factory.clone());
        }

        tracing::info!("Registered messaging factory '{}'", type_name);
        self.notify(Change::Added, factory).await;
        true
    }

    /// Unregister a factory
    ///
    /// Returns `false` if this exact factory was never registered.
    pub async fn unregister(&self, factory: &Arc<dyn ClientFactory>) -> bool {
        let removed = {
            let mut factories = self.factories.write();
            match factories.get(factory.type_name()) {
                Some(current) if same_factory(current, factory) => {
                    factories.remove(factory.type_name())
                }
                _ => None,
            }
        };

        match removed {
            Some(removed) => {
                tracing::info!("Unregistered messaging factory '{}'", removed.type_name());
                self.notify(Change::Removed, removed).await;
                true
            }
            None => false,
        }
    }

    /// Look up a factory by type name
    pub fn lookup(&self, type_name: &str) -> Option<Arc<dyn ClientFactory>> {
        self.factories.read().get(type_name).cloned()
    }

    /// Get all registered type names, sorted
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn factory_count(&self) -> usize {
        self.factories.read().len()
    }

    pub fn add_listener(&self, listener: Weak<dyn FactoryListener>) {
        self.listeners.lock().push(listener);
    }

    /// Number of listeners still alive
    pub fn listener_count(&self) -> usize {
        let mut listeners = self.listeners.lock();
        listeners.retain(|l| l.strong_count() > 0);
        listeners.len()
    }

    async fn notify(&self, change: Change, factory: Arc<dyn ClientFactory>) {
        let listeners: Vec<Arc<dyn FactoryListener>> = {
            let mut listeners = self.listeners.lock();
            listeners.retain(|l| l.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };

        for listener in listeners {
            let notification = async {
                match change {
                    Change::Added => listener.factory_added(factory.clone()).await,
                    Change::Removed => listener.factory_removed(factory.clone()).await,
                }
            };

            match AssertUnwindSafe(notification).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(
                    "Factory listener failed on '{}': {}",
                    factory.type_name(),
                    e
                ),
                Err(_) => tracing::error!(
                    "Factory listener panicked on '{}'",
                    factory.type_name()
                ),
            }
        }
    }
}

fn same_factory(a: &Arc<dyn ClientFactory>, b: &Arc<dyn ClientFactory>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::RecordingFactory;
    use crate::MessagingError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingListener {
        added: AtomicUsize,
        removed: AtomicUsize,
    }

    #[async_trait]
    impl FactoryListener for CountingListener {
        async fn factory_added(&self, _: Arc<dyn ClientFactory>) -> Result<(), MessagingError> {
            self.added.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn factory_removed(
            &self,
            _: Arc<dyn ClientFactory>,
        ) -> Result<(), MessagingError> {
            self.removed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct BrokenListener;

    #[async_trait]
    impl FactoryListener for BrokenListener {
        async fn factory_added(&self, _: Arc<dyn ClientFactory>) -> Result<(), MessagingError> {
            Err(MessagingError::handler("listener is broken"))
        }

        async fn factory_removed(
            &self,
            _: Arc<dyn ClientFactory>,
        ) -> Result<(), MessagingError> {
            panic!("listener panics on removal");
        }
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = FactoryRegistry::new();
        let factory: Arc<dyn ClientFactory> = Arc::new(RecordingFactory::new("test"));

        assert!(registry.lookup("test").is_none());
        assert!(registry.register(factory.clone()).await);
        assert!(registry.lookup("test").is_some());
        assert_eq!(registry.type_names(), vec!["test".to_string()]);
    }

    #[tokio::test]
    async fn test_duplicate_type_name_is_rejected() {
        let registry = FactoryRegistry::new();
        let first: Arc<dyn ClientFactory> = Arc::new(RecordingFactory::new("test"));
        let second: Arc<dyn ClientFactory> = Arc::new(RecordingFactory::new("test"));

        assert!(registry.register(first.clone()).await);
        assert!(!registry.register(second.clone()).await);
        assert_eq!(registry.factory_count(), 1);

        let resolved = registry.lookup("test").unwrap();
        assert!(same_factory(&resolved, &first));

        // The rejected duplicate cannot unregister the original
        assert!(!registry.unregister(&second).await);
        assert!(registry.lookup("test").is_some());
    }

    #[tokio::test]
    async fn test_unregister_unknown_factory() {
        let registry = FactoryRegistry::new();
        let factory: Arc<dyn ClientFactory> = Arc::new(RecordingFactory::new("test"));

        assert!(!registry.unregister(&factory).await);
        assert!(registry.register(factory.clone()).await);
        assert!(registry.unregister(&factory).await);
        assert!(!registry.unregister(&factory).await);
        assert!(registry.lookup("test").is_none());
    }

    #[tokio::test]
    async fn test_listener_failures_are_isolated() {
        let registry = FactoryRegistry::new();
        let broken: Arc<dyn FactoryListener> = Arc::new(BrokenListener);
        let counting = Arc::new(CountingListener::default());
        let counting_dyn: Arc<dyn FactoryListener> = counting.clone();

        registry.add_listener(Arc::downgrade(&broken));
        registry.add_listener(Arc::downgrade(&counting_dyn));

        let factory: Arc<dyn ClientFactory> = Arc::new(RecordingFactory::new("test"));
        assert!(registry.register(factory.clone()).await);
        assert!(registry.unregister(&factory).await);

        assert_eq!(counting.added.load(Ordering::SeqCst), 1);
        assert_eq!(counting.removed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropped_listeners_are_pruned() {
        let registry = FactoryRegistry::new();
        {
            let listener: Arc<dyn FactoryListener> = Arc::new(CountingListener::default());
            registry.add_listener(Arc::downgrade(&listener));
            assert_eq!(registry.listener_count(), 1);
        }
        assert_eq!(registry.listener_count(), 0);

        let factory: Arc<dyn ClientFactory> = Arc::new(RecordingFactory::new("test"));
        assert!(registry.register(factory).await);
    }
}
