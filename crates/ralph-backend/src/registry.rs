use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::trait_def::Backend;

/// A concurrent name → capability map, matching the teacher's
/// `ProviderRegistry` shape. Every method is safe to call on an empty
/// registry. Registering a name that already exists replaces it.
#[derive(Default)]
pub struct BackendRegistry {
    backends: RwLock<HashMap<String, Arc<dyn Backend>>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        BackendRegistry {
            backends: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, backend: Arc<dyn Backend>) {
        let name = backend.name().to_string();
        self.backends.write().await.insert(name, backend);
    }

    pub async fn unregister(&self, name: &str) {
        self.backends.write().await.remove(name);
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Backend>> {
        self.backends.read().await.get(name).cloned()
    }

    pub async fn names(&self) -> Vec<String> {
        self.backends.read().await.keys().cloned().collect()
    }

    /// The subset of registered backends whose `available()` currently
    /// returns true.
    pub async fn available(&self) -> Vec<Arc<dyn Backend>> {
        self.backends
            .read()
            .await
            .values()
            .filter(|b| b.available())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ralph_types::{BackendResult, Request};
    use tokio_util::sync::CancellationToken;

    use crate::error::BackendError;

    struct Stub(&'static str, bool);

    #[async_trait]
    impl Backend for Stub {
        fn name(&self) -> &str {
            self.0
        }
        async fn execute(
            &self,
            _cancel: CancellationToken,
            _request: Request,
        ) -> Result<BackendResult, BackendError> {
            unimplemented!()
        }
        fn available(&self) -> bool {
            self.1
        }
    }

    #[tokio::test]
    async fn empty_registry_is_safe() {
        let reg = BackendRegistry::new();
        assert!(reg.get("nope").await.is_none());
        assert!(reg.available().await.is_empty());
        assert!(reg.names().await.is_empty());
    }

    #[tokio::test]
    async fn register_replaces_by_name() {
        let reg = BackendRegistry::new();
        reg.register(Arc::new(Stub("claude", true))).await;
        reg.register(Arc::new(Stub("claude", false))).await;
        assert_eq!(reg.names().await, vec!["claude".to_string()]);
        assert!(!reg.get("claude").await.unwrap().available());
    }

    #[tokio::test]
    async fn available_filters_on_liveness() {
        let reg = BackendRegistry::new();
        reg.register(Arc::new(Stub("a", true))).await;
        reg.register(Arc::new(Stub("b", false))).await;
        let available = reg.available().await;
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].name(), "a");
    }
}
