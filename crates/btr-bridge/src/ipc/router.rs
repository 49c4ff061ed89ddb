//! Procedure registry for the background context.

use crate::bridge::{CallEnvelope, CallOutcome, ProcedureId};
use crate::{BridgeError, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Handles envelopes addressed to one procedure.
///
/// Implementations must always produce an outcome.
#[async_trait::async_trait]
pub trait CallHandler: Send + Sync + 'static {
    async fn handle(&self, envelope: CallEnvelope) -> CallOutcome;
}

/// Maps procedure identities to their handlers.
#[derive(Default)]
pub struct ProcedureRouter {
    handlers: RwLock<HashMap<ProcedureId, Arc<dyn CallHandler>>>,
}

impl std::fmt::Debug for ProcedureRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcedureRouter")
            .field("procedures", &self.procedures())
            .finish()
    }
}

impl ProcedureRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Identities are never reused, so a second
    /// registration under the same identity is rejected.
    pub fn listen(&self, procedure: ProcedureId, handler: Arc<dyn CallHandler>) -> Result<()> {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        if handlers.contains_key(&procedure) {
            return Err(BridgeError::Config {
                message: format!("Procedure {} is already registered", procedure),
            });
        }
        debug!("Listening for {}", procedure);
        handlers.insert(procedure, handler);
        Ok(())
    }

    pub fn is_registered(&self, procedure: &ProcedureId) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(procedure)
    }

    /// Registered identities, sorted.
    pub fn procedures(&self) -> Vec<ProcedureId> {
        let mut ids: Vec<_> = self
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Run the handler for `procedure`.
    ///
    /// Returns `None` when nothing is registered under that identity; no
    /// handler is invoked in that case.
    pub async fn dispatch(
        &self,
        procedure: &ProcedureId,
        envelope: CallEnvelope,
    ) -> Option<CallOutcome> {
        let handler = self
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(procedure)
            .cloned();

        match handler {
            Some(handler) => Some(handler.handle(envelope).await),
            None => {
                debug!("No listener for {}", procedure);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::EncodedValue;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait::async_trait]
    impl CallHandler for CountingHandler {
        async fn handle(&self, envelope: CallEnvelope) -> CallOutcome {
            self.0.fetch_add(1, Ordering::SeqCst);
            CallOutcome::Success(envelope.args)
        }
    }

    fn envelope() -> CallEnvelope {
        CallEnvelope {
            args: EncodedValue::Text("[]".into()),
            xsrf: None,
        }
    }

    #[tokio::test]
    async fn test_dispatch_reaches_registered_handler() {
        let router = ProcedureRouter::new();
        let hits = Arc::new(AtomicUsize::new(0));
        router
            .listen("test.0".into(), Arc::new(CountingHandler(hits.clone())))
            .unwrap();

        let outcome = router.dispatch(&"test.0".into(), envelope()).await;
        assert!(outcome.unwrap().is_success());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unmatched_identity_invokes_nothing() {
        let router = ProcedureRouter::new();
        let hits = Arc::new(AtomicUsize::new(0));
        router
            .listen("test.0".into(), Arc::new(CountingHandler(hits.clone())))
            .unwrap();

        assert!(router.dispatch(&"test.1".into(), envelope()).await.is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let router = ProcedureRouter::new();
        let hits = Arc::new(AtomicUsize::new(0));
        router
            .listen("test.0".into(), Arc::new(CountingHandler(hits.clone())))
            .unwrap();

        let result = router.listen("test.0".into(), Arc::new(CountingHandler(hits)));
        assert!(matches!(result, Err(BridgeError::Config { .. })));
        assert_eq!(router.procedures(), vec![ProcedureId::from("test.0")]);
    }
}
