//! Per-process bridge state.
//!
//! A [`BridgeRuntime`] owns everything the bridge shares within one context:
//! the token cache, the HTTP client, the namespace counters that assign
//! procedure identities, the memo caches, and either the procedure router
//! (background) or the transport sender (foreground). It is cheap to clone.

mod builder;

pub use builder::BridgeRuntimeBuilder;

use crate::bridge::{Bridged, Callable, ProcedureId, RemoteHandler};
use crate::codec::Codec;
use crate::config::{Context, Role};
use crate::error::Result;
use crate::ipc::{CallSender, ProcedureRouter};
use crate::memo::{MemoCache, Memoized};
use crate::network::ResilientFetch;
use crate::token::TokenCache;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

enum Side {
    Background(Arc<ProcedureRouter>),
    Foreground(Arc<dyn CallSender>),
}

struct RuntimeInner {
    context: Context,
    codec: Codec,
    tokens: Arc<TokenCache>,
    fetch: ResilientFetch,
    side: Side,
    counters: Mutex<HashMap<String, u64>>,
    memo_caches: Mutex<Vec<Arc<MemoCache>>>,
}

/// Shared handle to one context's bridge state.
#[derive(Clone)]
pub struct BridgeRuntime {
    inner: Arc<RuntimeInner>,
}

impl std::fmt::Debug for BridgeRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeRuntime")
            .field("context", &self.inner.context)
            .field("memo_caches", &self.memo_cache_count())
            .finish_non_exhaustive()
    }
}

impl BridgeRuntime {
    pub fn builder(context: Context) -> BridgeRuntimeBuilder {
        BridgeRuntimeBuilder::new(context)
    }

    pub fn context(&self) -> &Context {
        &self.inner.context
    }

    pub fn role(&self) -> Role {
        self.inner.context.role
    }

    pub fn is_background(&self) -> bool {
        matches!(self.inner.side, Side::Background(_))
    }

    pub fn tokens(&self) -> &Arc<TokenCache> {
        &self.inner.tokens
    }

    /// HTTP client sharing this runtime's token cache.
    pub fn fetch(&self) -> &ResilientFetch {
        &self.inner.fetch
    }

    pub fn codec(&self) -> Codec {
        self.inner.codec
    }

    /// The procedure router, in the background only.
    pub fn router(&self) -> Option<&Arc<ProcedureRouter>> {
        match &self.inner.side {
            Side::Background(router) => Some(router),
            Side::Foreground(_) => None,
        }
    }

    /// Assign the next identity in `namespace`. Identities are never reused.
    pub fn next_identity(&self, namespace: &str) -> ProcedureId {
        let mut counters = self
            .inner
            .counters
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let counter = counters.entry(namespace.to_string()).or_insert(0);
        let id = ProcedureId::new(namespace, *counter);
        *counter += 1;
        id
    }

    /// Turn `callable` into a bridged procedure.
    ///
    /// In the background the callable is registered as the handler of a new
    /// identity and runs locally when called. In the foreground the same call
    /// returns a proxy for that identity; the callable itself is dropped.
    pub fn wrap(&self, namespace: &str, callable: impl Callable) -> Result<Bridged> {
        let id = self.next_identity(namespace);

        match &self.inner.side {
            Side::Background(router) => {
                let callable: Arc<dyn Callable> = Arc::new(callable);
                let handler = RemoteHandler::new(
                    id.clone(),
                    callable.clone(),
                    self.inner.tokens.clone(),
                    self.inner.codec,
                );
                router.listen(id.clone(), Arc::new(handler))?;
                Ok(Bridged::local(id, callable))
            }
            Side::Foreground(sender) => Ok(Bridged::proxy(
                id,
                sender.clone(),
                self.inner.tokens.clone(),
                self.inner.codec,
            )),
        }
    }

    /// Cache `callable`'s outcomes by first argument for the life of the
    /// runtime.
    pub fn memoize<C: Callable>(&self, callable: C) -> Memoized<C> {
        let cache = Arc::new(MemoCache::new());
        self.inner
            .memo_caches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(cache.clone());
        Memoized::with_cache(callable, cache)
    }

    /// `memoize(wrap(namespace, callable))`: caching happens on the calling
    /// side, so repeated foreground calls never reach the transport.
    pub fn memoize_bridged(
        &self,
        namespace: &str,
        callable: impl Callable,
    ) -> Result<Memoized<Bridged>> {
        Ok(self.memoize(self.wrap(namespace, callable)?))
    }

    pub fn memo_cache_count(&self) -> usize {
        self.inner
            .memo_caches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Total cached entries across every memo cache.
    pub fn memo_entry_count(&self) -> usize {
        let caches = self
            .inner
            .memo_caches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        caches.iter().map(|cache| cache.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::from_fn;
    use crate::ipc::LocalTransport;
    use crate::value::Value;
    use crate::BridgeError;

    fn noop() -> impl Callable {
        from_fn(|_args: Vec<Value>| async { Ok(Value::Null) })
    }

    #[test]
    fn test_identities_count_per_namespace() {
        let runtime = BridgeRuntime::builder(Context::background()).build().unwrap();

        assert_eq!(runtime.next_identity("a").as_str(), "a.0");
        assert_eq!(runtime.next_identity("a").as_str(), "a.1");
        assert_eq!(runtime.next_identity("b").as_str(), "b.0");
    }

    #[test]
    fn test_background_wrap_registers_handler() {
        let runtime = BridgeRuntime::builder(Context::background()).build().unwrap();
        let first = runtime.wrap("test", noop()).unwrap();
        let second = runtime.wrap("test", noop()).unwrap();

        assert!(first.is_local());
        assert_eq!(first.id().as_str(), "test.0");
        assert_eq!(second.id().as_str(), "test.1");
        assert_eq!(
            runtime.router().unwrap().procedures(),
            vec![ProcedureId::from("test.0"), ProcedureId::from("test.1")]
        );
    }

    #[test]
    fn test_foreground_requires_sender() {
        let result = BridgeRuntime::builder(Context::foreground()).build();
        assert!(matches!(result, Err(BridgeError::Config { .. })));
    }

    #[tokio::test]
    async fn test_background_rejects_sender() {
        let background = BridgeRuntime::builder(Context::background()).build().unwrap();
        let (sender, _handle) = LocalTransport::spawn(&background).unwrap();

        let result = BridgeRuntime::builder(Context::background())
            .with_sender(Arc::new(sender))
            .build();
        assert!(matches!(result, Err(BridgeError::Config { .. })));
    }

    #[tokio::test]
    async fn test_binary_context_needs_binary_sender() {
        struct TextOnly;

        #[async_trait::async_trait]
        impl CallSender for TextOnly {
            async fn send(
                &self,
                _procedure: &ProcedureId,
                _envelope: crate::bridge::CallEnvelope,
            ) -> Result<crate::bridge::CallOutcome> {
                Err(BridgeError::transport("unused"))
            }
        }

        let result = BridgeRuntime::builder(Context::foreground().with_binary_transport(true))
            .with_sender(Arc::new(TextOnly))
            .build();
        assert!(matches!(result, Err(BridgeError::Config { .. })));

        let background = BridgeRuntime::builder(Context::background()).build().unwrap();
        let (sender, _handle) = LocalTransport::spawn(&background).unwrap();
        let binary = BridgeRuntime::builder(Context::foreground().with_binary_transport(true))
            .with_sender(Arc::new(sender))
            .build()
            .unwrap();
        assert!(binary.codec().is_passthrough());
    }

    #[tokio::test]
    async fn test_memo_registry_counts_entries() {
        let runtime = BridgeRuntime::builder(Context::background()).build().unwrap();
        let memo = runtime.memoize_bridged("test", noop()).unwrap();
        let _other = runtime.memoize(noop());

        memo.call(vec![Value::from(1)]).await.unwrap();
        memo.call(vec![Value::from(2)]).await.unwrap();

        assert_eq!(runtime.memo_cache_count(), 2);
        assert_eq!(runtime.memo_entry_count(), 2);
    }
}
