//! First-argument memoization.
//!
//! Each [`Memoized`] wrapper owns one [`MemoCache`]. The cache stores a
//! shared future per key, so concurrent first calls with the same key all
//! await the one underlying call. The underlying call runs as its own task
//! and finishes even when every caller stops waiting. Outcomes are kept for
//! the life of the process, failures included.

use crate::bridge::{CallFuture, Callable};
use crate::value::Value;
use crate::BridgeError;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::task::JoinError;
use tracing::{debug, warn};

type SharedOutcome = Shared<BoxFuture<'static, Result<Value, Arc<BridgeError>>>>;

/// Cache key for an argument list.
///
/// The first argument's canonical string, or `"undefined"` when there is
/// none. Values with the same string form share a slot, so `5` and `"5"`
/// collide.
pub fn memo_key(args: &[Value]) -> String {
    args.first()
        .map(Value::canonical_string)
        .unwrap_or_else(|| "undefined".to_string())
}

/// Key to outcome map behind one memoized function.
#[derive(Default)]
pub struct MemoCache {
    entries: Mutex<HashMap<String, SharedOutcome>>,
}

impl std::fmt::Debug for MemoCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoCache")
            .field("len", &self.len())
            .finish()
    }
}

impl MemoCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(key)
    }

    fn get_or_start(&self, key: String, start: impl FnOnce() -> CallFuture) -> SharedOutcome {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .entry(key)
            .or_insert_with_key(|key| {
                debug!("Memo miss for {:?}", key);
                dispatch(start())
            })
            .clone()
    }
}

/// Spawn the call now when a runtime is current, otherwise on first poll.
fn dispatch(call: CallFuture) -> SharedOutcome {
    let outcome: BoxFuture<'static, Result<Value, Arc<BridgeError>>> = match Handle::try_current()
    {
        Ok(handle) => {
            let task = handle.spawn(call);
            async move { joined(task.await) }.boxed()
        }
        Err(_) => async move { joined(tokio::spawn(call).await) }.boxed(),
    };
    outcome.shared()
}

fn joined(
    result: std::result::Result<crate::Result<Value>, JoinError>,
) -> Result<Value, Arc<BridgeError>> {
    match result {
        Ok(outcome) => outcome.map_err(Arc::new),
        Err(e) => {
            warn!("Memoized call did not complete: {}", e);
            let message = if e.is_panic() {
                "Memoized call panicked".to_string()
            } else {
                format!("Memoized call was cancelled: {}", e)
            };
            Err(Arc::new(BridgeError::Other(message)))
        }
    }
}

/// A callable whose outcomes are cached by first argument.
pub struct Memoized<C> {
    inner: C,
    cache: Arc<MemoCache>,
}

impl<C: Callable> Memoized<C> {
    pub fn new(inner: C) -> Self {
        Self::with_cache(inner, Arc::new(MemoCache::new()))
    }

    pub(crate) fn with_cache(inner: C, cache: Arc<MemoCache>) -> Self {
        Self { inner, cache }
    }

    pub fn cache(&self) -> &Arc<MemoCache> {
        &self.cache
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

impl<C: Clone> Clone for Memoized<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            cache: self.cache.clone(),
        }
    }
}

impl<C> std::fmt::Debug for Memoized<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memoized")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl<C: Callable> Callable for Memoized<C> {
    fn call(&self, args: Vec<Value>) -> CallFuture {
        let key = memo_key(&args);
        let outcome = self.cache.get_or_start(key, || self.inner.call(args));
        async move { outcome.await.map_err(BridgeError::Shared) }.boxed()
    }
}
