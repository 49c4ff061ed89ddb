//! Callables and procedure identities.

use crate::config::BridgeConfig;
use crate::value::Value;
use crate::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Future returned by every [`Callable`].
pub type CallFuture = BoxFuture<'static, Result<Value>>;

/// An async function over bridge values.
///
/// Implemented by plain functions (through [`from_fn`]), by [`Bridged`]
/// procedures and by [`Memoized`] wrappers, so they compose freely.
///
/// [`Bridged`]: super::Bridged
/// [`Memoized`]: crate::memo::Memoized
pub trait Callable: Send + Sync + 'static {
    fn call(&self, args: Vec<Value>) -> CallFuture;
}

impl<C: Callable + ?Sized> Callable for Arc<C> {
    fn call(&self, args: Vec<Value>) -> CallFuture {
        (**self).call(args)
    }
}

impl<C: Callable + ?Sized> Callable for Box<C> {
    fn call(&self, args: Vec<Value>) -> CallFuture {
        (**self).call(args)
    }
}

/// A closure adapted into a [`Callable`].
#[derive(Clone)]
pub struct FnCallable<F> {
    f: F,
}

impl<F> fmt::Debug for FnCallable<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnCallable").finish_non_exhaustive()
    }
}

/// Adapt an async closure taking the argument list.
///
/// ```rust,ignore
/// use btr_bridge::{from_fn, Value};
///
/// let add = from_fn(|args: Vec<Value>| async move {
///     let a = args.first().and_then(Value::as_i64).unwrap_or(0);
///     let b = args.get(1).and_then(Value::as_i64).unwrap_or(0);
///     Ok(Value::from(a + b))
/// });
/// ```
pub fn from_fn<F, Fut>(f: F) -> FnCallable<F>
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    FnCallable { f }
}

impl<F, Fut> Callable for FnCallable<F>
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    fn call(&self, args: Vec<Value>) -> CallFuture {
        (self.f)(args).boxed()
    }
}

/// Unique identity of a registered procedure: `"<namespace>.<counter>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcedureId(String);

impl ProcedureId {
    pub fn new(namespace: &str, counter: u64) -> Self {
        Self(format!(
            "{}{}{}",
            namespace,
            BridgeConfig::IDENTITY_SEPARATOR,
            counter
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProcedureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProcedureId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ProcedureId {
    fn from(id: String) -> Self {
        Self(id)
    }
}
