//! BTR Bridge - cross-context call bridge for privileged network calls.
//!
//! A foreground context (UI scripts) cannot hold credentials, so every
//! privileged request runs in a background context. This crate provides the
//! plumbing between the two:
//!
//! - [`Codec`]: encodes values containing blobs, byte buffers and query
//!   parameters for text-only channels
//! - [`TokenCache`] and [`ResilientFetch`]: XSRF token capture and the single
//!   retry after a token rejection
//! - [`BridgeRuntime::wrap`]: registers a function in the background or
//!   returns a proxy in the foreground
//! - [`Memoized`]: per-process caching keyed by the first argument
//! - [`ipc`]: an in-process transport and a framed TCP transport
//!
//! # Example
//!
//! ```rust,ignore
//! use btr_bridge::{from_fn, BridgeRuntime, Callable, Context, LocalTransport, Value};
//! use std::sync::Arc;
//!
//! let background = BridgeRuntime::builder(Context::background()).build()?;
//! background.wrap("math", from_fn(|args: Vec<Value>| async move {
//!     Ok(Value::from(args.len()))
//! }))?;
//!
//! let (sender, _handle) = LocalTransport::spawn(&background)?;
//! let foreground = BridgeRuntime::builder(Context::foreground())
//!     .with_sender(Arc::new(sender))
//!     .build()?;
//! let count = foreground.wrap("math", from_fn(|_| async { Ok(Value::Null) }))?;
//!
//! assert_eq!(count.call(vec![1.into(), 2.into()]).await?, Value::from(2));
//! ```

pub mod bridge;
pub mod codec;
pub mod config;
pub mod error;
pub mod ipc;
pub mod memo;
pub mod network;
pub mod runtime;
pub mod token;
pub mod value;

pub use bridge::{
    from_fn, Bridged, CallEnvelope, CallFuture, CallOutcome, Callable, FnCallable, ProcedureId,
};
pub use codec::{Codec, EncodedValue};
pub use config::{BridgeConfig, Context, IpcConfig, NetworkConfig, Role};
pub use error::{BridgeError, RemoteError, Result};
pub use ipc::{
    CallHandler, CallSender, IpcClient, IpcServer, IpcServerHandle, LocalSender, LocalTransport,
    LocalTransportHandle, ProcedureRouter,
};
pub use memo::{memo_key, MemoCache, Memoized};
pub use network::{RequestBody, RequestOptions, ResilientFetch};
pub use runtime::{BridgeRuntime, BridgeRuntimeBuilder};
pub use token::TokenCache;
pub use value::{Blob, BlobBody, QueryParams, Value};
