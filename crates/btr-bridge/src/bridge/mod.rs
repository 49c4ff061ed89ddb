//! Cross-context call bridge.
//!
//! [`BridgeRuntime::wrap`](crate::BridgeRuntime::wrap) turns a [`Callable`]
//! into a [`Bridged`] procedure. Both contexts wrap the same functions in the
//! same order, so identities assigned on each side line up:
//!
//! ```text
//! foreground                         background
//! ----------                         ----------
//! Bridged::call(args)
//!   encode args ──CallEnvelope──────▶ RemoteHandler
//!                                       observe xsrf
//!                                       decode, call, encode
//!   decode      ◀──CallOutcome─────── Success | Failure
//! ```

mod envelope;
mod procedure;
mod wrap;

pub use envelope::{CallEnvelope, CallOutcome};
pub use procedure::{from_fn, CallFuture, Callable, FnCallable, ProcedureId};
pub use wrap::Bridged;

pub(crate) use wrap::RemoteHandler;
