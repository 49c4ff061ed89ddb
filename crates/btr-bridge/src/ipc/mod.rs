//! Transports between the foreground and background contexts.
//!
//! The bridge only needs two primitives:
//!
//! - **listen**: the background registers handlers on a [`ProcedureRouter`]
//! - **send**: the foreground delivers one envelope and awaits one outcome
//!   through a [`CallSender`]
//!
//! Request/response correlation belongs to the transport. Two transports are
//! provided:
//!
//! - [`LocalTransport`]: in-process channels; carries structured values
//! - [`IpcServer`] / [`IpcClient`]: length-prefixed JSON over `127.0.0.1` TCP;
//!   text payloads only

pub mod client;
pub mod local;
pub mod protocol;
pub mod router;
pub mod server;

pub use client::IpcClient;
pub use local::{LocalSender, LocalTransport, LocalTransportHandle};
pub use protocol::{WireOutcome, WireRequest, WireResponse};
pub use router::{CallHandler, ProcedureRouter};
pub use server::{IpcServer, IpcServerHandle};

use crate::bridge::{CallEnvelope, CallOutcome, ProcedureId};
use crate::Result;

/// Foreground half of a transport.
#[async_trait::async_trait]
pub trait CallSender: Send + Sync + 'static {
    /// Deliver an envelope to a procedure and wait for its single outcome.
    ///
    /// Fails with a transport error when nothing listens under `procedure`.
    async fn send(&self, procedure: &ProcedureId, envelope: CallEnvelope) -> Result<CallOutcome>;

    /// Whether structured (non-text) payloads survive this transport.
    fn supports_binary(&self) -> bool {
        false
    }
}
