//! The dual-persona wrapped function.

use super::envelope::{CallEnvelope, CallOutcome};
use super::procedure::{CallFuture, Callable, ProcedureId};
use crate::codec::{Codec, EncodedValue};
use crate::error::RemoteError;
use crate::ipc::{CallHandler, CallSender};
use crate::token::TokenCache;
use crate::value::Value;
use crate::{BridgeError, Result};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
enum Persona {
    Local(Arc<dyn Callable>),
    Proxy {
        sender: Arc<dyn CallSender>,
        tokens: Arc<TokenCache>,
        codec: Codec,
    },
}

/// A function registered with [`BridgeRuntime::wrap`](crate::BridgeRuntime::wrap).
///
/// In the background it runs the wrapped function directly; in the
/// foreground it forwards the call to the background under its identity.
#[derive(Clone)]
pub struct Bridged {
    id: ProcedureId,
    persona: Persona,
}

impl std::fmt::Debug for Bridged {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridged")
            .field("id", &self.id)
            .field("local", &self.is_local())
            .finish()
    }
}

impl Bridged {
    pub(crate) fn local(id: ProcedureId, callable: Arc<dyn Callable>) -> Self {
        Self {
            id,
            persona: Persona::Local(callable),
        }
    }

    pub(crate) fn proxy(
        id: ProcedureId,
        sender: Arc<dyn CallSender>,
        tokens: Arc<TokenCache>,
        codec: Codec,
    ) -> Self {
        Self {
            id,
            persona: Persona::Proxy {
                sender,
                tokens,
                codec,
            },
        }
    }

    pub fn id(&self) -> &ProcedureId {
        &self.id
    }

    /// Whether calls run in this process.
    pub fn is_local(&self) -> bool {
        matches!(self.persona, Persona::Local(_))
    }
}

impl Callable for Bridged {
    fn call(&self, args: Vec<Value>) -> CallFuture {
        match &self.persona {
            Persona::Local(callable) => callable.call(args),
            Persona::Proxy {
                sender,
                tokens,
                codec,
            } => {
                let id = self.id.clone();
                let sender = sender.clone();
                let tokens = tokens.clone();
                let codec = *codec;
                async move {
                    let envelope = CallEnvelope {
                        args: codec.encode(Value::Array(args)).await?,
                        xsrf: tokens.current(),
                    };
                    match sender.send(&id, envelope).await? {
                        CallOutcome::Success(result) => codec.decode(result),
                        CallOutcome::Failure(remote) => Err(BridgeError::Remote(remote)),
                    }
                }
                .boxed()
            }
        }
    }
}

/// Background handler for one wrapped function.
pub(crate) struct RemoteHandler {
    id: ProcedureId,
    callable: Arc<dyn Callable>,
    tokens: Arc<TokenCache>,
    codec: Codec,
}

impl RemoteHandler {
    pub(crate) fn new(
        id: ProcedureId,
        callable: Arc<dyn Callable>,
        tokens: Arc<TokenCache>,
        codec: Codec,
    ) -> Self {
        Self {
            id,
            callable,
            tokens,
            codec,
        }
    }

    async fn run(&self, args: EncodedValue) -> Result<EncodedValue> {
        let args = match self.codec.decode(args)? {
            Value::Array(args) => args,
            other => {
                return Err(BridgeError::parse(format!(
                    "Expected an argument list, got {}",
                    other.canonical_string()
                )))
            }
        };

        let callable = &self.callable;
        let future = std::panic::catch_unwind(AssertUnwindSafe(|| callable.call(args)))
            .map_err(panic_error)?;
        let result = AssertUnwindSafe(future)
            .catch_unwind()
            .await
            .map_err(panic_error)??;

        self.codec.encode(result).await
    }
}

#[async_trait::async_trait]
impl CallHandler for RemoteHandler {
    async fn handle(&self, envelope: CallEnvelope) -> CallOutcome {
        if let Some(token) = envelope.xsrf.as_deref() {
            self.tokens.observe_token(token);
        }

        match self.run(envelope.args).await {
            Ok(result) => {
                debug!("{} succeeded", self.id);
                CallOutcome::Success(result)
            }
            Err(e) => {
                warn!("{} failed: {}", self.id, e);
                CallOutcome::Failure(RemoteError::new(e.to_string()))
            }
        }
    }
}

fn panic_error(payload: Box<dyn Any + Send>) -> BridgeError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "procedure panicked".to_string());
    BridgeError::Other(message)
}
