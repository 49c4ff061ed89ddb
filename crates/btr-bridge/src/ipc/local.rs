//! In-process transport.
//!
//! Each request carries its own `oneshot` reply slot, which is how
//! concurrent calls are kept apart. When no procedure matches, the slot is
//! dropped unanswered and the sender sees a transport error.

use super::router::ProcedureRouter;
use super::CallSender;
use crate::bridge::{CallEnvelope, CallOutcome, ProcedureId};
use crate::runtime::BridgeRuntime;
use crate::{BridgeError, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

struct LocalRequest {
    procedure: ProcedureId,
    envelope: CallEnvelope,
    reply: oneshot::Sender<CallOutcome>,
}

/// Foreground end of a local transport.
#[derive(Clone)]
pub struct LocalSender {
    tx: mpsc::UnboundedSender<LocalRequest>,
}

impl std::fmt::Debug for LocalSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSender")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

#[async_trait::async_trait]
impl CallSender for LocalSender {
    async fn send(&self, procedure: &ProcedureId, envelope: CallEnvelope) -> Result<CallOutcome> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(LocalRequest {
                procedure: procedure.clone(),
                envelope,
                reply,
            })
            .map_err(|_| BridgeError::transport("Local transport is closed"))?;

        response.await.map_err(|_| {
            BridgeError::transport(format!("No response from procedure {}", procedure))
        })
    }

    fn supports_binary(&self) -> bool {
        true
    }
}

/// Handle to the serving task. Dropping stops the transport.
pub struct LocalTransportHandle {
    task: Option<tokio::task::JoinHandle<()>>,
}

impl LocalTransportHandle {
    pub fn shutdown(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for LocalTransportHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// In-process transport between two runtimes.
pub struct LocalTransport;

impl LocalTransport {
    /// Serve a background runtime's procedures over an in-process channel.
    ///
    /// Procedures registered after this call are served as well.
    pub fn spawn(runtime: &BridgeRuntime) -> Result<(LocalSender, LocalTransportHandle)> {
        let router = runtime.router().cloned().ok_or_else(|| BridgeError::Config {
            message: "Only a background runtime can serve procedures".to_string(),
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(Self::serve(router, rx));

        Ok((LocalSender { tx }, LocalTransportHandle { task: Some(task) }))
    }

    async fn serve(router: Arc<ProcedureRouter>, mut rx: mpsc::UnboundedReceiver<LocalRequest>) {
        while let Some(request) = rx.recv().await {
            let router = router.clone();
            tokio::spawn(async move {
                if let Some(outcome) = router.dispatch(&request.procedure, request.envelope).await {
                    if request.reply.send(outcome).is_err() {
                        debug!("Caller of {} went away before the reply", request.procedure);
                    }
                }
            });
        }
        debug!("Local transport stopped");
    }
}
