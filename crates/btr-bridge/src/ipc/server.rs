//! TCP server for the background context.
//!
//! Listens on `127.0.0.1` (OS-assigned port unless one is given), accepts
//! foreground connections, and dispatches each request frame to the
//! runtime's procedure router.
//!
//! # Thread Safety
//!
//! Each connection is handled in its own spawned task, and each request on a
//! connection runs in its own task. Responses carry the request id and may
//! arrive out of order.

use super::protocol::{read_frame, write_frame, WireOutcome, WireRequest, WireResponse};
use super::router::ProcedureRouter;
use crate::config::IpcConfig;
use crate::runtime::BridgeRuntime;
use crate::{BridgeError, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

/// Counter bounding the number of open connections.
#[derive(Clone)]
struct ConnectionSlots {
    active: Arc<AtomicUsize>,
    max: usize,
}

/// An occupied slot; released on drop.
struct ConnectionSlot {
    active: Arc<AtomicUsize>,
}

impl ConnectionSlots {
    fn new(max: usize) -> Self {
        Self {
            active: Arc::new(AtomicUsize::new(0)),
            max,
        }
    }

    fn try_acquire(&self) -> Option<ConnectionSlot> {
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max).then_some(n + 1)
            })
            .ok()
            .map(|_| ConnectionSlot {
                active: self.active.clone(),
            })
    }

    fn in_use(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Handle to a running IPC server. Dropping shuts down the server.
pub struct IpcServerHandle {
    pub addr: SocketAddr,
    pub port: u16,
    shutdown_tx: Option<oneshot::Sender<()>>,
    conn_shutdown_tx: watch::Sender<bool>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl IpcServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections and close the active ones.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.conn_shutdown_tx.send(true);
    }
}

impl Drop for IpcServerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

/// IPC server exposing a background runtime's procedures.
pub struct IpcServer;

impl IpcServer {
    /// Start on a random local port.
    pub async fn start(runtime: &BridgeRuntime) -> Result<IpcServerHandle> {
        Self::start_on(runtime, "127.0.0.1:0").await
    }

    /// Start on an explicit address.
    ///
    /// The runtime must be a background runtime encoding to text, since
    /// frames only carry text payloads.
    pub async fn start_on(runtime: &BridgeRuntime, addr: &str) -> Result<IpcServerHandle> {
        let router = runtime.router().cloned().ok_or_else(|| BridgeError::Config {
            message: "Only a background runtime can serve procedures".to_string(),
        })?;
        if runtime.context().transport_supports_binary {
            return Err(BridgeError::Config {
                message: "TCP transport carries text payloads only".to_string(),
            });
        }

        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let port = addr.port();

        info!("IPC server listening on {}", addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (conn_shutdown_tx, conn_shutdown_rx) = watch::channel(false);
        let slots = ConnectionSlots::new(IpcConfig::MAX_CONNECTIONS);

        let task_handle = tokio::spawn(Self::accept_loop(
            listener,
            router,
            shutdown_rx,
            conn_shutdown_rx,
            slots,
        ));

        Ok(IpcServerHandle {
            addr,
            port,
            shutdown_tx: Some(shutdown_tx),
            conn_shutdown_tx,
            task_handle: Some(task_handle),
        })
    }

    async fn accept_loop(
        listener: TcpListener,
        router: Arc<ProcedureRouter>,
        mut shutdown_rx: oneshot::Receiver<()>,
        conn_shutdown_rx: watch::Receiver<bool>,
        slots: ConnectionSlots,
    ) {
        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("IPC server shutting down");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("IPC accept error: {}", e);
                        continue;
                    }
                },
            };

            let Some(slot) = slots.try_acquire() else {
                warn!(
                    "Rejecting IPC connection from {}: at max capacity ({})",
                    peer_addr,
                    IpcConfig::MAX_CONNECTIONS
                );
                continue;
            };

            let router = router.clone();
            let mut conn_shutdown = conn_shutdown_rx.clone();
            tokio::spawn(async move {
                let _slot = slot;
                debug!("IPC connection from {}", peer_addr);
                if let Err(e) = Self::handle_connection(stream, router, &mut conn_shutdown).await {
                    debug!("IPC connection {} ended: {}", peer_addr, e);
                }
            });
        }
    }

    /// Each request frame is dispatched in its own task; replies go back
    /// through one writer task in completion order.
    async fn handle_connection(
        stream: TcpStream,
        router: Arc<ProcedureRouter>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let (mut reader, mut writer) = stream.into_split();
        let (reply_tx, mut replies) = mpsc::unbounded_channel::<WireResponse>();

        let writer_task = tokio::spawn(async move {
            while let Some(response) = replies.recv().await {
                let bytes = serde_json::to_vec(&response)?;
                write_frame(&mut writer, &bytes).await?;
            }
            Ok::<(), BridgeError>(())
        });

        let result = loop {
            let frame = tokio::select! {
                result = read_frame(&mut reader) => match result {
                    Ok(Some(frame)) => frame,
                    Ok(None) => break Ok(()), // Clean disconnect
                    Err(e) => break Err(e),
                },
                _ = shutdown_rx.changed() => break Ok(()),
            };

            let router = router.clone();
            let reply_tx = reply_tx.clone();
            tokio::spawn(async move {
                let response = Self::process_request(&frame, &router).await;
                let _ = reply_tx.send(response);
            });
        };

        drop(reply_tx);
        if *shutdown_rx.borrow() {
            writer_task.abort();
        } else if let Ok(Err(e)) = writer_task.await {
            debug!("IPC reply writer stopped: {}", e);
        }
        result
    }

    async fn process_request(frame: &[u8], router: &ProcedureRouter) -> WireResponse {
        let request: WireRequest = match serde_json::from_slice(frame) {
            Ok(req) => req,
            Err(e) => {
                return WireResponse::error(None, -32700, format!("Parse error: {}", e));
            }
        };

        let id = request.id;
        let (procedure, envelope) = request.into_envelope();

        match router.dispatch(&procedure, envelope).await {
            Some(outcome) => match WireOutcome::try_from(outcome) {
                Ok(wire) => WireResponse::outcome(id, wire),
                Err(e) => WireResponse::error(Some(id), e.wire_code(), e.to_string()),
            },
            None => WireResponse::error(
                Some(id),
                -32601,
                format!("No procedure registered under {}", procedure),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::from_fn;
    use crate::config::Context;
    use crate::value::Value;

    async fn echo_runtime() -> BridgeRuntime {
        let runtime = BridgeRuntime::builder(Context::background()).build().unwrap();
        runtime
            .wrap("test", from_fn(|args: Vec<Value>| async move { Ok(Value::Array(args)) }))
            .unwrap();
        runtime
    }

    async fn roundtrip(handle: &IpcServerHandle, payload: &[u8]) -> WireResponse {
        let mut stream = TcpStream::connect(handle.addr()).await.unwrap();
        let (mut reader, mut writer) = stream.split();
        write_frame(&mut writer, payload).await.unwrap();
        let response_bytes = read_frame(&mut reader).await.unwrap().unwrap();
        serde_json::from_slice(&response_bytes).unwrap()
    }

    #[tokio::test]
    async fn test_server_start_and_shutdown() {
        let runtime = echo_runtime().await;
        let mut handle = IpcServer::start(&runtime).await.unwrap();

        assert!(handle.port > 0);
        assert_eq!(handle.addr.ip(), std::net::Ipv4Addr::LOCALHOST);

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_server_dispatches_registered_procedure() {
        let runtime = echo_runtime().await;
        let handle = IpcServer::start(&runtime).await.unwrap();

        let request = WireRequest {
            id: 1,
            procedure: "test.0".into(),
            args: "[1,\"a\"]".into(),
            xsrf: None,
        };
        let response = roundtrip(&handle, &serde_json::to_vec(&request).unwrap()).await;

        assert_eq!(response.id, Some(1));
        let outcome = response.outcome.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.result, "[1,\"a\"]");
    }

    #[tokio::test]
    async fn test_server_unknown_procedure_is_transport_error() {
        let runtime = echo_runtime().await;
        let handle = IpcServer::start(&runtime).await.unwrap();

        let request = WireRequest {
            id: 2,
            procedure: "test.1".into(),
            args: "[]".into(),
            xsrf: None,
        };
        let response = roundtrip(&handle, &serde_json::to_vec(&request).unwrap()).await;

        assert!(response.outcome.is_none());
        assert_eq!(response.error.unwrap().code, -32601);
    }

    #[tokio::test]
    async fn test_server_invalid_json_returns_parse_error() {
        let runtime = echo_runtime().await;
        let handle = IpcServer::start(&runtime).await.unwrap();

        let response = roundtrip(&handle, b"not valid json").await;

        assert_eq!(response.id, None);
        assert_eq!(response.error.unwrap().code, -32700);
    }

    #[test]
    fn test_connection_slots_cap_and_release() {
        let slots = ConnectionSlots::new(2);
        let first = slots.try_acquire().unwrap();
        let _second = slots.try_acquire().unwrap();
        assert!(slots.try_acquire().is_none());
        assert_eq!(slots.in_use(), 2);

        drop(first);
        assert_eq!(slots.in_use(), 1);
        assert!(slots.try_acquire().is_some());
    }

    #[tokio::test]
    async fn test_server_answers_requests_out_of_order() {
        let runtime = BridgeRuntime::builder(Context::background()).build().unwrap();
        runtime
            .wrap(
                "test",
                from_fn(|_args: Vec<Value>| async move {
                    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                    Ok(Value::from("slow"))
                }),
            )
            .unwrap();
        runtime
            .wrap("test", from_fn(|_args: Vec<Value>| async move { Ok(Value::from("fast")) }))
            .unwrap();
        let handle = IpcServer::start(&runtime).await.unwrap();

        let mut stream = TcpStream::connect(handle.addr()).await.unwrap();
        let (mut reader, mut writer) = stream.split();
        for (id, procedure) in [(1, "test.0"), (2, "test.1")] {
            let request = WireRequest {
                id,
                procedure: procedure.into(),
                args: "[]".into(),
                xsrf: None,
            };
            write_frame(&mut writer, &serde_json::to_vec(&request).unwrap())
                .await
                .unwrap();
        }

        let first: WireResponse =
            serde_json::from_slice(&read_frame(&mut reader).await.unwrap().unwrap()).unwrap();
        let second: WireResponse =
            serde_json::from_slice(&read_frame(&mut reader).await.unwrap().unwrap()).unwrap();
        assert_eq!(first.id, Some(2));
        assert_eq!(second.id, Some(1));
    }

    #[tokio::test]
    async fn test_server_refuses_binary_runtime() {
        let binary = BridgeRuntime::builder(Context::background().with_binary_transport(true))
            .build()
            .unwrap();
        assert!(matches!(
            IpcServer::start(&binary).await,
            Err(BridgeError::Config { .. })
        ));
    }
}
