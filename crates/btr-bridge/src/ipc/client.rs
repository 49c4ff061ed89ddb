//! TCP client for the foreground context.
//!
//! # Thread Safety
//!
//! A reader task owns the read half of the stream and routes each response
//! frame to the waiter registered under its request id. A writer task owns
//! the write half and drains an outgoing frame queue. Callers only touch the
//! pending map and the queue, so any number of calls can be in flight, and a
//! caller that stops waiting just removes its waiter.

use super::protocol::{read_frame, write_frame, WireRequest, WireResponse};
use super::CallSender;
use crate::bridge::{CallEnvelope, CallOutcome, ProcedureId};
use crate::config::IpcConfig;
use crate::{BridgeError, Result};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Waiters for responses that have not arrived yet.
///
/// Once closed, every waiter is dropped and new registrations fail, so no
/// caller waits on a connection that can no longer answer.
#[derive(Debug, Default)]
struct Pending {
    waiters: HashMap<u64, oneshot::Sender<WireResponse>>,
    closed: bool,
}

type PendingMap = Arc<Mutex<Pending>>;

fn lock(pending: &PendingMap) -> std::sync::MutexGuard<'_, Pending> {
    pending.lock().unwrap_or_else(|e| e.into_inner())
}

fn close(pending: &PendingMap) {
    let mut pending = lock(pending);
    pending.closed = true;
    pending.waiters.clear();
}

/// Removes the waiter when a call is dropped before its response arrives.
struct WaiterGuard<'a> {
    pending: &'a PendingMap,
    id: u64,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        if lock(self.pending).waiters.remove(&self.id).is_some() {
            debug!("IPC call {} abandoned before its response", self.id);
        }
    }
}

/// Connection to a background context's [`IpcServer`](super::IpcServer).
#[derive(Debug)]
pub struct IpcClient {
    addr: SocketAddr,
    next_id: AtomicU64,
    pending: PendingMap,
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl IpcClient {
    /// Connect using the configured connection timeout.
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = tokio::time::timeout(IpcConfig::CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| BridgeError::transport(format!("Timed out connecting to {}", addr)))?
            .map_err(|e| BridgeError::transport(format!("Failed to connect to {}: {}", addr, e)))?;

        debug!("IPC client connected to {}", addr);

        let (read_half, write_half) = stream.into_split();
        let pending = PendingMap::default();
        let (outgoing, queue) = mpsc::unbounded_channel();

        let reader = tokio::spawn(read_responses(read_half, pending.clone(), addr));
        let writer = tokio::spawn(write_requests(write_half, queue, pending.clone(), addr));

        Ok(Self {
            addr,
            next_id: AtomicU64::new(1),
            pending,
            outgoing,
            reader,
            writer,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Number of calls still waiting for a response.
    pub fn in_flight(&self) -> usize {
        lock(&self.pending).waiters.len()
    }

    fn lost(&self) -> BridgeError {
        BridgeError::transport(format!("Lost connection to {}", self.addr))
    }

    fn register(&self, id: u64) -> Result<oneshot::Receiver<WireResponse>> {
        let mut pending = lock(&self.pending);
        if pending.closed {
            return Err(self.lost());
        }
        let (tx, rx) = oneshot::channel();
        pending.waiters.insert(id, tx);
        Ok(rx)
    }
}

impl Drop for IpcClient {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

async fn read_responses(mut reader: OwnedReadHalf, pending: PendingMap, addr: SocketAddr) {
    loop {
        let frame = match read_frame(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("IPC server {} closed the connection", addr);
                break;
            }
            Err(e) => {
                debug!("IPC read from {} failed: {}", addr, e);
                break;
            }
        };

        let response: WireResponse = match serde_json::from_slice(&frame) {
            Ok(response) => response,
            Err(e) => {
                warn!("Discarding unparseable IPC response from {}: {}", addr, e);
                continue;
            }
        };

        let Some(id) = response.id else {
            warn!("Discarding IPC response without an id from {}", addr);
            continue;
        };

        let waiter = lock(&pending).waiters.remove(&id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => debug!("No waiter for IPC response {}", id),
        }
    }
    close(&pending);
}

async fn write_requests(
    mut writer: OwnedWriteHalf,
    mut queue: mpsc::UnboundedReceiver<Vec<u8>>,
    pending: PendingMap,
    addr: SocketAddr,
) {
    while let Some(frame) = queue.recv().await {
        if let Err(e) = write_frame(&mut writer, &frame).await {
            debug!("IPC write to {} failed: {}", addr, e);
            break;
        }
    }
    close(&pending);
}

#[async_trait::async_trait]
impl CallSender for IpcClient {
    async fn send(&self, procedure: &ProcedureId, envelope: CallEnvelope) -> Result<CallOutcome> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = WireRequest::from_envelope(id, procedure, envelope)?;
        let request_bytes = serde_json::to_vec(&request)?;

        let response = self.register(id)?;
        let _guard = WaiterGuard {
            pending: &self.pending,
            id,
        };

        self.outgoing
            .send(request_bytes)
            .map_err(|_| self.lost())?;

        let response = response.await.map_err(|_| self.lost())?;

        if let Some(err) = response.error {
            return Err(BridgeError::transport(err.message));
        }

        response
            .outcome
            .map(CallOutcome::from)
            .ok_or_else(|| BridgeError::transport("IPC response missing outcome"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{from_fn, Callable};
    use crate::config::Context;
    use crate::ipc::{IpcServer, IpcServerHandle};
    use crate::runtime::BridgeRuntime;
    use crate::value::Value;
    use std::time::Duration;

    fn background() -> BridgeRuntime {
        let runtime = BridgeRuntime::builder(Context::background()).build().unwrap();
        runtime
            .wrap(
                "test",
                from_fn(|args: Vec<Value>| async move {
                    let a = args.first().and_then(Value::as_i64).unwrap_or(0);
                    let b = args.get(1).and_then(Value::as_i64).unwrap_or(0);
                    Ok(Value::from(a + b))
                }),
            )
            .unwrap();
        runtime
    }

    #[tokio::test]
    async fn test_proxy_call_over_tcp() {
        let runtime = background();
        let handle = IpcServer::start(&runtime).await.unwrap();

        let client = IpcClient::connect(handle.addr()).await.unwrap();
        let foreground = BridgeRuntime::builder(Context::foreground())
            .with_sender(Arc::new(client))
            .build()
            .unwrap();
        let add = foreground
            .wrap("test", from_fn(|_args: Vec<Value>| async { Ok(Value::Null) }))
            .unwrap();

        let result = add.call(vec![2.into(), 3.into()]).await.unwrap();
        assert_eq!(result.as_i64(), Some(5));
    }

    fn slow_procedure() -> impl Callable {
        from_fn(|_args: Vec<Value>| async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(Value::from("slow"))
        })
    }

    fn fast_procedure() -> impl Callable {
        from_fn(|_args: Vec<Value>| async move { Ok(Value::from("fast")) })
    }

    /// Background serving `slow.0` and `fast.0`, plus a connected client.
    async fn slow_and_fast() -> (IpcServerHandle, Arc<IpcClient>) {
        let runtime = BridgeRuntime::builder(Context::background()).build().unwrap();
        runtime.wrap("slow", slow_procedure()).unwrap();
        runtime.wrap("fast", fast_procedure()).unwrap();
        let handle = IpcServer::start(&runtime).await.unwrap();
        let client = Arc::new(IpcClient::connect(handle.addr()).await.unwrap());
        (handle, client)
    }

    #[tokio::test]
    async fn test_abandoned_call_does_not_desync_later_calls() {
        let (_handle, client) = slow_and_fast().await;
        let foreground = BridgeRuntime::builder(Context::foreground())
            .with_sender(client.clone())
            .build()
            .unwrap();
        let slow = foreground.wrap("slow", slow_procedure()).unwrap();
        let fast = foreground.wrap("fast", fast_procedure()).unwrap();

        let abandoned = tokio::time::timeout(Duration::from_millis(50), slow.call(vec![])).await;
        assert!(abandoned.is_err());
        assert_eq!(client.in_flight(), 0);

        for _ in 0..3 {
            let result = tokio::time::timeout(Duration::from_secs(2), fast.call(vec![]))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(result, Value::from("fast"));
        }
    }

    #[tokio::test]
    async fn test_abandoned_memoized_call_does_not_block_other_procedures() {
        let (_handle, client) = slow_and_fast().await;
        let foreground = BridgeRuntime::builder(Context::foreground())
            .with_sender(client)
            .build()
            .unwrap();
        let slow = foreground.memoize_bridged("slow", slow_procedure()).unwrap();
        let fast = foreground.wrap("fast", fast_procedure()).unwrap();

        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), slow.call(vec![1.into()])).await;
        assert!(abandoned.is_err());

        let result = tokio::time::timeout(Duration::from_secs(2), fast.call(vec![]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Value::from("fast"));

        // The dispatched call finished on its own and its outcome is cached
        let cached = tokio::time::timeout(Duration::from_secs(2), slow.call(vec![1.into()]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached, Value::from("slow"));
    }

    #[tokio::test]
    async fn test_concurrent_calls_share_one_connection() {
        let (_handle, client) = slow_and_fast().await;
        let foreground = BridgeRuntime::builder(Context::foreground())
            .with_sender(client)
            .build()
            .unwrap();
        let slow = foreground.wrap("slow", slow_procedure()).unwrap();
        let fast = foreground.wrap("fast", fast_procedure()).unwrap();

        let slow_call = tokio::spawn(slow.call(vec![]));
        tokio::time::sleep(Duration::from_millis(20)).await;
        let fast_result = tokio::time::timeout(Duration::from_millis(200), fast.call(vec![]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fast_result, Value::from("fast"));
        assert_eq!(slow_call.await.unwrap().unwrap(), Value::from("slow"));
    }

    #[tokio::test]
    async fn test_unknown_procedure_returns_transport_error() {
        let runtime = background();
        let handle = IpcServer::start(&runtime).await.unwrap();
        let client = IpcClient::connect(handle.addr()).await.unwrap();

        let envelope = CallEnvelope {
            args: crate::codec::EncodedValue::Text("[]".into()),
            xsrf: None,
        };
        let result = client.send(&"test.1".into(), envelope).await;
        assert!(matches!(result, Err(BridgeError::Transport { .. })));
    }

    #[tokio::test]
    async fn test_connect_to_dead_server_fails() {
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let result = IpcClient::connect(addr).await;
        assert!(matches!(result, Err(BridgeError::Transport { .. })));
    }

    #[tokio::test]
    async fn test_client_detects_server_shutdown() {
        let runtime = background();
        let mut handle = IpcServer::start(&runtime).await.unwrap();
        let client = IpcClient::connect(handle.addr()).await.unwrap();

        let envelope = || CallEnvelope {
            args: crate::codec::EncodedValue::Text("[1,1]".into()),
            xsrf: None,
        };
        assert!(client.send(&"test.0".into(), envelope()).await.is_ok());

        handle.shutdown();

        // Retry until the server is fully closed (up to 1s)
        let mut detected_shutdown = false;
        for _ in 0..20 {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            if client.send(&"test.0".into(), envelope()).await.is_err() {
                detected_shutdown = true;
                break;
            }
        }
        assert!(detected_shutdown, "Client should detect server shutdown");
    }
}
