//! Request/reply correlation.
//!
//! Many concurrent callers share one connection. The correlator allocates
//! monotonically increasing identifiers, keeps a pending entry per in-flight
//! request, and routes each inbound reply to the single matching waiter.
//! Dropping an entry's sender resolves the waiter with `ConnectionLost`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};

use crate::error::{ClientError, TransportError};
use crate::protocol::{
    parse_inbound, Inbound, ProgressParams, Request, RpcError, METHOD_PROGRESS,
};
use crate::transport::Connection;

/// A partial payload delivered before a call's terminal outcome.
#[derive(Debug, Clone)]
pub struct StreamChunk {
    /// Sequence number, increasing from zero within one call.
    pub sequence: u64,
    /// Partial payload.
    pub payload: Value,
}

/// One in-flight request awaiting its reply.
struct PendingRequest {
    method: String,
    resolver: oneshot::Sender<Result<Value, RpcError>>,
    chunks: Option<mpsc::UnboundedSender<StreamChunk>>,
}

/// Maps outbound calls to inbound replies over a single shared connection.
///
/// Exclusive owner of the pending set; identifiers are never reused within
/// a connection's lifetime.
pub struct Correlator {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, PendingRequest>>,
}

impl Correlator {
    /// Create an empty correlator.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Number of requests currently awaiting a reply.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn register(
        &self,
        id: u64,
        method: &str,
        chunks: Option<mpsc::UnboundedSender<StreamChunk>>,
    ) -> oneshot::Receiver<Result<Value, RpcError>> {
        let (tx, rx) = oneshot::channel();
        let entry = PendingRequest {
            method: method.to_string(),
            resolver: tx,
            chunks,
        };
        self.pending.lock().await.insert(id, entry);
        rx
    }

    async fn discard(&self, id: u64) {
        self.pending.lock().await.remove(&id);
    }

    /// Submit one request and wait for its reply, the deadline, or
    /// connection loss, whichever comes first.
    pub async fn submit<P: Serialize>(
        &self,
        conn: &Connection,
        method: &str,
        params: Option<P>,
        deadline: Duration,
    ) -> Result<Value, ClientError> {
        self.submit_inner(conn, method, params, deadline, None).await
    }

    /// Like `submit`, but partial payloads arriving before the terminal
    /// reply are forwarded to `chunks`.
    pub async fn submit_with_chunks<P: Serialize>(
        &self,
        conn: &Connection,
        method: &str,
        params: Option<P>,
        deadline: Duration,
        chunks: mpsc::UnboundedSender<StreamChunk>,
    ) -> Result<Value, ClientError> {
        self.submit_inner(conn, method, params, deadline, Some(chunks))
            .await
    }

    async fn submit_inner<P: Serialize>(
        &self,
        conn: &Connection,
        method: &str,
        params: Option<P>,
        deadline: Duration,
        chunks: Option<mpsc::UnboundedSender<StreamChunk>>,
    ) -> Result<Value, ClientError> {
        let id = self.allocate_id();
        let rx = self.register(id, method, chunks).await;

        let request = Request::new(id, method, params);
        let frame = serde_json::to_string(&request)?;

        if let Err(e) = conn.send(&frame).await {
            self.discard(id).await;
            return Err(match e {
                TransportError::NotConnected => {
                    ClientError::unavailable(format!("transport is {}", conn.state()))
                }
                other => ClientError::ConnectionLost(other.to_string()),
            });
        }

        debug!(id, method, "Request submitted");

        match tokio::time::timeout(deadline, rx).await {
            // Deadline elapsed: free the slot; a late reply is dropped.
            Err(_) => {
                self.discard(id).await;
                debug!(id, method, "Request deadline elapsed");
                Err(ClientError::Timeout(deadline))
            }
            // Entry dropped without resolution: the connection went away.
            Ok(Err(_)) => Err(ClientError::ConnectionLost(
                "transport failed while awaiting reply".to_string(),
            )),
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(rpc))) => Err(ClientError::remote(rpc.code, rpc.message)),
        }
    }

    /// Dispatch one inbound frame.
    ///
    /// Replies resolve the matching pending entry; progress notifications
    /// feed the entry's chunk channel. Frames matching no entry (late
    /// timeout, duplicate, unrelated notification) are logged and dropped,
    /// never surfaced as a caller error.
    pub async fn dispatch(&self, frame: &str) {
        let inbound = match parse_inbound(frame) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(error = %e, "Dropping malformed inbound frame");
                return;
            }
        };

        match inbound {
            Inbound::Reply { id, outcome } => {
                let entry = self.pending.lock().await.remove(&id);
                match entry {
                    Some(entry) => {
                        debug!(id, method = %entry.method, "Reply correlated");
                        // Receiver may have timed out concurrently.
                        let _ = entry.resolver.send(outcome);
                    }
                    None => {
                        debug!(id, "Dropping reply with no pending request");
                    }
                }
            }
            Inbound::Notification { method, params } if method == METHOD_PROGRESS => {
                let params: ProgressParams = match params
                    .ok_or(())
                    .and_then(|p| serde_json::from_value(p).map_err(|_| ()))
                {
                    Ok(p) => p,
                    Err(()) => {
                        warn!("Dropping malformed progress notification");
                        return;
                    }
                };

                let pending = self.pending.lock().await;
                match pending.get(&params.request_id).and_then(|e| e.chunks.as_ref()) {
                    Some(chunks) => {
                        let _ = chunks.send(StreamChunk {
                            sequence: params.sequence,
                            payload: params.chunk,
                        });
                    }
                    None => {
                        debug!(
                            id = params.request_id,
                            "Dropping progress for request with no chunk consumer"
                        );
                    }
                }
            }
            Inbound::Notification { method, .. } => {
                debug!(method = %method, "Ignoring server notification");
            }
        }
    }

    /// Resolve every pending entry with `ConnectionLost` by dropping its
    /// resolver. Called when the transport fails or closes.
    pub async fn fail_all(&self, reason: &str) {
        let drained: Vec<(u64, PendingRequest)> =
            self.pending.lock().await.drain().collect();

        if !drained.is_empty() {
            warn!(count = drained.len(), reason, "Failing all pending requests");
        }

        // Dropping the resolvers wakes every waiter with ConnectionLost.
        drop(drained);
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}
