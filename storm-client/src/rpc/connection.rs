use async_trait::async_trait;
use serde_json::Value;
use std::time::Instant;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[derive(Debug, Error, Clone)]
pub enum TransportError {
    #[error("connection refused: {0}")]
    ConnectionRefused(String),
    #[error("connection closed")]
    Closed,
    #[error("io error: {0}")]
    Io(String),
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("remote raised {exception}: {message}")]
    Remote { exception: String, message: String },
}

/// One call against Nimbus: an operation name plus a JSON-encoded payload.
/// The real Storm wire protocol is Thrift-framed; this operator treats the
/// framing as an opaque length-prefixed envelope (spec.md §1 explicitly
/// scopes the Thrift IDL itself out), carrying JSON bodies so the pool and
/// retry machinery below can be exercised against an in-process mock
/// without a code generator.
#[async_trait]
pub trait Transport: Send {
    async fn call(&mut self, op: &str, payload: Value) -> Result<Value, TransportError>;
    fn is_open(&self) -> bool;
    fn close(&mut self);
}

pub struct TcpTransport {
    stream: Option<TcpStream>,
}

impl TcpTransport {
    pub async fn connect(host: &str, port: u16) -> Result<Self, TransportError> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| TransportError::ConnectionRefused(e.to_string()))?;
        Ok(Self { stream: Some(stream) })
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn call(&mut self, op: &str, payload: Value) -> Result<Value, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        let envelope = serde_json::json!({ "op": op, "payload": payload });
        let body = serde_json::to_vec(&envelope)
            .map_err(|e| TransportError::Malformed(e.to_string()))?;
        let len = (body.len() as u32).to_be_bytes();
        stream
            .write_all(&len)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        stream
            .write_all(&body)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;

        let mut len_buf = [0u8; 4];
        stream
            .read_exact(&mut len_buf)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        let response_len = u32::from_be_bytes(len_buf) as usize;
        let mut response_buf = vec![0u8; response_len];
        stream
            .read_exact(&mut response_buf)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        let response: Value = serde_json::from_slice(&response_buf)
            .map_err(|e| TransportError::Malformed(e.to_string()))?;
        if let Some(exception) = response.get("exception").and_then(Value::as_str) {
            let message = response
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return Err(TransportError::Remote {
                exception: exception.to_string(),
                message,
            });
        }
        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn close(&mut self) {
        self.stream = None;
    }
}

/// An in-process transport for tests: returns scripted responses keyed by
/// operation name, optionally failing N times before succeeding, so pool
/// and retry behavior (spec.md §8 Scenario 6) can be exercised without a
/// real Nimbus.
pub struct MockTransport {
    open: bool,
    pub calls: Vec<(String, Value)>,
    pub responses: std::collections::HashMap<String, Vec<Result<Value, TransportError>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            open: true,
            calls: Vec::new(),
            responses: std::collections::HashMap::new(),
        }
    }

    pub fn queue(&mut self, op: &str, result: Result<Value, TransportError>) {
        self.responses.entry(op.to_string()).or_default().push(result);
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn call(&mut self, op: &str, payload: Value) -> Result<Value, TransportError> {
        self.calls.push((op.to_string(), payload));
        if !self.open {
            return Err(TransportError::Closed);
        }
        match self.responses.get_mut(op).and_then(|queue| {
            if queue.is_empty() {
                None
            } else {
                Some(queue.remove(0))
            }
        }) {
            Some(result) => result,
            None => Ok(Value::Null),
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) {
        self.open = false;
    }
}

/// A pooled connection: the transport plus bookkeeping the pool uses to
/// decide validity (spec.md §4.1: "valid if transport open AND not idle
/// past MaxIdleTime").
pub struct Connection<T: Transport> {
    pub(crate) transport: T,
    pub(crate) created_at: Instant,
    pub(crate) last_used_at: Instant,
}

impl<T: Transport> Connection<T> {
    pub fn new(transport: T) -> Self {
        let now = Instant::now();
        Self {
            transport,
            created_at: now,
            last_used_at: now,
        }
    }

    pub fn is_valid(&self, max_idle: std::time::Duration, max_lifetime: std::time::Duration) -> bool {
        self.transport.is_open()
            && self.last_used_at.elapsed() <= max_idle
            && self.created_at.elapsed() <= max_lifetime
    }

    pub async fn call(&mut self, op: &str, payload: Value) -> Result<Value, TransportError> {
        self.last_used_at = Instant::now();
        self.transport.call(op, payload).await
    }
}
