use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

use super::connection::{Connection, TcpTransport, Transport, TransportError};

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: usize,
    pub min_idle_connections: usize,
    pub max_idle_time: Duration,
    pub max_lifetime: Duration,
    pub acquire_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 8,
            min_idle_connections: 1,
            max_idle_time: Duration::from_secs(300),
            max_lifetime: Duration::from_secs(3600),
            acquire_timeout: Duration::from_secs(5),
            max_retries: 3,
            retry_delay: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("pool exhausted: no connection available within {0:?}")]
    Exhausted(Duration),
    #[error("failed to establish connection: {0}")]
    Connect(#[from] TransportError),
    #[error("operation failed after {0} retries: {1}")]
    RetriesExhausted(u32, TransportError),
}

#[async_trait]
pub trait Connector: Send + Sync {
    type Conn: Transport + Send;
    async fn connect(&self) -> Result<Self::Conn, TransportError>;
}

pub struct TcpConnector {
    pub host: String,
    pub port: u16,
}

#[async_trait]
impl Connector for TcpConnector {
    type Conn = TcpTransport;
    async fn connect(&self) -> Result<Self::Conn, TransportError> {
        TcpTransport::connect(&self.host, self.port).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub created: usize,
    pub in_use: usize,
    pub available: usize,
    pub max_connections: usize,
}

struct PoolInner<T: Transport> {
    idle: VecDeque<Connection<T>>,
}

/// Bounded pool of pre-opened, framed connections to Nimbus (spec.md
/// §4.1). `created = in_use + available` holds at all times (spec.md §8,
/// "Pool stats consistency").
pub struct Pool<C: Connector> {
    connector: C,
    config: PoolConfig,
    inner: Mutex<PoolInner<C::Conn>>,
    semaphore: Arc<Semaphore>,
    created: AtomicUsize,
    in_use: AtomicUsize,
}

pub struct Checkout<'p, C: Connector> {
    pool: &'p Pool<C>,
    conn: Option<Connection<C::Conn>>,
    _permit: OwnedSemaphorePermit,
}

impl<C: Connector> Pool<C> {
    pub fn new(connector: C, config: PoolConfig) -> Arc<Self> {
        Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(config.max_connections)),
            connector,
            config,
            inner: Mutex::new(PoolInner { idle: VecDeque::new() }),
            created: AtomicUsize::new(0),
            in_use: AtomicUsize::new(0),
        })
    }

    pub fn stats(&self) -> PoolStats {
        let created = self.created.load(Ordering::SeqCst);
        let in_use = self.in_use.load(Ordering::SeqCst);
        PoolStats {
            created,
            in_use,
            available: created.saturating_sub(in_use),
            max_connections: self.config.max_connections,
        }
    }

    /// Pre-warm the pool up to `min_idle_connections` (called at startup).
    pub async fn warm_up(self: &Arc<Self>) -> Result<(), PoolError> {
        let mut inner = self.inner.lock().await;
        while self.created.load(Ordering::SeqCst) < self.config.min_idle_connections {
            let transport = self.connector.connect().await?;
            self.created.fetch_add(1, Ordering::SeqCst);
            inner.idle.push_back(Connection::new(transport));
        }
        Ok(())
    }

    async fn checkout(self: &Arc<Self>) -> Result<Checkout<'_, C>, PoolError> {
        let permit = tokio::time::timeout(
            self.config.acquire_timeout,
            self.semaphore.clone().acquire_owned(),
        )
        .await
        .map_err(|_| PoolError::Exhausted(self.config.acquire_timeout))?
        .expect("semaphore never closed");

        let mut inner = self.inner.lock().await;
        while let Some(candidate) = inner.idle.pop_front() {
            if candidate.is_valid(self.config.max_idle_time, self.config.max_lifetime) {
                self.in_use.fetch_add(1, Ordering::SeqCst);
                return Ok(Checkout {
                    pool: self.as_ref(),
                    conn: Some(candidate),
                    _permit: permit,
                });
            }
            self.created.fetch_sub(1, Ordering::SeqCst);
        }
        drop(inner);

        let transport = self.connector.connect().await?;
        self.created.fetch_add(1, Ordering::SeqCst);
        self.in_use.fetch_add(1, Ordering::SeqCst);
        Ok(Checkout {
            pool: self.as_ref(),
            conn: Some(Connection::new(transport)),
            _permit: permit,
        })
    }

    /// Run one operation with the documented retry policy: up to
    /// `max_retries` additional attempts with linear backoff
    /// `retry_delay * attempt`. An invalid connection is never returned to
    /// the pool between attempts; a fresh one is drawn instead.
    pub async fn call_with_retry(self: &Arc<Self>, op: &str, payload: Value) -> Result<Value, PoolError> {
        let mut last_error = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry_delay.saturating_mul(attempt)).await;
            }
            let mut checkout = self.checkout().await?;
            match checkout.call(op, payload.clone()).await {
                Ok(value) => {
                    checkout.release().await;
                    return Ok(value);
                }
                Err(e) => {
                    checkout.invalidate();
                    last_error = Some(e);
                }
            }
        }
        Err(PoolError::RetriesExhausted(
            self.config.max_retries,
            last_error.expect("loop runs at least once"),
        ))
    }

    /// Maintenance sweep: close idle-too-long/too-old connections, then
    /// refill back to `min_idle_connections`. Intended to run every 30s
    /// (spec.md §4.1).
    pub async fn maintain(self: &Arc<Self>) {
        let mut inner = self.inner.lock().await;
        let before = inner.idle.len();
        inner
            .idle
            .retain(|c| c.is_valid(self.config.max_idle_time, self.config.max_lifetime));
        let closed = before - inner.idle.len();
        if closed > 0 {
            self.created.fetch_sub(closed, Ordering::SeqCst);
        }
        while self.created.load(Ordering::SeqCst) < self.config.min_idle_connections {
            match self.connector.connect().await {
                Ok(transport) => {
                    self.created.fetch_add(1, Ordering::SeqCst);
                    inner.idle.push_back(Connection::new(transport));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "pool maintenance failed to refill idle connection");
                    break;
                }
            }
        }
    }

    pub fn spawn_maintenance(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let pool = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(30));
            loop {
                tick.tick().await;
                pool.maintain().await;
            }
        })
    }
}

impl<'p, C: Connector> Checkout<'p, C> {
    async fn call(&mut self, op: &str, payload: Value) -> Result<Value, TransportError> {
        self.conn.as_mut().expect("connection present").call(op, payload).await
    }

    /// Return a healthy connection to the idle queue.
    async fn release(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.in_use.fetch_sub(1, Ordering::SeqCst);
            self.pool.inner.lock().await.idle.push_back(conn);
        }
    }

    /// Discard a broken connection: closed, counters decremented, never
    /// returned to the pool (spec.md §4.1).
    fn invalidate(mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.transport.close();
            self.pool.in_use.fetch_sub(1, Ordering::SeqCst);
            self.pool.created.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl<'p, C: Connector> Drop for Checkout<'p, C> {
    fn drop(&mut self) {
        // A checkout dropped without an explicit release/invalidate (e.g.
        // a `?` early-return) is treated as broken: safer to shrink the
        // pool than to risk returning a connection mid-write.
        if let Some(mut conn) = self.conn.take() {
            conn.transport.close();
            self.pool.in_use.fetch_sub(1, Ordering::SeqCst);
            self.pool.created.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::connection::MockTransport;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;

    struct CountingConnector {
        count: StdAtomicUsize,
        fail_first_n: usize,
    }

    #[async_trait]
    impl Connector for CountingConnector {
        type Conn = MockTransport;
        async fn connect(&self) -> Result<MockTransport, TransportError> {
            let n = self.count.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first_n {
                return Err(TransportError::ConnectionRefused("simulated".into()));
            }
            Ok(MockTransport::new())
        }
    }

    fn config(max_connections: usize) -> PoolConfig {
        PoolConfig {
            max_connections,
            min_idle_connections: 0,
            max_idle_time: Duration::from_secs(60),
            max_lifetime: Duration::from_secs(3600),
            acquire_timeout: Duration::from_millis(500),
            max_retries: 2,
            retry_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn stats_invariant_holds_after_checkouts() {
        let pool = Pool::new(
            CountingConnector { count: StdAtomicUsize::new(0), fail_first_n: 0 },
            config(2),
        );
        let c1 = pool.checkout().await.unwrap();
        let stats = pool.stats();
        assert_eq!(stats.created, stats.in_use + stats.available);
        assert!(stats.created <= stats.max_connections);
        c1.release().await;
        let stats = pool.stats();
        assert_eq!(stats.created, stats.in_use + stats.available);
    }

    #[tokio::test]
    async fn call_with_retry_succeeds_after_transient_failure() {
        let pool = Pool::new(
            CountingConnector { count: StdAtomicUsize::new(0), fail_first_n: 0 },
            config(2),
        );
        let result = pool.call_with_retry("GetClusterInfo", serde_json::json!({})).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn checkout_beyond_capacity_times_out() {
        let pool = Pool::new(
            CountingConnector { count: StdAtomicUsize::new(0), fail_first_n: 0 },
            config(1),
        );
        let _held = pool.checkout().await.unwrap();
        let err = pool.checkout().await.unwrap_err();
        assert!(matches!(err, PoolError::Exhausted(_)));
    }
}
