//! A connection pool for the client: up to `max_connections` TCP sockets,
//! each either idle or held by exactly one reserver, with connections
//! created lazily on demand.
//!
//! Grounded on the reference client's use of `cpool::connection_pool`: a
//! `get_connection`/`release_connection` pair backed by a factory invoked
//! only when the pool needs a new connection and hasn't hit its cap.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify};
use tokio::time::timeout;

use crate::error::{ModbusError, Result};
use crate::logging::{emit, LogLevel, LoggingHandler};

/// Lifecycle state of a pooled connection, observable through the pool's
/// logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Resolving,
    Connecting,
    Connected,
    Disconnecting,
}

/// A TCP connection on loan from a [`ConnectionPool`]. Dropping it without
/// calling [`ConnectionPool::release`] leaks its slot in the pool's
/// accounting for the lifetime of the pool — callers are expected to
/// always release, mirroring the reference client's RAII-free handle.
pub struct PooledConnection {
    pub(crate) stream: TcpStream,
    state: ConnectionState,
}

impl PooledConnection {
    pub fn state(&self) -> ConnectionState {
        self.state
    }
}

struct PoolInner {
    idle: VecDeque<PooledConnection>,
    created: usize,
}

/// Owns up to `max_connections` connections to a single `host:port`.
pub struct ConnectionPool {
    host: String,
    port: u16,
    connect_timeout: Duration,
    max_connections: usize,
    inner: Mutex<PoolInner>,
    notify: Notify,
    stopped: AtomicBool,
    logging_handler: LoggingHandler,
}

impl ConnectionPool {
    pub fn new(
        host: String,
        port: u16,
        max_connections: usize,
        connect_timeout: Duration,
        logging_handler: LoggingHandler,
    ) -> Arc<Self> {
        Arc::new(Self {
            host,
            port,
            connect_timeout,
            max_connections,
            inner: Mutex::new(PoolInner {
                idle: VecDeque::new(),
                created: 0,
            }),
            notify: Notify::new(),
            stopped: AtomicBool::new(false),
            logging_handler,
        })
    }

    /// Number of connections this pool has ever created and not yet
    /// discarded, idle or reserved.
    pub async fn size(&self) -> usize {
        self.inner.lock().await.created
    }

    /// Number of connections currently idle (available for reservation).
    pub async fn size_idle(&self) -> usize {
        self.inner.lock().await.idle.len()
    }

    /// Hands out an idle connection, creating one via the factory if the
    /// pool is below capacity, or waits for one to be released otherwise.
    /// Fails immediately with [`ModbusError::Stopped`] once [`ConnectionPool::stop`]
    /// has been called.
    pub async fn reserve(self: &Arc<Self>) -> Result<PooledConnection> {
        loop {
            if self.stopped.load(Ordering::Acquire) {
                return Err(ModbusError::Stopped);
            }

            let creation_slot = {
                let mut inner = self.inner.lock().await;
                emit(
                    &self.logging_handler,
                    LogLevel::Trace,
                    format!(
                        "getting connection - connections {} - idle {}",
                        inner.created,
                        inner.idle.len()
                    ),
                );
                if let Some(conn) = inner.idle.pop_front() {
                    return Ok(conn);
                }
                if inner.created < self.max_connections {
                    inner.created += 1;
                    true
                } else {
                    false
                }
            };

            if creation_slot {
                match self.connect().await {
                    Ok(conn) => return Ok(conn),
                    Err(e) => {
                        self.inner.lock().await.created -= 1;
                        self.notify.notify_one();
                        return Err(e);
                    }
                }
            }

            self.notify.notified().await;
        }
    }

    /// Returns a connection to the idle set, or discards it (and frees its
    /// capacity slot) if it's no longer usable.
    pub async fn release(&self, conn: PooledConnection) {
        let discard = conn.state != ConnectionState::Connected;
        let mut inner = self.inner.lock().await;
        if discard {
            inner.created -= 1;
        } else {
            inner.idle.push_back(conn);
        }
        drop(inner);
        self.notify.notify_one();
    }

    /// Marks the pool as shutting down: outstanding and future reservation
    /// attempts resolve with `stopped`, and idle connections are dropped.
    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.inner.lock().await.idle.clear();
        self.notify.notify_waiters();
    }

    async fn connect(&self) -> Result<PooledConnection> {
        emit(
            &self.logging_handler,
            LogLevel::Info,
            format!("connecting to {}:{}", self.host, self.port),
        );
        let connect = TcpStream::connect((self.host.as_str(), self.port));
        let stream = match timeout(self.connect_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(ModbusError::Io(e)),
            Err(_) => {
                return Err(ModbusError::Disconnected(format!(
                    "timed out connecting to {}:{}",
                    self.host, self.port
                )))
            }
        };
        emit(
            &self.logging_handler,
            LogLevel::Info,
            format!("connected to {}:{}", self.host, self.port),
        );
        Ok(PooledConnection {
            stream,
            state: ConnectionState::Connected,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn echo_listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[tokio::test]
    async fn reserve_creates_up_to_the_cap_then_waits() {
        let (listener, port) = echo_listener().await;
        tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });

        let pool = ConnectionPool::new(
            "127.0.0.1".to_string(),
            port,
            1,
            Duration::from_secs(1),
            crate::logging::null_logging_handler(),
        );

        let first = pool.reserve().await.unwrap();
        assert_eq!(pool.size().await, 1);

        let pool_clone = pool.clone();
        let waiting = tokio::spawn(async move { pool_clone.reserve().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        pool.release(first).await;
        let second = waiting.await.unwrap().unwrap();
        assert_eq!(second.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn stop_unblocks_reservations_with_stopped() {
        let (_listener, port) = echo_listener().await;
        let pool = ConnectionPool::new(
            "127.0.0.1".to_string(),
            port,
            0,
            Duration::from_secs(1),
            crate::logging::null_logging_handler(),
        );
        pool.stop().await;
        let err = pool.reserve().await.unwrap_err();
        assert!(matches!(err, ModbusError::Stopped));
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    async fn connecting_emits_a_tracing_event() {
        let (listener, port) = echo_listener().await;
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let pool = ConnectionPool::new(
            "127.0.0.1".to_string(),
            port,
            1,
            Duration::from_secs(1),
            crate::logging::null_logging_handler(),
        );
        let _conn = pool.reserve().await.unwrap();
        assert!(logs_contain("connecting to"));
        assert!(logs_contain("connected to"));
    }
}
