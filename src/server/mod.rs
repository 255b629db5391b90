//! Asynchronous MODBUS/TCP server: an acceptor loop, a session manager
//! enforcing the configured connection cap, and per-connection
//! read/dispatch/write sessions.

mod session;
mod session_manager;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::Notify;

use crate::config::ServerConfig;
use crate::error::{ModbusError, Result};
use crate::logging::{emit, LogLevel};
use crate::wire::Adu;

pub use session_manager::SessionManager;

/// Resolves one request ADU to one response ADU. Implementations may
/// suspend (perform their own I/O, e.g. a database lookup) before
/// resolving; returning an exception-shaped [`Adu`] is a normal way to
/// signal a domain-level failure back to the client.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: Adu) -> Adu;
}

/// A MODBUS/TCP server bound to one endpoint, dispatching every accepted
/// connection's requests to a shared [`RequestHandler`].
pub struct Server {
    config: ServerConfig,
    session_manager: Arc<SessionManager>,
    handler: Arc<dyn RequestHandler>,
    stop_flag: AtomicBool,
    stop_notify: Notify,
}

impl Server {
    pub fn new(config: ServerConfig, handler: Arc<dyn RequestHandler>) -> Self {
        let session_manager = SessionManager::new(config.max_connections, config.logging_handler.clone());
        Self {
            config,
            session_manager,
            handler,
            stop_flag: AtomicBool::new(false),
            stop_notify: Notify::new(),
        }
    }

    pub fn session_manager(&self) -> &Arc<SessionManager> {
        &self.session_manager
    }

    /// Binds the configured endpoint and accepts connections until
    /// [`Server::stop`] is called. Each accepted socket is handed to the
    /// session manager, which enforces the connection cap.
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    async fn bind(&self) -> Result<TcpListener> {
        let addr = format!("{}:{}", self.config.endpoint, self.config.port);
        // TcpListener::bind enables address reuse by default on the
        // platforms tokio supports, matching the explicit reuse_address
        // option the reference acceptor sets.
        let listener = TcpListener::bind(&addr).await.map_err(ModbusError::Io)?;
        emit(
            &self.config.logging_handler,
            LogLevel::Info,
            format!("listening on {addr}"),
        );
        Ok(listener)
    }

    async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            let accepted = tokio::select! {
                biased;
                _ = self.stop_notify.notified() => break,
                a = listener.accept() => a,
            };

            let (socket, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    emit(
                        &self.config.logging_handler,
                        LogLevel::Error,
                        format!(
                            "error listening on interface {}:{} {e}",
                            self.config.endpoint, self.config.port
                        ),
                    );
                    break;
                }
            };

            emit(
                &self.config.logging_handler,
                LogLevel::Info,
                format!("connection from {peer}"),
            );

            if let Err(e) = self
                .session_manager
                .start(socket, self.handler.clone())
                .await
            {
                emit(&self.config.logging_handler, LogLevel::Error, format!("{e}"));
            }
        }

        Ok(())
    }

    /// Stops accepting new connections and closes every live session.
    pub async fn stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
        self.stop_notify.notify_waiters();
        self.session_manager.stop_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::pdu::{ReadHoldingRegistersRequest, ReadHoldingRegistersResponse};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    struct Echo;

    #[async_trait]
    impl RequestHandler for Echo {
        async fn handle(&self, request: Adu) -> Adu {
            let pdu = request
                .extract::<ReadHoldingRegistersRequest>()
                .expect("well-formed request");
            let response = ReadHoldingRegistersResponse {
                values: vec![pdu.start_address],
            };
            Adu::from_response(
                request.transaction_id().unwrap(),
                request.unit_id().unwrap(),
                &response,
            )
        }
    }

    #[tokio::test]
    async fn accepts_a_connection_and_answers_a_request() {
        let config = ServerConfig::default().with_endpoint("127.0.0.1").with_port(0);
        let server = Arc::new(Server::new(config, Arc::new(Echo)));

        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server_clone = server.clone();
        tokio::spawn(async move { server_clone.serve(listener).await });

        let mut socket = TcpStream::connect(addr).await.unwrap();
        let request_pdu = ReadHoldingRegistersRequest {
            start_address: 7,
            quantity: 1,
        };
        let request = Adu::from_request(1, 0x01, &request_pdu);
        socket.write_all(request.as_bytes()).await.unwrap();

        let mut header = [0u8; crate::wire::TCP_HEADER_SIZE];
        socket.read_exact(&mut header).await.unwrap();
        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        let mut body = vec![0u8; length];
        socket.read_exact(&mut body).await.unwrap();
        let mut full = header.to_vec();
        full.extend_from_slice(&body);
        let response = Adu::from_buffer(
            bytes::Bytes::from(full.clone()),
            full.len(),
            crate::wire::Direction::Response,
        )
        .unwrap();
        let parsed = response.extract::<ReadHoldingRegistersResponse>().unwrap();
        assert_eq!(parsed.values, vec![7]);

        server.stop().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
