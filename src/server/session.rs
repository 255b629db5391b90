//! A single accepted connection's read/dispatch/write loop.

use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Notify;

use crate::logging::{emit, LogLevel, LoggingHandler};
use crate::server::RequestHandler;
use crate::server::session_manager::SessionManager;
use crate::wire::{Adu, Direction, MAX_APU_SIZE, MIN_PDU_SIZE, TCP_HEADER_SIZE};

/// One accepted socket, owned by the task spawned for it. `stop` is shared
/// with the owning [`SessionManager`] so [`SessionManager::stop`] can wake
/// a session out of a pending read.
pub(crate) struct Session {
    pub(crate) id: u64,
    pub(crate) stream: TcpStream,
    pub(crate) handler: Arc<dyn RequestHandler>,
    pub(crate) logging_handler: LoggingHandler,
    pub(crate) stop: Arc<Notify>,
}

impl Session {
    pub(crate) async fn run(mut self, manager: Arc<SessionManager>) {
        let peer = self
            .stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "<unknown>".to_string());

        loop {
            emit(&self.logging_handler, LogLevel::Trace, "waiting for request");

            let mut buf = vec![0u8; MAX_APU_SIZE];
            let read_result = tokio::select! {
                biased;
                _ = self.stop.notified() => return,
                r = self.stream.read(&mut buf) => r,
            };

            let bytes_read = match read_result {
                Ok(0) => {
                    emit(
                        &self.logging_handler,
                        LogLevel::Info,
                        format!("client {peer} disconnected"),
                    );
                    manager.stop(self.id).await;
                    return;
                }
                Ok(n) => n,
                Err(e) => {
                    emit(
                        &self.logging_handler,
                        LogLevel::Error,
                        format!("unanticipated error from read {e}; client: {peer}"),
                    );
                    manager.stop(self.id).await;
                    return;
                }
            };
            emit(
                &self.logging_handler,
                LogLevel::Debug,
                format!("read {bytes_read} bytes"),
            );

            if bytes_read < TCP_HEADER_SIZE + MIN_PDU_SIZE {
                emit(
                    &self.logging_handler,
                    LogLevel::Error,
                    format!("malformed message from {peer}"),
                );
                continue;
            }

            let request = match Adu::from_buffer(
                Bytes::copy_from_slice(&buf[..bytes_read]),
                bytes_read,
                Direction::Request,
            ) {
                Ok(request) => request,
                Err(e) => {
                    emit(
                        &self.logging_handler,
                        LogLevel::Error,
                        format!("malformed message from {peer}: {e}"),
                    );
                    continue;
                }
            };

            emit(&self.logging_handler, LogLevel::Trace, "processing request");
            let response = self.handler.handle(request).await;
            emit(&self.logging_handler, LogLevel::Trace, "created response");

            let write_result = tokio::select! {
                biased;
                _ = self.stop.notified() => return,
                r = self.stream.write_all(response.as_bytes()) => r,
            };

            if let Err(e) = write_result {
                emit(
                    &self.logging_handler,
                    LogLevel::Error,
                    format!("unanticipated write error {e}; client: {peer}"),
                );
                manager.stop(self.id).await;
                return;
            }
            emit(
                &self.logging_handler,
                LogLevel::Debug,
                format!("wrote {} bytes", response.as_bytes().len()),
            );
        }
    }
}
