//! Asynchronous MODBUS/TCP client: a connection pool, a transaction id
//! allocator, and the request/response pipeline from the reference
//! `tcp_client`.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

use crate::config::ClientConfig;
use crate::error::{ModbusError, Result};
use crate::logging::{emit, LogLevel};
use crate::pool::{ConnectionPool, PooledConnection};
use crate::wire::{Adu, Direction, FunctionCode, MAX_APU_SIZE, TCP_HEADER_SIZE};

/// A MODBUS/TCP client bound to a single remote device, backed by a pool
/// of up to `config.max_connections` sockets.
pub struct Client {
    config: ClientConfig,
    pool: Arc<ConnectionPool>,
    transaction_id: AtomicU16,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        let pool = ConnectionPool::new(
            config.host.clone(),
            config.port,
            config.max_connections,
            config.connect_timeout,
            config.logging_handler.clone(),
        );
        Self {
            config,
            pool,
            transaction_id: AtomicU16::new(1),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Allocates the next transaction id, wrapping on overflow.
    pub fn reserve_transaction_id(&self) -> u16 {
        self.transaction_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Stops accepting new reservations from the pool; in-flight
    /// `send_request` calls already holding a connection still complete.
    pub async fn stop(&self) {
        self.pool.stop().await;
    }

    /// Sends `request` and waits up to `timeout_duration` for its matching
    /// response, following the reference client's pipeline: reserve a
    /// connection, drain any leftover bytes from a previous timed-out
    /// transaction, write the request, then read responses until one
    /// whose transaction id isn't stale turns up.
    pub async fn send_request(&self, request: &Adu, timeout_duration: Duration) -> Result<Adu> {
        emit(
            &self.config.logging_handler,
            LogLevel::Trace,
            format!(
                "getting connection - connections {} - idle {}",
                self.pool.size().await,
                self.pool.size_idle().await
            ),
        );
        let mut conn = self.pool.reserve().await?;

        if let Err(e) = self.drain_residue(&mut conn).await {
            self.pool.release(conn).await;
            return Err(e);
        }

        emit(
            &self.config.logging_handler,
            LogLevel::Trace,
            format!("setting read timeout of {}ms", timeout_duration.as_millis()),
        );

        if let Err(e) = self.write_request(&mut conn, request, timeout_duration).await {
            self.pool.release(conn).await;
            return Err(e);
        }

        let result = self.read_loop(&mut conn, request, timeout_duration).await;
        self.pool.release(conn).await;
        result
    }

    /// Discards any bytes already buffered on the connection: a response
    /// to a previous request that timed out client-side but completed on
    /// the server.
    async fn drain_residue(&self, conn: &mut PooledConnection) -> Result<()> {
        let mut scratch = [0u8; MAX_APU_SIZE];
        loop {
            match conn.stream.try_read(&mut scratch) {
                Ok(0) => {
                    return Err(ModbusError::Disconnected(
                        "connection closed while draining residue".to_string(),
                    ))
                }
                Ok(_) => continue,
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(ModbusError::Io(e)),
            }
        }
    }

    async fn write_request(
        &self,
        conn: &mut PooledConnection,
        request: &Adu,
        timeout_duration: Duration,
    ) -> Result<()> {
        emit(
            &self.config.logging_handler,
            LogLevel::Debug,
            format!(
                "sending request with ID {}",
                request.transaction_id().unwrap_or_default()
            ),
        );
        match timeout(timeout_duration, conn.stream.write_all(request.as_bytes())).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ModbusError::Io(e)),
            Err(_) => Err(ModbusError::WriteTimeout),
        }
    }

    async fn read_loop(
        &self,
        conn: &mut PooledConnection,
        request: &Adu,
        timeout_duration: Duration,
    ) -> Result<Adu> {
        let request_tx = request.transaction_id()?;

        let read = async {
            loop {
                let mut header = [0u8; TCP_HEADER_SIZE];
                conn.stream.read_exact(&mut header).await.map_err(|e| {
                    if e.kind() == std::io::ErrorKind::UnexpectedEof {
                        ModbusError::MalformedMessage(format!("short header read: {e}"))
                    } else {
                        ModbusError::Io(e)
                    }
                })?;

                let length = u16::from_be_bytes([header[4], header[5]]) as usize;
                if length + TCP_HEADER_SIZE > MAX_APU_SIZE {
                    return Err(ModbusError::InvalidResponse(format!(
                        "advertised length {length} would exceed the maximum APU size"
                    )));
                }

                let mut body = vec![0u8; length];
                conn.stream.read_exact(&mut body).await.map_err(|e| {
                    ModbusError::Disconnected(format!("failed to read the response body: {e}"))
                })?;

                let mut full = Vec::with_capacity(TCP_HEADER_SIZE + length);
                full.extend_from_slice(&header);
                full.extend_from_slice(&body);
                let response =
                    Adu::from_buffer(Bytes::from(full), TCP_HEADER_SIZE + length, Direction::Response)?;
                let response_tx = response.transaction_id()?;

                emit(
                    &self.config.logging_handler,
                    LogLevel::Debug,
                    format!("received response with ID {response_tx}"),
                );

                if response_tx < request_tx {
                    // belongs to an earlier, timed-out request
                    continue;
                }
                return Ok(response);
            }
        };

        match timeout(timeout_duration, read).await {
            Ok(result) => result,
            Err(_) => Err(ModbusError::ReadTimeout),
        }
    }

    /// Checks a response against the request it answers: matching
    /// transaction id, matching function code, and (for the single-coil
    /// and single-register writes) a byte-identical echo.
    pub fn validate_response(request: &Adu, response: &Adu) -> Result<()> {
        if request.transaction_id()? != response.transaction_id()? {
            return Err(ModbusError::InvalidResponse(
                "transaction id mismatch".to_string(),
            ));
        }

        let request_fc = request.function_code()?;
        if request_fc != response.function_code()? {
            return Err(ModbusError::InvalidResponse(
                "function code mismatch".to_string(),
            ));
        }

        let is_single_write = matches!(
            request_fc,
            FunctionCode::WriteSingleCoil | FunctionCode::WriteSingleRegister
        );
        if is_single_write && !response.is_exception()? && request.as_bytes() != response.as_bytes() {
            return Err(ModbusError::InvalidResponse(
                "echo response did not match the request".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::pdu::{ReadHoldingRegistersRequest, ReadHoldingRegistersResponse};
    use tokio::net::TcpListener;

    #[test]
    fn transaction_id_allocator_starts_at_one_and_wraps() {
        let client = Client::new(ClientConfig::default());
        assert_eq!(client.reserve_transaction_id(), 1);
        assert_eq!(client.reserve_transaction_id(), 2);
        client.transaction_id.store(u16::MAX, Ordering::Relaxed);
        assert_eq!(client.reserve_transaction_id(), u16::MAX);
        assert_eq!(client.reserve_transaction_id(), 0);
    }

    #[tokio::test]
    async fn send_request_round_trips_against_a_fake_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut header = [0u8; TCP_HEADER_SIZE];
            socket.read_exact(&mut header).await.unwrap();
            let length = u16::from_be_bytes([header[4], header[5]]) as usize;
            let mut body = vec![0u8; length];
            socket.read_exact(&mut body).await.unwrap();

            let response = ReadHoldingRegistersResponse {
                values: vec![0x002A],
            };
            let adu = Adu::from_response(
                u16::from_be_bytes([header[0], header[1]]),
                body[0],
                &response,
            );
            socket.write_all(adu.as_bytes()).await.unwrap();
        });

        let client = Client::new(
            ClientConfig::default()
                .with_host("127.0.0.1")
                .with_port(port),
        );
        let request_pdu = ReadHoldingRegistersRequest {
            start_address: 0,
            quantity: 1,
        };
        let tx_id = client.reserve_transaction_id();
        let request = Adu::from_request(tx_id, 1, &request_pdu);

        let response = client
            .send_request(&request, Duration::from_secs(1))
            .await
            .unwrap();
        Client::validate_response(&request, &response).unwrap();
        let parsed = response.extract::<ReadHoldingRegistersResponse>().unwrap();
        assert_eq!(parsed.values, vec![0x002A]);
    }
}
