//! A MODBUS/TCP server backed by a fixed bank of holding registers,
//! demonstrating [`modbus_tcp::server::Server`] and the access-bitmap
//! helpers in [`modbus_tcp::helpers`].

use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use parking_lot::Mutex;

use modbus_tcp::helpers::{copy_data_registers, write_register};
use modbus_tcp::wire::pdu::{
    ExceptionResponse, ReadHoldingRegistersRequest, ReadHoldingRegistersResponse,
    WriteSingleRegisterRequest, WriteSingleRegisterResponse,
};
use modbus_tcp::wire::{ExceptionCode, FunctionCode};
use modbus_tcp::{Adu, RequestHandler, Server, ServerConfig};

#[derive(Parser)]
struct Args {
    #[arg(long, default_value = "0.0.0.0")]
    endpoint: String,

    #[arg(long, default_value_t = 1502)]
    port: u16,

    #[arg(long, default_value_t = 100)]
    register_count: usize,
}

struct RegisterBank {
    memory: Mutex<Vec<u8>>,
}

impl RegisterBank {
    fn new(register_count: usize) -> Self {
        Self {
            memory: Mutex::new(vec![0u8; register_count * 2]),
        }
    }
}

#[async_trait]
impl RequestHandler for RegisterBank {
    async fn handle(&self, request: Adu) -> Adu {
        let transaction_id = request.transaction_id().unwrap_or_default();
        let unit_id = request.unit_id().unwrap_or_default();

        if let Some(read) = request.extract::<ReadHoldingRegistersRequest>() {
            let memory = self.memory.lock();
            let max_registers = memory.len() / 2;
            if read.start_address as usize + read.quantity as usize > max_registers {
                return Adu::from_exception(
                    transaction_id,
                    unit_id,
                    &ExceptionResponse {
                        function_code: FunctionCode::ReadHoldingRegisters,
                        exception_code: ExceptionCode::IllegalDataAddress,
                    },
                );
            }
            let bytes = copy_data_registers(&memory, read.start_address as usize, read.quantity as usize);
            let values = bytes
                .chunks_exact(2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]))
                .collect();
            return Adu::from_response(
                transaction_id,
                unit_id,
                &ReadHoldingRegistersResponse { values },
            );
        }

        if let Some(write) = request.extract::<WriteSingleRegisterRequest>() {
            let mut memory = self.memory.lock();
            let max_registers = memory.len() / 2;
            if write.address as usize >= max_registers {
                return Adu::from_exception(
                    transaction_id,
                    unit_id,
                    &ExceptionResponse {
                        function_code: FunctionCode::WriteSingleRegister,
                        exception_code: ExceptionCode::IllegalDataAddress,
                    },
                );
            }
            write_register(write.value, &mut memory, write.address as usize);
            return Adu::from_response(
                transaction_id,
                unit_id,
                &WriteSingleRegisterResponse {
                    address: write.address,
                    value: write.value,
                },
            );
        }

        let function_code = request.function_code().unwrap_or(FunctionCode::ReadHoldingRegisters);
        Adu::from_exception(
            transaction_id,
            unit_id,
            &ExceptionResponse {
                function_code,
                exception_code: ExceptionCode::IllegalFunction,
            },
        )
    }
}

#[tokio::main]
async fn main() -> modbus_tcp::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let config = ServerConfig::default()
        .with_endpoint(args.endpoint)
        .with_port(args.port);
    let handler = Arc::new(RegisterBank::new(args.register_count));
    let server = Server::new(config, handler);
    server.run().await
}
