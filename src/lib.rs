//! Asynchronous MODBUS Application Protocol implementation over TCP.
//!
//! [`wire`] carries the protocol's data model (function codes, PDUs, the
//! MBAP-framed [`wire::Adu`]); [`client::Client`] and [`server::Server`]
//! build on it to drive a connection from either end. [`helpers`] exposes
//! the access-bitmap arithmetic a server handler needs to implement the
//! legal-address/read/write semantics of a real device.

pub mod client;
pub mod config;
pub mod error;
pub mod helpers;
pub mod logging;
pub mod pool;
pub mod server;
pub mod wire;

pub use client::Client;
pub use config::{ClientConfig, ServerConfig};
pub use error::{ModbusError, Result};
pub use server::{RequestHandler, Server};
pub use wire::{Adu, ByteOrder, Direction, ExceptionCode, FunctionCode};
