//! A minimal MODBUS/TCP client that reads a span of holding registers from
//! a remote device and prints the result, demonstrating
//! [`modbus_tcp::Client`] end to end.

use std::time::Duration;

use clap::Parser;
use modbus_tcp::wire::pdu::ReadHoldingRegistersRequest;
use modbus_tcp::wire::Adu;
use modbus_tcp::{Client, ClientConfig};

#[derive(Parser)]
struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(long, default_value_t = 502)]
    port: u16,

    #[arg(long, default_value_t = 1)]
    unit_id: u8,

    #[arg(long, default_value_t = 0)]
    start_address: u16,

    #[arg(long, default_value_t = 10)]
    quantity: u16,

    #[arg(long, default_value_t = 3000)]
    timeout_ms: u64,
}

#[tokio::main]
async fn main() -> modbus_tcp::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let client = Client::new(
        ClientConfig::default()
            .with_host(args.host.clone())
            .with_port(args.port),
    );

    let request_pdu = ReadHoldingRegistersRequest {
        start_address: args.start_address,
        quantity: args.quantity,
    };
    let transaction_id = client.reserve_transaction_id();
    let request = Adu::from_request(transaction_id, args.unit_id, &request_pdu);

    let response = client
        .send_request(&request, Duration::from_millis(args.timeout_ms))
        .await?;
    Client::validate_response(&request, &response)?;

    if response.is_exception()? {
        let exception = response.extract_exception().expect("exception flag was set");
        eprintln!(
            "device {} refused the read: {:?}",
            args.unit_id, exception.exception_code
        );
        return Ok(());
    }

    let parsed = response
        .extract::<modbus_tcp::wire::pdu::ReadHoldingRegistersResponse>()
        .ok_or_else(|| modbus_tcp::ModbusError::InvalidResponse("unexpected PDU shape".to_string()))?;

    for (i, value) in parsed.values.iter().enumerate() {
        println!("register {}: {value} (0x{value:04X})", args.start_address as usize + i);
    }

    Ok(())
}
