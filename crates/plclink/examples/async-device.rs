//! Async device and panel using the tokio codecs.
//!
//! Run with:
//!   cargo run --example async-device --features async,session

use futures_util::{SinkExt, StreamExt};
use plclink::frame::{DeviceCodec, OutgoingValues, PanelCodec, ACK_SLOT, COMMAND_SLOT};
use plclink::session::{Command, DeviceSimulator};
use plclink::transport::{tokio_tcp, TcpOptions};
use tokio::net::TcpListener;
use tokio_util::codec::Framed;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?.to_string();

    let device = tokio::spawn(async move {
        let (stream, peer) = listener.accept().await?;
        eprintln!("[device] panel connected from {peer}");
        let mut framed = Framed::new(stream, DeviceCodec);
        let mut simulator = DeviceSimulator::new().with_ack_delay(3);
        while let Some(out) = framed.next().await {
            let reply = simulator.respond(&out?);
            framed.send(reply).await?;
        }
        Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
    });

    let stream = tokio_tcp::connect(&addr, &TcpOptions::default()).await?;
    let mut panel = Framed::new(stream, PanelCodec);

    let mut values: OutgoingValues = [0; 16];
    values[COMMAND_SLOT] = Command::Initialize.code();

    for tick in 1..=10 {
        panel.send(values).await?;
        let Some(reply) = panel.next().await else {
            break;
        };
        let ack = reply?.ints[ACK_SLOT];
        eprintln!("[panel] tick {tick}: ack={ack}");
        if ack == values[COMMAND_SLOT] {
            eprintln!("[panel] command acknowledged");
            break;
        }
    }

    drop(panel);
    device.await?.map_err(|err| err.to_string())?;
    Ok(())
}
