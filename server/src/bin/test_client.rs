use clap::Parser;
use protocol::level_data;
use protocol::{Direction, ExtensionSet, Packet, PROTOCOL_VERSION};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

/// Logs in to a running server, downloads the level, chats and walks a little.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server address
    #[clap(short, long, default_value = "127.0.0.1:25565")]
    server: String,
    /// Name to log in with
    #[clap(short, long, default_value = "probe")]
    name: String,
}

async fn read_packet(stream: &mut TcpStream) -> Result<Packet, Box<dyn std::error::Error>> {
    let ext = ExtensionSet::empty();
    let id = stream.read_u8().await?;
    let size = Packet::payload_size(id, Direction::Clientbound, &ext)
        .ok_or_else(|| format!("unknown packet id 0x{:02X}", id))?;
    let mut payload = vec![0u8; size];
    stream.read_exact(&mut payload).await?;
    Ok(Packet::decode(id, &payload, Direction::Clientbound, &ext)?)
}

async fn send(stream: &mut TcpStream, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
    stream.write_all(&packet.encode(&ExtensionSet::empty())).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    println!("Connecting to {}", args.server);
    let mut stream = TcpStream::connect(&args.server).await?;
    send(
        &mut stream,
        &Packet::PlayerIdentification {
            protocol_version: PROTOCOL_VERSION,
            username: args.name.clone(),
            verification_key: String::new(),
            supports_cpe: false,
        },
    )
    .await?;

    // Read until the level is complete and we have been spawned
    let mut compressed = Vec::new();
    let mut spawn = None;
    while spawn.is_none() {
        match read_packet(&mut stream).await? {
            Packet::ServerIdentification { name, motd, .. } => {
                println!("Server: {} ({})", name, motd);
            }
            Packet::LevelDataChunk { data, percent } => {
                compressed.extend_from_slice(&data);
                println!("Level download {}%", percent);
            }
            Packet::LevelFinalize {
                width,
                height,
                length,
            } => {
                let blocks = level_data::decompress(&compressed)?;
                println!(
                    "Level {}x{}x{} ({} blocks)",
                    width,
                    height,
                    length,
                    blocks.len()
                );
            }
            Packet::SpawnPlayer {
                id: protocol::SELF_ID,
                location,
                ..
            } => spawn = Some(location),
            Packet::Disconnect { reason } => {
                println!("Kicked: {}", reason);
                return Ok(());
            }
            other => println!("Received packet: {:?}", other),
        }
    }

    send(
        &mut stream,
        &Packet::ChatMessage {
            partial: false,
            text: "hello from the test client".to_string(),
        },
    )
    .await?;

    // Walk along x for a few steps
    if let Some(mut location) = spawn {
        for _ in 0..5 {
            location.x += 16;
            send(
                &mut stream,
                &Packet::PlayerPosition {
                    held_block: 0,
                    location,
                },
            )
            .await?;
            sleep(Duration::from_millis(200)).await;
        }
    }

    // Print whatever arrives for a moment, then leave
    while let Ok(packet) = timeout(Duration::from_secs(2), read_packet(&mut stream)).await {
        match packet? {
            Packet::Ping => {}
            packet => println!("Received packet: {:?}", packet),
        }
    }

    println!("Test client finished");
    Ok(())
}
