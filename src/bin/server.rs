use std::sync::Arc;

use clap::Parser;
use colored::*;
use diffsync::net::messages::{deserialize_message, WireMessage};
use diffsync::net::tcp::TcpTransport;
use diffsync::{Connection, DiffEngine, EditProcessor, RoomStore, SaveCoalescer, SessionRouter, SqliteAdapter, Transport};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "sync-server")]
#[command(about = "Differential synchronization server with SQLite persistence")]
struct Cli {
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    address: String,

    #[arg(short, long, default_value = "documents.db")]
    database_path: String,
}

struct TcpConnection {
    id: String,
    user_id: String,
}

impl Connection for TcpConnection {
    fn id(&self) -> &str {
        &self.id
    }
    fn user_id(&self) -> &str {
        &self.user_id
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let cli = Cli::parse();

    println!("{}", "Starting differential sync server".green().bold());
    println!("address: {}", cli.address.cyan());
    println!("database: {}", cli.database_path.cyan());

    let adapter = Arc::new(SqliteAdapter::open(&cli.database_path)?);
    let room_store = Arc::new(RoomStore::new(adapter.clone()));
    let transport = Arc::new(TcpTransport::new());
    let save_coalescer = Arc::new(SaveCoalescer::new(adapter.clone()));
    let edit_processor = Arc::new(EditProcessor::new(
        room_store.clone(),
        DiffEngine::new(),
        adapter,
        transport.clone(),
        save_coalescer,
    ));
    let router = Arc::new(SessionRouter::new(room_store, edit_processor, transport.clone()));

    let listener = TcpListener::bind(&cli.address).await?;
    println!("{}", "Listening for connections...".yellow());

    loop {
        let (socket, peer) = listener.accept().await?;
        let router = router.clone();
        let transport = transport.clone();

        tokio::spawn(async move {
            let connection_id = Uuid::new_v4().to_string();
            info!(%connection_id, %peer, "connection accepted");

            let (read_half, write_half) = socket.into_split();
            transport.register(connection_id.clone(), write_half);

            let mut joined_room: Option<String> = None;
            let mut reader = BufReader::new(read_half).lines();

            loop {
                let line = match reader.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(err) => {
                        warn!(%connection_id, error = %err, "read error, closing connection");
                        break;
                    }
                };
                let Ok(message) = deserialize_message(&line) else {
                    warn!(%connection_id, "ignoring malformed frame");
                    continue;
                };

                match message {
                    WireMessage::Join { room, user_id } => {
                        let conn = TcpConnection {
                            id: connection_id.clone(),
                            user_id,
                        };
                        match router.join(&conn, &room).await {
                            Ok(document) => {
                                joined_room = Some(room.clone());
                                transport.reply_joined(&connection_id, room, document).await;
                            }
                            Err(err) => error!(%connection_id, error = %err, "join failed"),
                        }
                    }
                    WireMessage::Sync(edit_message) => {
                        let Some(room) = joined_room.as_deref() else {
                            transport.emit_error(&connection_id, "join a room before syncing").await;
                            continue;
                        };
                        let conn = TcpConnection {
                            id: connection_id.clone(),
                            user_id: connection_id.clone(),
                        };
                        if edit_message.room != room {
                            transport.emit_error(&connection_id, "sync for a room you haven't joined").await;
                            continue;
                        }
                        if let Err(err) = router.sync_with_server(&conn, edit_message).await {
                            error!(%connection_id, error = %err, "sync failed");
                        }
                    }
                    WireMessage::Ping => transport.send_pong(&connection_id).await,
                    WireMessage::Disconnect => break,
                    _ => {}
                }
            }

            if let Some(room) = joined_room {
                let conn = TcpConnection {
                    id: connection_id.clone(),
                    user_id: connection_id.clone(),
                };
                router.disconnect(&conn, &room).await;
            }
            transport.unregister(&connection_id);
            info!(%connection_id, "connection closed");
        });
    }
}
