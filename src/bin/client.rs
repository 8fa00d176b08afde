use std::sync::Arc;

use clap::Parser;
use colored::*;
use diffsync::net::messages::{deserialize_message, serialize_message, WireMessage};
use diffsync::{Delta, DiffEngine, Edit, EditMessage, Reply};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};

#[derive(Parser)]
#[command(name = "sync-client")]
#[command(about = "Differential synchronization client")]
struct Cli {
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    server: String,

    #[arg(short, long)]
    client_id: Option<String>,

    #[arg(short, long, default_value = "demo")]
    room: String,
}

/// Client-side mirror of the server's per-(room, client) bookkeeping.
/// Unlike `ClientSyncState`, this tracks things from the *client's* point of
/// view: `document` is the user's own working copy, `shadow` is the last state
/// this client believes the server has acknowledged.
struct ClientState {
    document: Value,
    shadow: Value,
    server_version: u64,
    local_version: u64,
    pending: Vec<Edit>,
}

impl ClientState {
    fn new(seed: Value) -> Self {
        Self {
            document: seed.clone(),
            shadow: seed,
            server_version: 0,
            local_version: 0,
            pending: Vec::new(),
        }
    }

    /// Diffs a local edit against the shadow and, if it's non-empty, queues it
    /// and returns the message to send to the server.
    fn local_edit(&mut self, engine: &DiffEngine, new_document: Value) -> Option<EditMessage> {
        let diff = engine.diff(&self.shadow, &new_document);
        if diff.is_empty() {
            self.document = new_document;
            return None;
        }
        self.pending.push(Edit {
            server_version: self.server_version,
            local_version: self.local_version,
            diff,
        });
        self.shadow = new_document.clone();
        self.document = new_document;
        self.local_version += 1;
        Some(self.outgoing_message())
    }

    fn outgoing_message(&self) -> EditMessage {
        EditMessage {
            room: String::new(), // filled in by the caller, which knows the room
            server_version: Some(self.server_version),
            edits: self.pending.clone(),
        }
    }

    /// Applies a server reply: drops pending edits the server has acknowledged
    /// and applies the server's own outbound diffs to both `shadow` and `document`.
    fn apply_reply(&mut self, engine: &DiffEngine, reply: &Reply) {
        self.pending.retain(|e| e.local_version >= reply.local_version);

        for edit in &reply.edits {
            if edit.server_version != self.server_version {
                continue;
            }
            if let Ok(patched) = engine.patch(&self.shadow, &edit.diff) {
                self.shadow = patched.clone();
                if let Ok(doc_patched) = engine.patch(&self.document, &edit.diff) {
                    self.document = doc_patched;
                }
                if !matches!(edit.diff, Delta::Empty) {
                    self.server_version += 1;
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client_id = cli.client_id.unwrap_or_else(|| format!("client-{}", rand::random::<u32>()));

    println!("{}", "Starting differential sync client".blue().bold());
    println!("server: {}", cli.server.cyan());
    println!("client id: {}", client_id.green());
    println!("room: {}", cli.room.cyan());

    let stream = TcpStream::connect(&cli.server).await?;
    let (read_half, mut write_half) = stream.into_split();

    write_half
        .write_all(&serialize_message(&WireMessage::Join {
            room: cli.room.clone(),
            user_id: client_id.clone(),
        })?)
        .await?;

    let (tx, mut rx) = mpsc::channel::<WireMessage>(32);
    tokio::spawn(async move {
        let mut lines = BufReader::new(read_half).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Ok(message) = deserialize_message(&line) {
                if tx.send(message).await.is_err() {
                    break;
                }
            }
        }
    });

    let state: Arc<Mutex<Option<ClientState>>> = Arc::new(Mutex::new(None));
    let engine = DiffEngine::new();
    let room = cli.room.clone();

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    print_help();

    loop {
        tokio::select! {
            line = stdin.next_line() => {
                let Ok(Some(line)) = line else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match line.chars().next() {
                    Some('q') => {
                        let _ = write_half.write_all(&serialize_message(&WireMessage::Disconnect)?).await;
                        break;
                    }
                    Some('e') => {
                        let text = line[1..].trim().to_string();
                        let mut guard = state.lock().await;
                        if let Some(client_state) = guard.as_mut() {
                            let new_doc = merge_text(&client_state.document, &text);
                            if let Some(mut msg) = client_state.local_edit(&engine, new_doc) {
                                msg.room = room.clone();
                                write_half.write_all(&serialize_message(&WireMessage::Sync(msg))?).await?;
                            }
                        } else {
                            println!("{}", "not joined yet".red());
                        }
                    }
                    Some('s') => {
                        let guard = state.lock().await;
                        if let Some(client_state) = guard.as_ref() {
                            let msg = EditMessage {
                                room: room.clone(),
                                server_version: Some(client_state.server_version),
                                edits: client_state.pending.clone(),
                            };
                            write_half.write_all(&serialize_message(&WireMessage::Sync(msg))?).await?;
                        }
                    }
                    Some('h') | Some('?') => print_help(),
                    _ => println!("Unknown command. Type 'h' for help."),
                }
            }
            incoming = rx.recv() => {
                let Some(message) = incoming else { break };
                match message {
                    WireMessage::Joined { document, .. } => {
                        *state.lock().await = Some(ClientState::new(document.clone()));
                        println!("{} joined room, initial document: {}", "✅".green(), document);
                    }
                    WireMessage::Reply(reply) => {
                        let mut guard = state.lock().await;
                        if let Some(client_state) = guard.as_mut() {
                            client_state.apply_reply(&engine, &reply);
                            println!("{} document: {}", "📄".cyan(), client_state.document);
                        }
                    }
                    WireMessage::RemoteUpdate { .. } => {
                        let guard = state.lock().await;
                        if let Some(client_state) = guard.as_ref() {
                            let msg = EditMessage {
                                room: room.clone(),
                                server_version: Some(client_state.server_version),
                                edits: client_state.pending.clone(),
                            };
                            drop(guard);
                            write_half.write_all(&serialize_message(&WireMessage::Sync(msg))?).await?;
                        }
                    }
                    WireMessage::Error { message } => println!("{} {}", "error:".red().bold(), message),
                    WireMessage::Pong => {}
                    _ => {}
                }
            }
        }
    }

    println!("Goodbye!");
    Ok(())
}

fn merge_text(doc: &Value, new_text: &str) -> Value {
    let mut doc = doc.clone();
    doc["text"] = json!(new_text);
    doc
}

fn print_help() {
    println!("\n{}", "Available Commands:".bold());
    println!("  {} <text>  - Edit the document's \"text\" field", "e".blue().bold());
    println!("  {}         - Re-send any pending edits / poll for updates", "s".yellow().bold());
    println!("  {}         - Show this help", "h".white().bold());
    println!("  {}         - Quit", "q".red().bold());
}
