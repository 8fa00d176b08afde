use std::io::{self, Write};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::*;
use diffsync::{
    Connection, DiffEngine, Edit, EditMessage, EditProcessor, InMemoryAdapter, InMemoryTransport, RoomStore,
    SaveCoalescer, SessionRouter,
};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "sync-demo")]
#[command(about = "Interactive demonstration of differential synchronization")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive demo with two users editing the same room simultaneously
    Interactive {
        #[arg(short, long, default_value = "The quick brown fox jumps over the lazy dog")]
        initial_text: String,
    },
    /// Scripted concurrent-edit scenario (join, edit, cross-client propagation)
    Simulate,
    /// Time a batch of join + edit + sync cycles
    Benchmark {
        #[arg(short, long, default_value = "1000")]
        iterations: usize,
    },
}

/// A connected demo user: a transport-facing identity plus a human label.
struct DemoUser {
    id: String,
    label: &'static str,
    color: &'static str,
}

impl Connection for DemoUser {
    fn id(&self) -> &str {
        &self.id
    }
    fn user_id(&self) -> &str {
        &self.id
    }
}

impl DemoUser {
    fn paint(&self, text: &str) -> ColoredString {
        match self.color {
            "blue" => text.blue().bold(),
            "green" => text.green().bold(),
            _ => text.normal(),
        }
    }
}

/// Everything needed to drive the room-based sync pipeline from a CLI binary,
/// backed by the in-memory adapter/transport pair (no real network or disk I/O).
struct Harness {
    room_store: Arc<RoomStore>,
    router: SessionRouter,
    transport: Arc<InMemoryTransport>,
}

impl Harness {
    fn new() -> Self {
        let adapter = Arc::new(InMemoryAdapter::new());
        let room_store = Arc::new(RoomStore::new(adapter.clone()));
        let transport = Arc::new(InMemoryTransport::new());
        let save_coalescer = Arc::new(SaveCoalescer::new(adapter.clone()));
        let edit_processor = Arc::new(EditProcessor::new(
            room_store.clone(),
            DiffEngine::new(),
            adapter,
            transport.clone(),
            save_coalescer,
        ));
        let router = SessionRouter::new(room_store.clone(), edit_processor, transport.clone());
        Self {
            room_store,
            router,
            transport,
        }
    }

    async fn room_document(&self, room: &str) -> Value {
        self.room_store
            .get_data(room, "demo")
            .await
            .expect("in-memory adapter never fails")
            .lock()
            .await
            .server_copy
            .clone()
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Interactive { initial_text } => run_interactive_demo(initial_text).await,
        Commands::Simulate => run_simulation().await,
        Commands::Benchmark { iterations } => run_benchmark(iterations).await,
    }
}

async fn run_interactive_demo(initial_text: String) {
    println!("{}", "=== Differential Synchronization Demo ===".bold().cyan());
    println!("Alice and Bob are joined to the same room and edit a shared \"text\" field.");
    println!("Commands: 'a <text>' (Alice edits), 'b <text>' (Bob edits), 's' (sync both), 'q' (quit)\n");

    let harness = Harness::new();
    harness.room_store.get_data("demo", "demo").await.unwrap().lock().await.server_copy = json!({ "text": initial_text });

    let alice = DemoUser {
        id: "alice".to_string(),
        label: "Alice",
        color: "blue",
    };
    let bob = DemoUser {
        id: "bob".to_string(),
        label: "Bob",
        color: "green",
    };
    harness.router.join(&alice, "demo").await.unwrap();
    harness.router.join(&bob, "demo").await.unwrap();

    print_state(&harness, &alice, &bob).await;

    loop {
        print!("\n> ");
        io::stdout().flush().unwrap();

        let mut input = String::new();
        if io::stdin().read_line(&mut input).unwrap() == 0 {
            break;
        }
        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        match input.chars().next() {
            Some('q') => {
                println!("Goodbye!");
                break;
            }
            Some('s') => {
                println!("{}", "=== Synchronizing ===".yellow());
                sync_once(&harness, &alice).await;
                sync_once(&harness, &bob).await;
                print_state(&harness, &alice, &bob).await;
            }
            Some(c @ ('a' | 'b')) => {
                let text = input[1..].trim();
                if !text.is_empty() {
                    let user = if c == 'a' { &alice } else { &bob };
                    edit_local_text(&harness, user, text).await;
                    println!("{} {} edited document", "✏️".green(), user.paint(user.label));
                    print_state(&harness, &alice, &bob).await;
                }
            }
            Some('h') | Some('?') => print_help(),
            _ => println!("Unknown command. Type 'h' for help."),
        }
    }
}

/// Computes this user's local edit against their shadow, advances their shadow,
/// and hands the resulting edit message straight to the server (a real client
/// would instead hold it in an outbox until the next sync tick).
async fn edit_local_text(harness: &Harness, user: &DemoUser, new_text: &str) {
    let room_handle = harness.room_store.get_data("demo", "demo").await.unwrap();
    let (shadow_doc, shadow_server_version, shadow_local_version) = {
        let room = room_handle.lock().await;
        let client = room.clients.get(user.id()).expect("joined above");
        (
            client.shadow.doc.clone(),
            client.shadow.server_version,
            client.shadow.local_version,
        )
    };

    let engine = DiffEngine::new();
    let new_doc = merge_text(&shadow_doc, new_text);
    let diff = engine.diff(&shadow_doc, &new_doc);
    if diff.is_empty() {
        return;
    }

    let msg = EditMessage {
        room: "demo".to_string(),
        server_version: Some(shadow_server_version),
        edits: vec![Edit {
            server_version: shadow_server_version,
            local_version: shadow_local_version,
            diff,
        }],
    };
    harness.router.sync_with_server(user, msg).await.unwrap();
    harness.transport.drain(user.id()).await;
}

fn merge_text(doc: &Value, new_text: &str) -> Value {
    let mut doc = doc.clone();
    doc["text"] = json!(new_text);
    doc
}

/// Sends an empty edit message (a pure acknowledgement/poll) so this user picks
/// up any diffs the other user's edits produced.
async fn sync_once(harness: &Harness, user: &DemoUser) {
    let room_handle = harness.room_store.get_data("demo", "demo").await.unwrap();
    let server_version = {
        let room = room_handle.lock().await;
        room.clients.get(user.id()).expect("joined above").shadow.server_version
    };
    let msg = EditMessage {
        room: "demo".to_string(),
        server_version: Some(server_version),
        edits: vec![],
    };
    harness.router.sync_with_server(user, msg).await.unwrap();
    harness.transport.drain(user.id()).await;
}

async fn print_state(harness: &Harness, alice: &DemoUser, bob: &DemoUser) {
    let room_handle = harness.room_store.get_data("demo", "demo").await.unwrap();
    let room = room_handle.lock().await;
    println!("\n{}", "Current State:".bold());
    println!(
        "  server copy: \"{}\"",
        truncate_text(&room.server_copy["text"].as_str().unwrap_or(""), 60)
    );
    for user in [alice, bob] {
        let shadow_text = room
            .clients
            .get(user.id())
            .map(|c| c.shadow.doc["text"].as_str().unwrap_or("").to_string())
            .unwrap_or_default();
        println!("  {} shadow: \"{}\"", user.paint(user.label), truncate_text(&shadow_text, 60));
    }
}

async fn run_simulation() {
    println!("{}", "=== Concurrent Edit Simulation ===".bold().cyan());

    let harness = Harness::new();
    harness.room_store.get_data("demo", "demo").await.unwrap().lock().await.server_copy =
        json!({ "text": "The cat sat on the mat." });

    let alice = DemoUser {
        id: "alice".to_string(),
        label: "Alice",
        color: "blue",
    };
    let bob = DemoUser {
        id: "bob".to_string(),
        label: "Bob",
        color: "green",
    };
    harness.router.join(&alice, "demo").await.unwrap();
    harness.router.join(&bob, "demo").await.unwrap();

    let alice_edits = [
        "The big cat sat on the mat.",
        "The big black cat sat on the mat.",
        "The big black cat sat on the soft mat.",
    ];
    let bob_edits = [
        "The cat sat on the red mat.",
        "The cat sat peacefully on the red mat.",
        "The cat sat peacefully on the red woolen mat.",
    ];

    print_state(&harness, &alice, &bob).await;

    for (i, (a_text, b_text)) in alice_edits.iter().zip(bob_edits.iter()).enumerate() {
        println!("\n{}", format!("=== Iteration {} ===", i + 1).yellow());

        edit_local_text(&harness, &alice, a_text).await;
        edit_local_text(&harness, &bob, b_text).await;
        println!("After concurrent edits (each client's own write only):");
        print_state(&harness, &alice, &bob).await;

        // A follow-up sync each drains the other's change off the server.
        sync_once(&harness, &alice).await;
        sync_once(&harness, &bob).await;

        println!("After synchronization:");
        print_state(&harness, &alice, &bob).await;

        let converged = harness.room_document("demo").await == json!({ "text": b_text });
        if converged {
            println!("{} Bob's shadow is still the server copy (last write won).", "ℹ️".cyan());
        }
    }
}

async fn run_benchmark(iterations: usize) {
    println!("{}", "=== Synchronization Benchmark ===".bold().cyan());

    let start = std::time::Instant::now();
    let mut total_edits_sent = 0usize;

    for i in 0..iterations {
        let harness = Harness::new();
        harness.room_store.get_data("room", "demo").await.unwrap().lock().await.server_copy =
            json!({ "text": format!("Document {i} content") });

        let alice = DemoUser {
            id: "alice".to_string(),
            label: "Alice",
            color: "blue",
        };
        harness.router.join(&alice, "room").await.unwrap();
        edit_local_text_in_room(&harness, &alice, "room", &format!("Alice modified document {i}")).await;
        total_edits_sent += 1;
    }

    let duration = start.elapsed();
    println!("Completed {iterations} join+edit+sync cycles in {duration:?}");
    println!("Total edits processed: {total_edits_sent}");
    println!("Average time per cycle: {:?}", duration / iterations.max(1) as u32);
}

async fn edit_local_text_in_room(harness: &Harness, user: &DemoUser, room: &str, new_text: &str) {
    let room_handle = harness.room_store.get_data(room, "demo").await.unwrap();
    let (shadow_doc, shadow_server_version, shadow_local_version) = {
        let r = room_handle.lock().await;
        let client = r.clients.get(user.id()).expect("joined above");
        (client.shadow.doc.clone(), client.shadow.server_version, client.shadow.local_version)
    };
    let engine = DiffEngine::new();
    let new_doc = merge_text(&shadow_doc, new_text);
    let diff = engine.diff(&shadow_doc, &new_doc);
    let msg = EditMessage {
        room: room.to_string(),
        server_version: Some(shadow_server_version),
        edits: vec![Edit {
            server_version: shadow_server_version,
            local_version: shadow_local_version,
            diff,
        }],
    };
    harness.router.sync_with_server(user, msg).await.unwrap();
    harness.transport.drain(user.id()).await;
}

fn truncate_text(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        text.to_string()
    } else {
        format!("{}...", &text[..max_len.saturating_sub(3)])
    }
}

fn print_help() {
    println!("\n{}", "Available Commands:".bold());
    println!("  {} <text>  - Edit Alice's document", "a".blue().bold());
    println!("  {} <text>  - Edit Bob's document", "b".green().bold());
    println!("  {}         - Synchronize both clients", "s".yellow().bold());
    println!("  {}         - Show this help", "h".white().bold());
    println!("  {}         - Quit", "q".red().bold());
}
