//! Interactive Knot client.
//!
//! Demonstrates:
//! - Building a client with a durable owned-star file
//! - Connecting and printing the event stream
//! - Pairing, entering a session, chatting and drawing from stdin
//!
//! Usage:
//!   cargo run --example knot_cli
//!   cargo run --example knot_cli -- --server ws://localhost:5002
//!   cargo run --example knot_cli -- --debug
//!   cargo run --example knot_cli -- --clean
//!
//! Commands:
//!   claim <star>            own a star
//!   release <star>          stop claiming a star
//!   request <star>          ask a star's owner for a Knot
//!   accept <request>        accept an incoming request
//!   reject <request>        reject an incoming request
//!   enter <star> [room]     enter a Knot directly
//!   leave | exit            leave the session / dismiss it
//!   chat <text>             send a chat message
//!   draw x,y x,y ...        draw one stroke
//!   undo | clear            edit the canvas
//!   color <#hex|1-7> | width <n|s|m|l> | tool <pen|eraser>
//!   palette                 list toolbar colors and sizes
//!   status | quit

// ============================================================================
// Imports
// ============================================================================

use std::path::PathBuf;

use anyhow::{Context, bail};
use knot_client::canvas::{BRUSH_SIZES, PALETTE};
use knot_client::{
    ConnectionNotice, GatewayNotice, KnotClient, KnotEvent, RequestId, RoomId, SessionNotice,
    StarId, Tool,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Constants
// ============================================================================

const DEFAULT_SERVER: &str = "ws://localhost:5002";

// ============================================================================
// Args
// ============================================================================

#[derive(Debug, Clone)]
struct Args {
    debug: bool,
    clean: bool,
    server: String,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let server = args
            .iter()
            .position(|a| a == "--server")
            .and_then(|i| args.get(i + 1))
            .cloned()
            .unwrap_or_else(|| DEFAULT_SERVER.to_string());

        Self {
            debug: args.iter().any(|a| a == "--debug"),
            clean: args.iter().any(|a| a == "--clean"),
            server,
        }
    }
}

fn init_logging(debug: bool) {
    let filter = if debug {
        "knot_client=debug"
    } else {
        "knot_client=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}

fn stars_path() -> anyhow::Result<PathBuf> {
    let dir = dirs::data_dir()
        .context("could not determine data directory")?
        .join("knot");
    std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    Ok(dir.join("owned_stars.json"))
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    println!("=== Knot CLI ===\n");

    let path = stars_path()?;
    if args.clean && path.exists() {
        std::fs::remove_file(&path).ok();
        println!("[Setup] Owned stars cleared");
    }

    let client = KnotClient::builder()
        .server_url(&args.server)
        .owned_stars_path(&path)
        .build()?;
    println!("[1] Owned stars: {:?}", client.owned_stars());

    let mut events = client.take_events().context("event stream already taken")?;
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(&event);
        }
    });

    println!("[2] Connecting to {}...", args.server);
    let sid = client.connect().await?;
    println!("    ✓ Connected as {sid}\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "quit" {
            break;
        }
        if let Err(e) = execute(&client, line) {
            println!("    ✗ {e:#}");
        }
    }

    client.exit_knot();
    client.disconnect();
    println!("Bye.");
    Ok(())
}

// ============================================================================
// Commands
// ============================================================================

fn execute(client: &KnotClient, line: &str) -> anyhow::Result<()> {
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    match command {
        "claim" => {
            let added = client.claim_star(required(rest, "star")?)?;
            println!("    ✓ Claimed{}", if added { "" } else { " (already owned)" });
        }
        "release" => {
            if !client.release_star(&StarId::from(required(rest, "star")?))? {
                println!("    Not owned");
            }
        }
        "request" => client.request_connection(required(rest, "star")?)?,
        "accept" => client.accept_request(&RequestId::from(required(rest, "request")?))?,
        "reject" => client.reject_request(&RequestId::from(required(rest, "request")?))?,
        "enter" => {
            let mut parts = rest.split_whitespace();
            let star = required(parts.next().unwrap_or_default(), "star")?;
            client.enter_knot(star, parts.next().map(RoomId::from))?;
        }
        "leave" => client.leave_knot()?,
        "exit" => client.exit_knot(),
        "chat" => {
            let message = client.send_chat(rest)?;
            println!("    [me] {}", message.text);
        }
        "draw" => draw(client, rest)?,
        "undo" => {
            if !client.undo() {
                println!("    Nothing to undo");
            }
        }
        "clear" => client.clear_canvas()?,
        "color" => client.set_color(color(required(rest, "color")?)?)?,
        "width" => client.set_width(width(required(rest, "width")?)?)?,
        "palette" => {
            for (index, color) in PALETTE.iter().enumerate() {
                println!("    {}: {color}", index + 1);
            }
            println!("    sizes: s={} m={} l={}", BRUSH_SIZES[0], BRUSH_SIZES[1], BRUSH_SIZES[2]);
        }
        "tool" => match rest {
            "pen" => client.set_tool(Tool::Pen),
            "eraser" => client.set_tool(Tool::Eraser),
            other => bail!("unknown tool '{other}'"),
        },
        "status" => {
            println!("    Connection: {:?}", client.connection_state());
            println!("    Session: {}", client.session_status());
            if let Some(remaining) = client.display_remaining() {
                println!("    Remaining: {}:{:02}", remaining / 60, remaining % 60);
            }
            println!("    Strokes: {}", client.strokes().len());
            println!("    Messages: {}", client.timeline().len());
            let expired = client.expire_requests();
            println!(
                "    Requests: {} out, {} in ({expired} expired)",
                client.outgoing_requests().len(),
                client.incoming_requests().len()
            );
        }
        other => bail!("unknown command '{other}'"),
    }
    Ok(())
}

fn required<'a>(value: &'a str, name: &str) -> anyhow::Result<&'a str> {
    if value.is_empty() {
        bail!("missing <{name}>");
    }
    Ok(value)
}

/// A palette index (1-based) or a literal color.
fn color(value: &str) -> anyhow::Result<&str> {
    match value.parse::<usize>() {
        Ok(index) => PALETTE
            .get(index.wrapping_sub(1))
            .copied()
            .with_context(|| format!("palette has {} colors", PALETTE.len())),
        Err(_) => Ok(value),
    }
}

/// A toolbar size (`s`, `m`, `l`) or a literal width.
fn width(value: &str) -> anyhow::Result<f32> {
    Ok(match value {
        "s" => BRUSH_SIZES[0],
        "m" => BRUSH_SIZES[1],
        "l" => BRUSH_SIZES[2],
        other => other.parse()?,
    })
}

fn draw(client: &KnotClient, points: &str) -> anyhow::Result<()> {
    let mut parsed = Vec::new();
    for pair in points.split_whitespace() {
        let (x, y) = pair.split_once(',').context("points are x,y")?;
        parsed.push((x.parse::<f64>()?, y.parse::<f64>()?));
    }
    let Some(((x0, y0), rest)) = parsed.split_first() else {
        bail!("draw needs at least one point");
    };

    client.pointer_down(*x0, *y0)?;
    for (x, y) in rest {
        client.pointer_move(*x, *y)?;
    }
    client.pointer_up()?;
    println!("    ✓ Stroke of {} points", parsed.len());
    Ok(())
}

// ============================================================================
// Output
// ============================================================================

fn print_event(event: &KnotEvent) {
    match event {
        KnotEvent::Connection(ConnectionNotice::Connected { sid, reconnected }) => {
            println!("[conn] connected as {sid}{}", if *reconnected { " (reconnected)" } else { "" });
        }
        KnotEvent::Connection(ConnectionNotice::Disconnected { reason }) => {
            println!("[conn] disconnected: {reason}");
        }
        KnotEvent::Connection(ConnectionNotice::Reconnecting { attempt, max }) => {
            println!("[conn] reconnecting {attempt}/{max}...");
        }
        KnotEvent::Connection(ConnectionNotice::Failed { attempts }) => {
            println!("[conn] gave up after {attempts} attempts");
        }
        KnotEvent::Pairing(GatewayNotice::IncomingRequest {
            request_id,
            star_id,
            message,
        }) => {
            println!("[pair] {message} (star {star_id}) - accept {request_id} / reject {request_id}");
        }
        KnotEvent::Pairing(notice) => println!("[pair] {notice:?}"),
        KnotEvent::Session(SessionNotice::StateChanged { from, to }) => {
            println!("[knot] {from} -> {to}");
        }
        KnotEvent::Session(SessionNotice::ChatMessage(message)) => {
            println!("[chat] {}: {}", message.sender_id, message.text);
        }
        KnotEvent::Session(SessionNotice::TimerWarning { message, .. }) => {
            println!("[knot] {message}");
        }
        KnotEvent::Session(SessionNotice::Timer { .. }) => {}
        KnotEvent::Session(notice) => println!("[knot] {notice:?}"),
    }
}
