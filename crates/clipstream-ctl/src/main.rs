//! clipstream-ctl: command-line interface for the clipstream daemon.

use anyhow::{Context, Result};

mod cmd;

const DEFAULT_PORT: u16 = 3000;

fn print_usage() {
    println!("Usage: clipstream-ctl [--port <port>] <command>");
    println!();
    println!("Commands:");
    println!("  status          Show daemon status and live sessions");
    println!("  sessions        List recorded sessions");
    println!("  session <id>    Show a session's clips");
    println!("  drop <id>       Disconnect a live session");
    println!("  shutdown        Drain live sessions and stop the daemon");
    println!();
    println!("Options:");
    println!("  --port <port>   Daemon port (default: {})", DEFAULT_PORT);
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    // Parse --port option
    let mut port = DEFAULT_PORT;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--port" {
            i += 1;
            port = args
                .get(i)
                .context("--port requires a value")?
                .parse()
                .context("--port must be a number")?;
        } else {
            remaining.push(&args[i]);
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["status"] | [] => cmd::status::cmd_status(port).await,
        ["sessions"] => cmd::sessions::cmd_sessions(port).await,
        ["session", id] => cmd::sessions::cmd_session_inspect(port, id).await,
        ["drop", id] => cmd::sessions::cmd_session_drop(port, id).await,
        ["shutdown"] => cmd::status::cmd_shutdown(port).await,
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
