//! Daemon status and shutdown commands.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json, post_json};

// ── Response types ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct StatusResponse {
    uptime_secs: u64,
    recordings_dir: String,
    streams: Vec<StreamTag>,
    sessions: Vec<LiveSession>,
}

#[derive(Deserialize)]
struct StreamTag {
    tag: u8,
    stream: String,
}

#[derive(Deserialize)]
pub(crate) struct LiveSession {
    pub session_id: String,
    pub connected_secs: u64,
    pub open_streams: Vec<OpenStream>,
    pub clips: usize,
    pub pending_finalizations: usize,
}

#[derive(Deserialize)]
pub(crate) struct OpenStream {
    pub stream_type: String,
    pub clip_number: u32,
    pub bytes_written: u64,
    pub idle_secs: Option<f64>,
}

#[derive(Deserialize)]
struct ShutdownResponse {
    message: String,
    live_sessions: usize,
}

// ── Commands ──────────────────────────────────────────────────────────────────

pub async fn cmd_status(port: u16) -> Result<()> {
    let resp: StatusResponse = get_json(&format!("{}/status", base_url(port))).await?;

    println!("═══════════════════════════════════════");
    println!("  Clipstream Daemon Status");
    println!("═══════════════════════════════════════");
    println!("  Uptime          : {}s", resp.uptime_secs);
    println!("  Recordings      : {}", resp.recordings_dir);
    println!("  Live sessions   : {}", resp.sessions.len());
    let tags: Vec<String> = resp
        .streams
        .iter()
        .map(|t| format!("{}={}", t.tag, t.stream))
        .collect();
    println!("  Substream tags  : {}", tags.join(", "));

    if resp.sessions.is_empty() {
        println!("\n  No live sessions.");
    } else {
        println!("\n  Sessions:");
        for s in &resp.sessions {
            print_live(s);
        }
    }

    Ok(())
}

pub(crate) fn print_live(s: &LiveSession) {
    println!("  ┌─ {}", s.session_id);
    println!("  │  connected : {}s", s.connected_secs);
    println!("  │  clips     : {}", s.clips);
    println!("  │  pending   : {}", s.pending_finalizations);
    if s.open_streams.is_empty() {
        println!("  └─ no open streams");
        return;
    }
    let last = s.open_streams.len() - 1;
    for (i, o) in s.open_streams.iter().enumerate() {
        let branch = if i == last { "└─" } else { "├─" };
        let idle = o
            .idle_secs
            .map(|t| format!("{:.1}s idle", t))
            .unwrap_or_else(|| "no data yet".to_string());
        println!(
            "  {} {} #{}  {} bytes, {}",
            branch, o.stream_type, o.clip_number, o.bytes_written, idle
        );
    }
}

pub async fn cmd_shutdown(port: u16) -> Result<()> {
    let resp: ShutdownResponse = post_json(&format!("{}/daemon/shutdown", base_url(port))).await?;
    println!("{}", resp.message);
    if resp.live_sessions > 0 {
        println!("Draining {} live session(s).", resp.live_sessions);
    }
    Ok(())
}
