//! Session listing and management commands.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, delete_json, get_json};
use super::status::{print_live, LiveSession};

#[derive(Deserialize)]
struct SessionSummary {
    session_id: String,
    start_time: String,
    clips: usize,
    live: bool,
}

#[derive(Deserialize)]
struct Clip {
    #[serde(rename = "type")]
    stream_type: String,
    filename: String,
    start_time: f64,
    end_time: f64,
    clip_number: u32,
}

#[derive(Deserialize)]
struct InspectResponse {
    id: String,
    start_time: String,
    clips: Vec<Clip>,
    live: bool,
    status: Option<LiveSession>,
}

pub async fn cmd_sessions(port: u16) -> Result<()> {
    let resp: Vec<SessionSummary> = get_json(&format!("{}/sessions", base_url(port))).await?;

    if resp.is_empty() {
        println!("No recorded sessions.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Recorded Sessions ({})", resp.len());
    println!("═══════════════════════════════════════");
    for s in &resp {
        let live = if s.live { "  [live]" } else { "" };
        println!("  {}  {}  {} clips{}", s.session_id, s.start_time, s.clips, live);
    }
    Ok(())
}

pub async fn cmd_session_inspect(port: u16, session_id: &str) -> Result<()> {
    let resp: InspectResponse =
        get_json(&format!("{}/sessions/{}", base_url(port), session_id)).await?;

    println!("═══════════════════════════════════════");
    println!("  Session Details");
    println!("═══════════════════════════════════════");
    println!("  ID       : {}", resp.id);
    println!("  Started  : {}", resp.start_time);
    println!("  Live     : {}", resp.live);
    println!("  Clips    : {}", resp.clips.len());

    for c in &resp.clips {
        println!(
            "    {:<8} #{:<3} {:>9.3}s → {:>9.3}s  {}",
            c.stream_type, c.clip_number, c.start_time, c.end_time, c.filename
        );
    }

    if let Some(status) = &resp.status {
        println!();
        print_live(status);
    }
    Ok(())
}

pub async fn cmd_session_drop(port: u16, session_id: &str) -> Result<()> {
    #[derive(Deserialize)]
    struct DropResponse {
        session_id: String,
        dropped: bool,
    }

    let resp: DropResponse =
        delete_json(&format!("{}/sessions/{}", base_url(port), session_id)).await?;

    if resp.dropped {
        println!("✓ Session disconnected: {} (open clips are being finalized)", resp.session_id);
    } else {
        println!("Session not live: {}", session_id);
    }
    Ok(())
}
