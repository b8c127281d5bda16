use crate::*;

use clipstream_services::session::{list_sessions, load_session};

#[tokio::test]
async fn metadata_on_disk_matches_live_clip_log() -> Result<()> {
    let mut h = Harness::start(ScriptedFinalizer::new()).await?;

    h.start_stream("camera").await?;
    h.start_stream("screen").await?;
    h.frame(b"c0", 0x00)?;
    h.control("camera", "stop")?;
    h.start_stream("camera").await?;
    h.frame(b"c1", 0x00)?;
    h.frame(b"s0", 0x01)?;
    h.close().await?;

    let record = load_session(h.root.path(), h.session.id()).await?;
    assert_eq!(record, h.session.record().await);
    assert_eq!(record.clips.len(), 3);

    // Substreams may interleave; within one, clips are logged in order.
    let camera: Vec<u32> = record
        .clips
        .iter()
        .filter(|c| c.stream_type == "camera")
        .map(|c| c.clip_number)
        .collect();
    assert_eq!(camera, vec![0, 1]);

    let mut keys: Vec<(String, u32)> = record
        .clips
        .iter()
        .map(|c| (c.stream_type.clone(), c.clip_number))
        .collect();
    keys.sort();
    assert_eq!(
        keys,
        vec![
            ("camera".to_string(), 0),
            ("camera".to_string(), 1),
            ("screen".to_string(), 0)
        ]
    );

    // Raw JSON shape consumed by downstream tooling.
    let text = std::fs::read_to_string(h.session.metadata_path())?;
    let json: serde_json::Value = serde_json::from_str(&text)?;
    assert_eq!(json["id"], h.session.id().to_string());
    for clip in json["clips"].as_array().context("clips array")? {
        for key in ["type", "filename", "start_time", "end_time", "clip_number"] {
            assert!(clip.get(key).is_some(), "clip missing {key}");
        }
    }
    Ok(())
}

#[tokio::test]
async fn empty_session_still_has_metadata() -> Result<()> {
    let mut h = Harness::start(ScriptedFinalizer::new()).await?;
    h.close().await?;

    let record = load_session(h.root.path(), h.session.id()).await?;
    assert!(record.clips.is_empty());
    assert_eq!(record.start_time, h.session.started_at());
    Ok(())
}

#[tokio::test]
async fn every_session_gets_its_own_directory() -> Result<()> {
    let root = tempfile::tempdir()?;
    let a = Session::create(root.path()).await?;
    let b = Session::create(root.path()).await?;
    assert_ne!(a.id(), b.id());
    assert_ne!(a.dir(), b.dir());

    let listed = list_sessions(root.path()).await?;
    assert_eq!(listed.len(), 2);
    Ok(())
}
