use crate::*;

use clipstream_core::{SessionHello, StreamType};
use clipstream_services::CloseReason;

#[tokio::test]
async fn hello_is_first_message() -> Result<()> {
    let mut h = Harness::start(ScriptedFinalizer::new()).await?;

    let first = h.next_message().await?;
    assert_eq!(
        first,
        OutboundMessage::Hello(SessionHello {
            session_id: h.session.id().to_string()
        })
    );

    let summary = h.close().await?;
    assert_eq!(summary.reason, CloseReason::ClientClosed);
    Ok(())
}

#[tokio::test]
async fn start_stop_cycles_number_clips_in_order() -> Result<()> {
    let mut h = Harness::start(ScriptedFinalizer::new()).await?;

    for n in 0..3u32 {
        assert_eq!(h.start_stream("camera").await?, n);
        h.frame(format!("camera clip {n}").as_bytes(), 0x00)?;
        h.control("camera", "stop")?;
        let ack = h
            .next_event(|e| matches!(e, ServerEvent::EndAck { .. }))
            .await?;
        let ServerEvent::EndAck {
            clip_number,
            file_name,
            start_time,
            end_time,
            ..
        } = ack
        else {
            unreachable!()
        };
        assert_eq!(clip_number, n);
        assert_eq!(file_name, format!("camera_{n}.webm"));
        assert!(end_time >= start_time);
    }
    h.close().await?;

    let clips = h.session.clips().await;
    let numbers: Vec<u32> = clips.iter().map(|c| c.clip_number).collect();
    assert_eq!(numbers, vec![0, 1, 2]);
    for c in &clips {
        let artifact = std::fs::read(h.session.dir().join(&c.file_name))?;
        assert_eq!(artifact, format!("camera clip {}", c.clip_number).into_bytes());
    }
    Ok(())
}

#[tokio::test]
async fn tag_byte_selects_substream() -> Result<()> {
    let mut h = Harness::start_with(
        ScriptedFinalizer::new(),
        TagTable::default(),
        MultiplexerOptions { keep_raw: true },
    )
    .await?;

    h.start_stream("camera").await?;
    h.start_stream("screen").await?;
    h.frame(&[0xaa, 0xbb], 0x01)?;
    h.frame(&[0x11], 0x00)?;
    h.frame(&[], 0x01)?; // tag only
    h.frame(&[0xcc], 0x01)?;
    h.frame(&[0x99], 0x05)?; // unmapped
    let summary = h.close().await?;

    assert_eq!(summary.stats.rejected_frames, 1);
    assert_eq!(std::fs::read(h.raw_file("screen_0.webm"))?, vec![0xaa, 0xbb, 0xcc]);
    assert_eq!(std::fs::read(h.raw_file("camera_0.webm"))?, vec![0x11]);
    Ok(())
}

#[tokio::test]
async fn fallback_stream_takes_unmapped_tags() -> Result<()> {
    let screen = StreamType::new("screen")?;
    let tags = TagTable::new(
        [(0, StreamType::new("camera")?), (1, screen.clone())],
        Some(screen),
    )?;
    let mut h = Harness::start_with(
        ScriptedFinalizer::new(),
        tags,
        MultiplexerOptions { keep_raw: true },
    )
    .await?;

    h.start_stream("screen").await?;
    h.frame(b"a", 0x01)?;
    h.frame(b"b", 0x7f)?;
    let summary = h.close().await?;

    assert_eq!(summary.stats.rejected_frames, 0);
    assert_eq!(std::fs::read(h.raw_file("screen_0.webm"))?, b"ab");
    Ok(())
}

#[tokio::test]
async fn disconnect_finalizes_every_open_substream() -> Result<()> {
    let mut h = Harness::start(ScriptedFinalizer::new()).await?;

    h.start_stream("camera").await?;
    h.start_stream("screen").await?;
    h.frame(b"camera tail", 0x00)?;
    h.frame(b"screen tail", 0x01)?;

    tokio::time::sleep(Duration::from_millis(50)).await;
    let before_disconnect = h.session.elapsed_secs();
    let summary = h.fail_transport().await?;

    assert_eq!(summary.reason, CloseReason::TransportError);
    assert_eq!(summary.stats.drained_streams, 2);
    assert_eq!(h.finalizer.call_count(), 2);

    let clips = h.session.clips().await;
    assert_eq!(clips.len(), 2);
    for c in &clips {
        assert!(c.end_time >= before_disconnect, "end time taken at disconnect");
        assert!(c.end_time >= c.start_time);
    }
    assert_eq!(
        files_in(h.session.dir()),
        vec!["camera_0.webm", "metadata.json", "screen_0.webm"]
    );
    // Successful encodes remove their raw recordings.
    assert!(files_in(&h.session.raw_dir()).is_empty());
    Ok(())
}

#[tokio::test]
async fn slow_encode_does_not_stall_other_substream() -> Result<()> {
    let mut h = Harness::start(
        ScriptedFinalizer::new().slow("camera", Duration::from_millis(800)),
    )
    .await?;

    h.start_stream("camera").await?;
    h.start_stream("screen").await?;
    h.frame(b"cam", 0x00)?;
    h.control("camera", "stop")?;

    // Screen keeps flowing and its clip completes while camera still encodes.
    h.frame(b"scr", 0x01)?;
    h.control("screen", "stop")?;
    let first = h
        .next_event(|e| matches!(e, ServerEvent::EndAck { .. }))
        .await?;
    assert!(matches!(first, ServerEvent::EndAck { ref stream_type, .. } if stream_type == "screen"));
    let recorded: Vec<String> = h
        .session
        .clips()
        .await
        .into_iter()
        .map(|c| c.stream_type)
        .collect();
    assert_eq!(recorded, vec!["screen"]);

    let second = h
        .next_event(|e| matches!(e, ServerEvent::EndAck { .. }))
        .await?;
    assert!(matches!(second, ServerEvent::EndAck { ref stream_type, .. } if stream_type == "camera"));

    h.close().await?;
    assert_eq!(h.session.clips().await.len(), 2);
    Ok(())
}

#[tokio::test]
async fn disconnect_waits_for_in_flight_encodes() -> Result<()> {
    let mut h = Harness::start(
        ScriptedFinalizer::new().slow("screen", Duration::from_millis(300)),
    )
    .await?;

    h.start_stream("screen").await?;
    h.frame(b"x", 0x01)?;
    h.control("screen", "stop")?;
    let summary = h.close().await?;

    // Stopped before the close, so nothing was left open to drain,
    // but the encode still had to finish first.
    assert_eq!(summary.stats.drained_streams, 0);
    assert_eq!(h.session.clips().await.len(), 1);
    assert_eq!(h.mux.pending_finalizations(), 0);
    Ok(())
}

#[tokio::test]
async fn failed_encode_keeps_raw_and_session_continues() -> Result<()> {
    let mut h = Harness::start(ScriptedFinalizer::new().failing("screen")).await?;

    h.start_stream("screen").await?;
    h.frame(b"keep me", 0x01)?;
    h.control("screen", "stop")?;
    let err = h
        .next_event(|e| matches!(e, ServerEvent::Error { .. }))
        .await?;
    assert!(matches!(err, ServerEvent::Error { ref message } if message.contains("screen")));

    // The session is still usable and numbering moves on.
    assert_eq!(h.start_stream("screen").await?, 1);
    assert_eq!(h.start_stream("camera").await?, 0);
    h.close().await?;

    let clips = h.session.clips().await;
    assert_eq!(clips.len(), 1);
    assert_eq!(clips[0].stream_type, "camera");
    assert_eq!(std::fs::read(h.raw_file("screen_0.webm"))?, b"keep me");
    Ok(())
}

#[tokio::test]
async fn protocol_noise_is_tolerated() -> Result<()> {
    let mut h = Harness::start(ScriptedFinalizer::new()).await?;

    h.frame(b"before any start", 0x00)?;
    h.control("camera", "stop")?;
    h.text("{ definitely not json")?;
    h.text(r#"{"type":"cursorMove","x":10,"y":20}"#)?;
    h.control("microphone", "start")?;
    h.control("camera", "pause")?;
    h.control("camera", "start")?;
    h.control("camera", "start")?;
    h.frame(b"ok", 0x00)?;
    let summary = h.close().await?;

    assert_eq!(summary.stats.drained_streams, 1);
    assert_eq!(h.finalizer.call_count(), 1);
    assert_eq!(h.session.clips().await.len(), 1);

    let messages = h.drain_messages();
    let errors = messages
        .iter()
        .filter(|m| matches!(m, OutboundMessage::Event(ServerEvent::Error { .. })))
        .count();
    // bad JSON, unknown stream, unknown action; unknown type is ignored
    assert_eq!(errors, 3);
    let start_acks = messages
        .iter()
        .filter(|m| matches!(m, OutboundMessage::Event(ServerEvent::StartAck { .. })))
        .count();
    assert_eq!(start_acks, 1);
    assert_eq!(end_acks(&messages), vec![("camera".to_string(), 0)]);
    Ok(())
}
