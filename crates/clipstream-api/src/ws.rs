//! `/ws`: one capture session per WebSocket connection.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use clipstream_core::OutboundMessage;
use clipstream_services::{
    ConnectionDriver, LiveSession, Session, StreamMultiplexer, TransportMessage,
};

use crate::ApiState;

pub async fn handle_ws(State(state): State<ApiState>, ws: WebSocketUpgrade) -> Response {
    let connections = state.connections.clone();
    ws.on_upgrade(move |socket| connections.track_future(handle_socket(socket, state)))
}

async fn handle_socket(socket: WebSocket, state: ApiState) {
    let session = match Session::create(&state.recordings_dir).await {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(error = %e, "failed to create session, closing connection");
            return;
        }
    };
    let id = session.id();

    let (tx, rx) = mpsc::unbounded_channel();
    let mux = Arc::new(StreamMultiplexer::new(
        session.clone(),
        state.finalizer.clone(),
        state.options,
        tx.clone(),
    ));
    let cancel = state.shutdown.child_token();
    state.sessions.insert(
        id,
        LiveSession {
            session,
            mux: mux.clone(),
            cancel: cancel.clone(),
            connected_at: Instant::now(),
        },
    );

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_outbound(sink, rx));

    let inbound = Box::pin(stream.filter_map(|frame| async move {
        match frame {
            Ok(Message::Text(text)) => Some(Ok(TransportMessage::Text(text.to_string()))),
            Ok(Message::Binary(bytes)) => Some(Ok(TransportMessage::Binary(bytes))),
            Ok(Message::Close(_)) => Some(Ok(TransportMessage::Close)),
            Ok(Message::Ping(_) | Message::Pong(_)) => None,
            Err(e) => Some(Err(e)),
        }
    }));

    let driver = ConnectionDriver::new(mux, state.tags.clone(), tx, cancel);
    driver.run(inbound).await;

    // Last senders go with the table entry; the writer then flushes and exits.
    state.sessions.remove(&id);
    if let Err(e) = writer.await {
        tracing::warn!(session_id = %id, error = %e, "outbound writer panicked");
    }
}

async fn write_outbound(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<OutboundMessage>,
) {
    while let Some(message) = rx.recv().await {
        let json = match message.to_json() {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode outbound message");
                continue;
            }
        };
        if sink.send(Message::Text(json.into())).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}
