//! `GET /live`: the rolling media file over a WebSocket.
//!
//! Each connection gets the init segment as one binary message, then polls
//! `media.mp4` from its own cursor. Whenever whole fragments have been
//! appended the session sends the current sidecar as a text message followed
//! by the new bytes as a binary message. Sessions only read files, so a slow or
//! vanished client never reaches the pipeline.

use crate::server::AppContext;
use crate::store::OutputLayout;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use loopcast_media::{last_fragment_offset, scan_fragments};
use std::io::SeekFrom;
use std::time::Duration;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::time::MissedTickBehavior;

pub fn live_routes() -> Router<AppContext> {
    Router::new().route("/live", get(live_handler))
}

pub async fn live_handler(State(ctx): State<AppContext>, ws: WebSocketUpgrade) -> Response {
    let init = match fs::read(ctx.layout.init_path()).await {
        Ok(init) => init,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to read init segment: {}", e);
            }
            return (StatusCode::SERVICE_UNAVAILABLE, "pipeline not yet primed").into_response();
        }
    };

    let start = if ctx.live.replay_history {
        0
    } else {
        live_edge(&ctx.layout).await
    };

    let session = LiveSession::new(ctx.layout.clone(), ctx.live.poll_interval(), start);
    ws.on_upgrade(move |socket| session.run(socket, init))
}

/// End of the last complete fragment currently in `media.mp4`.
async fn live_edge(layout: &OutputLayout) -> u64 {
    let Ok(mut file) = File::open(layout.media_path()).await else {
        return 0;
    };
    let len = match file.metadata().await {
        Ok(m) => m.len(),
        Err(_) => return 0,
    };
    last_fragment_offset(&mut file, len).await.unwrap_or(0)
}

/// New data for a client: sidecar text and the whole fragments behind it.
#[derive(Debug)]
pub struct LiveUpdate {
    pub meta: String,
    pub media: Vec<u8>,
}

/// Per-client read state.
pub struct LiveSession {
    layout: OutputLayout,
    poll_interval: Duration,
    cursor: u64,
}

impl LiveSession {
    pub fn new(layout: OutputLayout, poll_interval: Duration, cursor: u64) -> Self {
        Self {
            layout,
            poll_interval,
            cursor,
        }
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Read whatever whole fragments were appended since the last poll.
    ///
    /// Returns `Ok(None)` when nothing new is complete yet, or when the
    /// sidecar changed while the media was being read; the next poll picks
    /// the update up. The sidecar is read before the media, so it never
    /// describes a fragment the client has not been sent. A media file
    /// shorter than the cursor means a new run replaced the output, which
    /// invalidates this session.
    pub async fn poll(&mut self) -> std::io::Result<Option<LiveUpdate>> {
        let meta = self.read_meta().await?;

        let mut file = File::open(self.layout.media_path()).await?;
        let len = file.metadata().await?.len();

        if len < self.cursor {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "media file was reset",
            ));
        }
        if len == self.cursor {
            return Ok(None);
        }

        file.seek(SeekFrom::Start(self.cursor)).await?;
        let mut media = Vec::with_capacity((len - self.cursor) as usize);
        file.take(len - self.cursor).read_to_end(&mut media).await?;

        let complete = scan_fragments(&media);
        if complete == 0 {
            return Ok(None);
        }
        if self.read_meta().await? != meta {
            tracing::trace!(cursor = self.cursor, "Sidecar rewritten during poll");
            return Ok(None);
        }

        media.truncate(complete);
        self.cursor += complete as u64;

        Ok(Some(LiveUpdate { meta, media }))
    }

    async fn read_meta(&self) -> std::io::Result<String> {
        match fs::read_to_string(self.layout.meta_path()).await {
            Ok(meta) => Ok(meta),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok("{}".to_string()),
            Err(e) => Err(e),
        }
    }

    /// Drive one client until it disconnects or a send fails.
    pub async fn run(mut self, mut socket: WebSocket, init: Vec<u8>) {
        tracing::debug!(cursor = self.cursor, "Live session started");

        if socket.send(Message::Binary(init)).await.is_err() {
            tracing::debug!("Client left before the init segment was sent");
            return;
        }

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let update = match self.poll().await {
                        Ok(Some(update)) => update,
                        Ok(None) => continue,
                        Err(e) => {
                            tracing::warn!("Live session stopped: {}", e);
                            break;
                        }
                    };

                    let bytes = update.media.len();
                    if socket.send(Message::Text(update.meta)).await.is_err()
                        || socket.send(Message::Binary(update.media)).await.is_err()
                    {
                        tracing::debug!("Client disconnected");
                        break;
                    }
                    tracing::trace!(bytes, cursor = self.cursor, "Sent live update");
                }
                msg = socket.recv() => match msg {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                        tracing::debug!("Client disconnected");
                        break;
                    }
                    Some(Ok(_)) => {}
                },
            }
        }
    }
}
