//! Encoder processes.
//!
//! An encoder is an opaque capability with a write side (raw frames in) and
//! a read side (a continuous fragmented MP4 byte stream out). The pipeline
//! never looks behind these traits, so tests can substitute an in-process
//! fake for the real subprocess.

mod ffmpeg;

pub use ffmpeg::{EncoderSettings, FfmpegEncoder};

use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

/// Frames that may wait for the encoder before it counts as stuck.
pub const DEFAULT_INPUT_QUEUE: usize = 60;

/// The encoder's output byte stream.
pub type EncoderOutput = Box<dyn AsyncRead + Send + Unpin>;

/// Write side of an encoder.
///
/// Frames are handed to a writer task that owns the pipe, so queuing a frame
/// never waits on the encoder. Dropping the input lets the writer finish the
/// queue and then close the pipe.
pub struct EncoderInput {
    tool: String,
    frames: mpsc::Sender<Bytes>,
    writer: Option<JoinHandle<Result<()>>>,
    progress: Arc<Progress>,
    frames_queued: u64,
}

#[derive(Default)]
struct Progress {
    frames: AtomicU64,
    bytes: AtomicU64,
}

impl EncoderInput {
    /// Start a writer task for `pipe` that holds at most `queue` frames.
    pub fn new(
        tool: impl Into<String>,
        pipe: Box<dyn AsyncWrite + Send + Unpin>,
        queue: usize,
    ) -> Self {
        let tool = tool.into();
        let (frames, rx) = mpsc::channel(queue.max(1));
        let progress = Arc::new(Progress::default());
        let writer = tokio::spawn(pump(tool.clone(), pipe, rx, Arc::clone(&progress)));

        Self {
            tool,
            frames,
            writer: Some(writer),
            progress,
            frames_queued: 0,
        }
    }

    /// Queue one complete frame for the encoder.
    ///
    /// # Errors
    ///
    /// [`Error::PipeClosed`] once the writer has stopped; the encoder is gone
    /// and the run cannot continue. [`Error::InputOverrun`] when the queue is
    /// full because the encoder stopped reading.
    pub fn send_frame(&mut self, data: Bytes) -> Result<()> {
        match self.frames.try_send(data) {
            Ok(()) => {
                self.frames_queued += 1;
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(Error::InputOverrun {
                tool: self.tool.clone(),
                queued: self.frames.max_capacity(),
            }),
            Err(TrySendError::Closed(_)) => Err(pipe_closed(&self.tool)),
        }
    }

    /// Resolve with the reason once the writer task stops.
    ///
    /// Cancel safe. After the reason has been returned this never resolves
    /// again.
    pub async fn closed(&mut self) -> Error {
        let Some(writer) = self.writer.as_mut() else {
            return std::future::pending().await;
        };
        let res = writer.await;
        self.writer = None;

        match res {
            Ok(Err(e)) => e,
            Ok(Ok(())) => pipe_closed(&self.tool),
            Err(e) => Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e)),
        }
    }

    pub fn frames_queued(&self) -> u64 {
        self.frames_queued
    }

    /// Frames fully written to the pipe.
    pub fn frames_written(&self) -> u64 {
        self.progress.frames.load(Ordering::Relaxed)
    }

    pub fn bytes_written(&self) -> u64 {
        self.progress.bytes.load(Ordering::Relaxed)
    }
}

/// Move queued frames into the pipe until the queue closes or a write fails.
async fn pump(
    tool: String,
    mut pipe: Box<dyn AsyncWrite + Send + Unpin>,
    mut frames: mpsc::Receiver<Bytes>,
    progress: Arc<Progress>,
) -> Result<()> {
    while let Some(frame) = frames.recv().await {
        pipe.write_all(&frame)
            .await
            .map_err(|e| pipe_error(&tool, e))?;
        pipe.flush().await.map_err(|e| pipe_error(&tool, e))?;

        progress.frames.fetch_add(1, Ordering::Relaxed);
        progress
            .bytes
            .fetch_add(frame.len() as u64, Ordering::Relaxed);
    }

    pipe.shutdown().await.map_err(|e| pipe_error(&tool, e))
}

fn pipe_closed(tool: &str) -> Error {
    Error::PipeClosed {
        tool: tool.to_string(),
        pipe: "stdin",
    }
}

fn pipe_error(tool: &str, e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::ConnectionReset => pipe_closed(tool),
        _ => Error::Io(e),
    }
}

/// Lifetime control of a running encoder.
#[async_trait]
pub trait EncoderProcess: Send {
    /// Resolve when the encoder exits.
    ///
    /// Any exit while the pipeline is running is unexpected, so a clean
    /// status is reported as an error as well.
    async fn wait(&mut self) -> Result<()>;

    /// Kill the encoder and reap it.
    async fn shutdown(&mut self) -> Result<()>;
}

/// A started encoder.
pub struct EncoderHandle {
    pub input: EncoderInput,
    pub output: EncoderOutput,
    pub process: Box<dyn EncoderProcess>,
}

/// Something that can start an encoder.
#[async_trait]
pub trait Encoder: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Start a fresh encoder for one run.
    async fn start(&self) -> Result<EncoderHandle>;
}
