//! Encoding run supervision.
//!
//! A run owns one encoder and two tasks:
//!
//! ```text
//! FramePacer ──► feeder ──► encoder stdin
//! encoder stdout ──► AtomReader ──► drainer ──► ChunkStore
//! ```
//!
//! The feeder hands frames to the encoder input's writer task and never
//! waits on the pipe; the OS pipe decouples encoder input from output. Whichever of feeder,
//! drainer, encoder exit or cancellation finishes first ends the run; the
//! others are torn down and the encoder is killed. Nothing is retried.

mod drainer;
mod feeder;

use crate::store::{ledger, ChunkStore, OutputLayout, StoreError};
use loopcast_av::{Encoder, EncoderHandle, FramePacer, FrameSource};
use loopcast_media::{AtomReader, DEFAULT_MAX_ATOM_SIZE};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How long the encoder exit and the end of its output may lag each other.
const EXIT_GRACE: Duration = Duration::from_secs(1);

/// Fatal causes of a run ending.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("frame source failed: {0}")]
    Source(#[source] loopcast_av::Error),

    #[error("encoder failed: {0}")]
    Process(#[source] loopcast_av::Error),

    #[error("framing violation: {0}")]
    Framing(#[from] loopcast_media::Error),

    #[error("storage failed: {0}")]
    Storage(#[source] StoreError),

    #[error("pipeline task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<StoreError> for PipelineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Framing(e) => Self::Framing(e),
            other => Self::Storage(other),
        }
    }
}

/// What ended the run.
enum Outcome {
    Feeder(Result<(), PipelineError>),
    Drainer(Result<u64, PipelineError>),
    EncoderExit(loopcast_av::Result<()>),
    Cancelled,
}

/// One encoding run from frame sources to the output directory.
pub struct Pipeline<S, E> {
    pacer: FramePacer<S>,
    encoder: E,
    layout: OutputLayout,
    max_atom_size: u64,
}

impl<S, E> Pipeline<S, E>
where
    S: FrameSource + 'static,
    E: Encoder,
{
    pub fn new(pacer: FramePacer<S>, encoder: E, layout: OutputLayout) -> Self {
        Self {
            pacer,
            encoder,
            layout,
            max_atom_size: DEFAULT_MAX_ATOM_SIZE,
        }
    }

    pub fn with_max_atom_size(mut self, max: u64) -> Self {
        self.max_atom_size = max;
        self
    }

    /// Run until a component fails or `cancel` fires.
    ///
    /// Cancellation is the only way to end a run with `Ok`.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), PipelineError> {
        let (recorder, drain) = ledger();
        let store = ChunkStore::create(self.layout, drain).await?;

        let name = self.encoder.name().to_string();
        let EncoderHandle {
            input,
            output,
            mut process,
        } = self
            .encoder
            .start()
            .await
            .map_err(PipelineError::Process)?;

        tracing::info!(
            encoder = %name,
            frames = self.pacer.cycle_len(),
            interval = ?self.pacer.interval(),
            "Pipeline started"
        );

        let reader = AtomReader::new(output).with_max_atom_size(self.max_atom_size);
        let mut feeder = tokio::spawn(feeder::feed(self.pacer, input, recorder));
        let mut drainer = tokio::spawn(drainer::drain(reader, store));

        let outcome = tokio::select! {
            res = &mut feeder => Outcome::Feeder(res.unwrap_or_else(|e| Err(e.into()))),
            res = &mut drainer => Outcome::Drainer(res.unwrap_or_else(|e| Err(e.into()))),
            res = process.wait() => Outcome::EncoderExit(res),
            _ = cancel.cancelled() => Outcome::Cancelled,
        };

        feeder.abort();

        let result = match outcome {
            Outcome::Feeder(res) => res,
            Outcome::Drainer(Err(e)) => Err(e),
            Outcome::Drainer(Ok(atoms)) => {
                tracing::debug!(atoms, "Encoder closed its output");
                // prefer the exit status when the encoder is on its way out
                match tokio::time::timeout(EXIT_GRACE, process.wait()).await {
                    Ok(res) => Err(exit_error(&name, res)),
                    Err(_) => Err(PipelineError::Process(loopcast_av::Error::PipeClosed {
                        tool: name.clone(),
                        pipe: "stdout",
                    })),
                }
            }
            Outcome::EncoderExit(res) => {
                // let the drainer persist what the encoder flushed before exiting
                match tokio::time::timeout(EXIT_GRACE, &mut drainer).await {
                    // a broken stream says more than the exit status
                    Ok(Ok(Err(e))) => {
                        tracing::debug!("Encoder exited: {}", exit_error(&name, res));
                        Err(e)
                    }
                    Ok(_) => Err(exit_error(&name, res)),
                    Err(_) => {
                        tracing::debug!("Drainer still busy after encoder exit");
                        Err(exit_error(&name, res))
                    }
                }
            }
            Outcome::Cancelled => {
                tracing::info!("Pipeline cancelled");
                Ok(())
            }
        };
        drainer.abort();

        if let Err(e) = process.shutdown().await {
            tracing::warn!("Failed to stop encoder: {}", e);
        }

        match result {
            Err(PipelineError::Framing(ref e)) if e.is_framing() => {
                tracing::error!("Pipeline stopped, encoder output is malformed: {}", e);
            }
            Err(PipelineError::Process(ref e)) if e.is_process() => {
                tracing::error!("Pipeline stopped, encoder is gone: {}", e);
            }
            Err(ref e) => tracing::error!("Pipeline stopped: {}", e),
            Ok(()) => {}
        }
        result
    }
}

fn exit_error(name: &str, res: loopcast_av::Result<()>) -> PipelineError {
    PipelineError::Process(match res {
        Err(e) => e,
        Ok(()) => loopcast_av::Error::process_exited(name, "exited"),
    })
}
