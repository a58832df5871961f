use super::PipelineError;
use crate::store::FrameRecorder;
use loopcast_av::{EncoderInput, FramePacer, FrameSource};

/// Pace frames into the encoder until something fails.
///
/// Each frame is recorded in the ledger before it is queued, so the fragment
/// that contains it can never be flushed ahead of its metadata. Queuing does
/// not wait on the encoder; the only suspension point is the pacer.
pub(crate) async fn feed<S: FrameSource>(
    mut pacer: FramePacer<S>,
    mut input: EncoderInput,
    recorder: FrameRecorder,
) -> Result<(), PipelineError> {
    let cycle = pacer.cycle_len() as u64;

    loop {
        let frame = tokio::select! {
            frame = pacer.next_frame() => frame.map_err(PipelineError::Source)?,
            e = input.closed() => return Err(PipelineError::Process(e)),
        };

        recorder.record(frame.elapsed, &frame.id);
        input
            .send_frame(frame.data)
            .map_err(PipelineError::Process)?;

        if frame.sequence % cycle == cycle - 1 {
            tracing::trace!(
                queued = input.frames_queued(),
                written = input.frames_written(),
                bytes = input.bytes_written(),
                elapsed = ?frame.elapsed,
                "Frame cycle complete"
            );
        }
    }
}
