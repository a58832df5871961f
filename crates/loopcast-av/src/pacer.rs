//! Fixed-rate cyclic frame pacing.

use crate::source::FrameSource;
use crate::{Error, Result};
use bytes::Bytes;
use futures::stream::{self, Stream};
use std::time::Duration;
use tokio::time::Instant;

/// One paced frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Identifier of the source the frame came from.
    pub id: String,
    /// Bytes to write to the encoder.
    pub data: Bytes,
    /// Time since the pacer emitted its first frame.
    pub elapsed: Duration,
    /// 0-based position in the paced sequence.
    pub sequence: u64,
}

/// Replays a fixed, ordered set of sources forever at a target frame rate.
///
/// Each frame is released no earlier than one interval after the previous
/// frame *started* processing. When the caller takes longer than an interval
/// to come back, the next frame is released immediately: the pacer neither
/// sleeps to catch up nor drops frames.
pub struct FramePacer<S> {
    sources: Vec<S>,
    interval: Duration,
    cursor: usize,
    started: Option<Instant>,
    last_start: Option<Instant>,
    emitted: u64,
}

impl<S: FrameSource> FramePacer<S> {
    /// Create a pacer over `sources` at `fps` frames per second.
    ///
    /// # Errors
    ///
    /// Fails on an empty source set or a rate that is not a positive number.
    pub fn new(sources: Vec<S>, fps: f64) -> Result<Self> {
        if sources.is_empty() {
            return Err(Error::InvalidInput("frame pacer needs at least one source".into()));
        }
        if !fps.is_finite() || fps <= 0.0 {
            return Err(Error::InvalidInput(format!("invalid frame rate: {}", fps)));
        }

        Ok(Self {
            sources,
            interval: Duration::from_secs_f64(1.0 / fps),
            cursor: 0,
            started: None,
            last_start: None,
            emitted: 0,
        })
    }

    /// Target time between frames.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Number of sources in one cycle.
    pub fn cycle_len(&self) -> usize {
        self.sources.len()
    }

    /// Frames released since construction or the last restart.
    pub fn frames_emitted(&self) -> u64 {
        self.emitted
    }

    /// Wait for the next slot and load the next frame.
    ///
    /// # Errors
    ///
    /// A source that fails to load ends the sequence; no frame is skipped.
    pub async fn next_frame(&mut self) -> Result<Frame> {
        if let Some(last) = self.last_start {
            // a deadline in the past resolves immediately
            tokio::time::sleep_until(last + self.interval).await;
        }

        let now = Instant::now();
        let started = *self.started.get_or_insert(now);
        self.last_start = Some(now);

        let source = &mut self.sources[self.cursor];
        let data = source.load().await?;
        let frame = Frame {
            id: source.id().to_string(),
            data,
            elapsed: now.duration_since(started),
            sequence: self.emitted,
        };

        self.cursor = (self.cursor + 1) % self.sources.len();
        self.emitted += 1;

        Ok(frame)
    }

    /// Rewind to the first source and reset the elapsed clock.
    pub fn restart(&mut self) {
        self.cursor = 0;
        self.started = None;
        self.last_start = None;
        self.emitted = 0;
    }

    /// Turn the pacer into an infinite stream of frames.
    ///
    /// The stream ends after the first load error.
    pub fn into_stream(self) -> impl Stream<Item = Result<Frame>> {
        stream::unfold(Some(self), |state| async move {
            let mut pacer = state?;
            match pacer.next_frame().await {
                Ok(frame) => Some((Ok(frame), Some(pacer))),
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryFrameSource;
    use async_trait::async_trait;
    use futures::StreamExt;

    /// Source that fails on its `fail_on`-th load.
    struct Flaky {
        loads: usize,
        fail_on: usize,
    }

    #[async_trait]
    impl FrameSource for Flaky {
        fn id(&self) -> &str {
            "flaky.png"
        }

        async fn load(&mut self) -> Result<Bytes> {
            self.loads += 1;
            if self.loads == self.fail_on {
                Err(Error::load_failed("flaky.png", "disk went away"))
            } else {
                Ok(Bytes::from_static(b"ok"))
            }
        }
    }

    fn abc() -> Vec<MemoryFrameSource> {
        ["a.png", "b.png", "c.png"]
            .iter()
            .map(|id| MemoryFrameSource::new(*id, Bytes::from_static(b"px")))
            .collect()
    }

    #[test]
    fn test_rejects_empty_and_bad_rate() {
        assert!(FramePacer::<MemoryFrameSource>::new(Vec::new(), 30.0).is_err());
        assert!(FramePacer::new(abc(), 0.0).is_err());
        assert!(FramePacer::new(abc(), f64::NAN).is_err());
        assert!(FramePacer::new(abc(), -5.0).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cyclic_order() {
        let mut pacer = FramePacer::new(abc(), 30.0).unwrap();
        let mut ids = Vec::new();
        for _ in 0..10 {
            ids.push(pacer.next_frame().await.unwrap().id);
        }
        assert_eq!(
            ids,
            vec!["a.png", "b.png", "c.png", "a.png", "b.png", "c.png", "a.png", "b.png", "c.png", "a.png"]
        );
        assert_eq!(pacer.frames_emitted(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_spaced_by_interval() {
        let mut pacer = FramePacer::new(abc(), 30.0).unwrap();
        let interval = pacer.interval();

        let mut previous = pacer.next_frame().await.unwrap();
        assert_eq!(previous.elapsed, Duration::ZERO);
        for _ in 0..90 {
            let frame = pacer.next_frame().await.unwrap();
            let gap = frame.elapsed - previous.elapsed;
            assert!(gap >= interval, "gap {:?} below interval {:?}", gap, interval);
            previous = frame;
        }
        assert!(previous.elapsed >= interval * 90);
        assert_eq!(previous.sequence, 90);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_consumer_gets_next_frame_immediately() {
        let mut pacer = FramePacer::new(abc(), 10.0).unwrap();
        let first = pacer.next_frame().await.unwrap();

        // consumer spends 3 intervals on the frame
        tokio::time::advance(Duration::from_millis(300)).await;

        let before = Instant::now();
        let second = pacer.next_frame().await.unwrap();
        assert_eq!(Instant::now(), before, "pacer slept although it was late");
        assert_eq!(second.elapsed - first.elapsed, Duration::from_millis(300));

        // and the cadence resumes from the late frame, without catch-up bursts
        let third = pacer.next_frame().await.unwrap();
        let gap = third.elapsed - second.elapsed;
        assert!(gap >= Duration::from_millis(100) && gap < Duration::from_millis(102));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_rewinds() {
        let mut pacer = FramePacer::new(abc(), 30.0).unwrap();
        pacer.next_frame().await.unwrap();
        pacer.next_frame().await.unwrap();

        pacer.restart();
        let frame = pacer.next_frame().await.unwrap();
        assert_eq!(frame.id, "a.png");
        assert_eq!(frame.sequence, 0);
        assert_eq!(frame.elapsed, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_failure_is_fatal() {
        let pacer = FramePacer::new(vec![Flaky { loads: 0, fail_on: 3 }], 30.0).unwrap();
        let items: Vec<_> = pacer.into_stream().take(10).collect().await;

        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok());
        assert!(items[1].is_ok());
        assert!(matches!(items[2], Err(Error::Source { .. })));
    }

    #[tokio::test]
    async fn test_real_clock_spacing() {
        let mut pacer = FramePacer::new(abc(), 50.0).unwrap();
        let tolerance = Duration::from_millis(2);

        let mut last = std::time::Instant::now();
        pacer.next_frame().await.unwrap();
        for _ in 0..10 {
            pacer.next_frame().await.unwrap();
            let now = std::time::Instant::now();
            assert!(now - last + tolerance >= pacer.interval());
            last = now;
        }
    }
}
