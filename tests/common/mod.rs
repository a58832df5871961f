//! Shared helpers for integration tests.
//!
//! Provides [`FakeEncoder`], an in-process stand-in for ffmpeg built on
//! `tokio::io::duplex`, plus frame-directory and server helpers.

#![allow(dead_code)]

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use loopcast::config::LiveConfig;
use loopcast::server::{create_router, AppContext};
use loopcast::store::OutputLayout;
use loopcast_av::{Encoder, EncoderHandle, EncoderInput, EncoderProcess, DEFAULT_INPUT_QUEUE};
use loopcast_media::{Atom, AtomType};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

/// Frame size used by [`write_frames`].
pub const FRAME_WIDTH: u32 = 4;
pub const FRAME_HEIGHT: u32 = 2;
pub const FRAME_BYTES: usize = (FRAME_WIDTH * FRAME_HEIGHT * 3) as usize;

/// Encoder that emits `ftyp, moov` at once, then one `moof/mdat` pair per
/// `frames_per_fragment` frames read, and exits after `fragments` pairs.
///
/// With `stall` set it leaves its input unread for that long after the init
/// segment, like an encoder that is slow to warm up.
#[derive(Debug, Clone)]
pub struct FakeEncoder {
    pub frame_bytes: usize,
    pub frames_per_fragment: usize,
    pub fragments: usize,
    pub stall: Duration,
    pub stdin_capacity: usize,
}

impl FakeEncoder {
    pub fn new(frames_per_fragment: usize, fragments: usize) -> Self {
        Self {
            frame_bytes: FRAME_BYTES,
            frames_per_fragment,
            fragments,
            stall: Duration::ZERO,
            stdin_capacity: 64 * 1024,
        }
    }
}

pub fn ftyp() -> Atom {
    Atom::from_payload(AtomType::FTYP, b"isomiso2avc1mp41")
}

pub fn moov() -> Atom {
    Atom::from_payload(AtomType::MOOV, &[0x11; 64])
}

pub fn moof(n: usize) -> Atom {
    Atom::from_payload(AtomType::MOOF, &vec![n as u8; 32])
}

pub fn mdat(n: usize, frames: &[u8]) -> Atom {
    let mut payload = vec![n as u8; 16];
    payload.extend_from_slice(frames);
    Atom::from_payload(AtomType::MDAT, &payload)
}

#[async_trait]
impl Encoder for FakeEncoder {
    fn name(&self) -> &str {
        "fake"
    }

    async fn start(&self) -> loopcast_av::Result<EncoderHandle> {
        let (stdin, mut encoder_in) = tokio::io::duplex(self.stdin_capacity);
        let (mut encoder_out, stdout) = tokio::io::duplex(64 * 1024);
        let encoder = self.clone();

        let task = tokio::spawn(async move {
            encoder_out.write_all(&ftyp().data).await.ok()?;
            encoder_out.write_all(&moov().data).await.ok()?;
            tokio::time::sleep(encoder.stall).await;

            let mut frames = vec![0u8; encoder.frame_bytes * encoder.frames_per_fragment];
            for n in 1..=encoder.fragments {
                encoder_in.read_exact(&mut frames).await.ok()?;
                encoder_out.write_all(&moof(n).data).await.ok()?;
                encoder_out.write_all(&mdat(n, &frames).data).await.ok()?;
            }

            // close stdout but keep stdin open, like an encoder that stopped
            // producing without dying first
            drop(encoder_out);
            Some(encoder_in)
        });

        Ok(EncoderHandle {
            input: EncoderInput::new("fake", Box::new(stdin), DEFAULT_INPUT_QUEUE),
            output: Box::new(stdout),
            process: Box::new(FakeProcess {
                task: Some(task),
                stdin: None,
            }),
        })
    }
}

/// Encoder that writes a fixed byte stream, then closes its output.
///
/// Its input is read and discarded. With `exit_at_once` the process reports
/// its exit before the output has been written, so the supervisor sees the
/// exit first.
#[derive(Debug, Clone)]
pub struct ScriptedEncoder {
    pub output: Vec<u8>,
    pub exit_at_once: bool,
}

impl ScriptedEncoder {
    pub fn new(atoms: &[&[u8]]) -> Self {
        Self {
            output: atoms.concat(),
            exit_at_once: false,
        }
    }
}

#[async_trait]
impl Encoder for ScriptedEncoder {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn start(&self) -> loopcast_av::Result<EncoderHandle> {
        let (stdin, mut encoder_in) = tokio::io::duplex(64 * 1024);
        let (mut encoder_out, stdout) = tokio::io::duplex(64 * 1024);
        let output = self.output.clone();
        let delay = if self.exit_at_once {
            Duration::from_millis(50)
        } else {
            Duration::ZERO
        };

        tokio::spawn(async move {
            let mut sink = tokio::io::sink();
            tokio::io::copy(&mut encoder_in, &mut sink).await.ok();
        });
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            encoder_out.write_all(&output).await.ok();
            None
        });

        let process: Box<dyn EncoderProcess> = if self.exit_at_once {
            Box::new(ExitedProcess { _task: task })
        } else {
            Box::new(FakeProcess {
                task: Some(task),
                stdin: None,
            })
        };

        Ok(EncoderHandle {
            input: EncoderInput::new("scripted", Box::new(stdin), DEFAULT_INPUT_QUEUE),
            output: Box::new(stdout),
            process,
        })
    }
}

/// A process whose exit is reported immediately.
struct ExitedProcess {
    _task: JoinHandle<Option<DuplexStream>>,
}

#[async_trait]
impl EncoderProcess for ExitedProcess {
    async fn wait(&mut self) -> loopcast_av::Result<()> {
        Err(loopcast_av::Error::process_exited("scripted", "exit status: 1"))
    }

    async fn shutdown(&mut self) -> loopcast_av::Result<()> {
        Ok(())
    }
}

struct FakeProcess {
    task: Option<JoinHandle<Option<DuplexStream>>>,
    stdin: Option<DuplexStream>,
}

#[async_trait]
impl EncoderProcess for FakeProcess {
    async fn wait(&mut self) -> loopcast_av::Result<()> {
        if let Some(task) = self.task.as_mut() {
            if let Ok(stdin) = task.await {
                self.stdin = stdin;
            }
            self.task = None;
        }
        Err(loopcast_av::Error::process_exited("fake", "exit status: 0"))
    }

    async fn shutdown(&mut self) -> loopcast_av::Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.stdin = None;
        Ok(())
    }
}

/// Write solid-colour PNG frames named `names` into `dir`.
pub fn write_frames(dir: &Path, names: &[&str]) {
    for (i, name) in names.iter().enumerate() {
        let shade = (i * 40) as u8;
        RgbImage::from_pixel(FRAME_WIDTH, FRAME_HEIGHT, Rgb([shade, shade, shade]))
            .save(dir.join(name))
            .unwrap();
    }
}

pub fn small_frames() -> loopcast_av::SourceOptions {
    loopcast_av::SourceOptions {
        width: FRAME_WIDTH,
        height: FRAME_HEIGHT,
        ..Default::default()
    }
}

/// Start the router on a random port.
pub async fn spawn_server(layout: OutputLayout, live: LiveConfig) -> SocketAddr {
    let app = create_router(AppContext::new(layout, live), None);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

pub fn fast_live() -> LiveConfig {
    LiveConfig {
        poll_interval_ms: 20,
        replay_history: false,
    }
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn wait_for<F: FnMut() -> bool>(mut check: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
