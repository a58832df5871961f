//! `ffmpeg` as an H.264 fragmented MP4 encoder.

use super::{Encoder, EncoderHandle, EncoderInput, EncoderProcess, DEFAULT_INPUT_QUEUE};
use crate::source::InputFormat;
use crate::tools::get_tool_path;
use crate::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

/// Wall-clock overlay burned into every frame.
const TIMESTAMP_FILTER: &str = "drawtext=text='%{localtime}':fontsize=48:fontcolor=white:\
box=1:boxborderw=6:boxcolor=black@0.75:x=(w-text_w)/2:y=h-text_h-20";

/// Fragment at every keyframe, with an empty `moov` up front so the init
/// segment is complete before the first fragment.
const MOVFLAGS: &str = "frag_keyframe+empty_moov+faststart+default_base_moof";

/// Encoding parameters for one run.
#[derive(Debug, Clone)]
pub struct EncoderSettings {
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub input_format: InputFormat,
    /// Frames per GOP; one fragment is produced per GOP.
    pub gop: u32,
    pub crf: u8,
    pub preset: String,
    pub tune: String,
    pub timestamp_overlay: bool,
    /// Appended after the codec options, before the output options.
    pub extra_args: Vec<String>,
    /// Frames allowed to wait for ffmpeg to read them.
    pub input_queue: usize,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            fps: 30,
            width: 1280,
            height: 720,
            input_format: InputFormat::Rgb24,
            gop: 30,
            crf: 35,
            preset: "ultrafast".to_string(),
            tune: "zerolatency".to_string(),
            timestamp_overlay: true,
            extra_args: Vec::new(),
            input_queue: DEFAULT_INPUT_QUEUE,
        }
    }
}

impl EncoderSettings {
    /// Build the ffmpeg argument vector: frames on stdin, fMP4 on stdout.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec!["-hide_banner".to_string(), "-r".into(), self.fps.to_string()];

        match self.input_format {
            InputFormat::Rgb24 => args.extend([
                "-f".into(),
                "rawvideo".into(),
                "-pixel_format".into(),
                "rgb24".into(),
                "-video_size".into(),
                format!("{}x{}", self.width, self.height),
            ]),
            InputFormat::Mjpeg => args.extend(["-f".into(), "mjpeg".into()]),
        }
        args.extend(["-i".into(), "pipe:0".into()]);

        args.extend(["-g".into(), self.gop.to_string()]);
        if self.timestamp_overlay {
            args.extend(["-vf".into(), TIMESTAMP_FILTER.into()]);
        }

        args.extend([
            "-vcodec".into(),
            "libx264".into(),
            "-tune".into(),
            self.tune.clone(),
            "-flush_packets".into(),
            "1".into(),
            "-preset".into(),
            self.preset.clone(),
            "-crf".into(),
            self.crf.to_string(),
        ]);
        args.extend(self.extra_args.iter().cloned());

        args.extend([
            "-an".into(),
            "-f".into(),
            "mp4".into(),
            "-movflags".into(),
            MOVFLAGS.into(),
            "pipe:1".into(),
        ]);
        args
    }
}

/// Spawns one `ffmpeg` subprocess per run.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    program: PathBuf,
    settings: EncoderSettings,
}

impl FfmpegEncoder {
    pub fn new(program: impl Into<PathBuf>, settings: EncoderSettings) -> Self {
        Self {
            program: program.into(),
            settings,
        }
    }

    /// Resolve the ffmpeg binary from configuration or PATH.
    pub fn locate(config_path: Option<&Path>, settings: EncoderSettings) -> Result<Self> {
        let program = get_tool_path("ffmpeg", config_path)?;
        Ok(Self::new(program, settings))
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn start(&self) -> Result<EncoderHandle> {
        let args = self.settings.args();
        tracing::debug!("Running: {:?} {}", self.program, args.join(" "));

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| Error::ProcessSpawn {
                tool: self.name().to_string(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or(Error::PipeClosed {
            tool: self.name().to_string(),
            pipe: "stdin",
        })?;
        let stdout = child.stdout.take().ok_or(Error::PipeClosed {
            tool: self.name().to_string(),
            pipe: "stdout",
        })?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "loopcast_av::ffmpeg", "{}", line);
                }
            });
        }

        tracing::info!(
            pid = ?child.id(),
            fps = self.settings.fps,
            gop = self.settings.gop,
            format = %self.settings.input_format,
            "Encoder started"
        );

        Ok(EncoderHandle {
            input: EncoderInput::new(self.name(), Box::new(stdin), self.settings.input_queue),
            output: Box::new(stdout),
            process: Box::new(FfmpegProcess { child }),
        })
    }
}

struct FfmpegProcess {
    child: Child,
}

#[async_trait]
impl EncoderProcess for FfmpegProcess {
    async fn wait(&mut self) -> Result<()> {
        let status = self.child.wait().await?;
        Err(Error::process_exited("ffmpeg", status.to_string()))
    }

    async fn shutdown(&mut self) -> Result<()> {
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }
        if let Err(e) = self.child.start_kill() {
            tracing::debug!("ffmpeg kill failed: {}", e);
        }
        let status = self.child.wait().await?;
        tracing::debug!("ffmpeg reaped: {}", status);
        Ok(())
    }
}
