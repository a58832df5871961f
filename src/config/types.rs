use loopcast_av::{EncoderSettings, InputFormat, SourceOptions, DEFAULT_INPUT_QUEUE};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub encoder: EncoderConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub live: LiveConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory served at `/` (expects an `index.html`)
    #[serde(default)]
    pub static_dir: Option<PathBuf>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    /// Directory of still images replayed in file-name order
    #[serde(default = "default_frames_dir")]
    pub frames_dir: PathBuf,

    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    #[serde(default)]
    pub input_format: InputFormat,

    /// Keep decoded frames in memory after the first cycle
    #[serde(default = "default_true")]
    pub cache_frames: bool,
}

fn default_frames_dir() -> PathBuf {
    PathBuf::from("./frames")
}
fn default_width() -> u32 {
    1280
}
fn default_height() -> u32 {
    720
}
fn default_true() -> bool {
    true
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            frames_dir: default_frames_dir(),
            width: default_width(),
            height: default_height(),
            input_format: InputFormat::default(),
            cache_frames: true,
        }
    }
}

impl SourceConfig {
    pub fn options(&self) -> SourceOptions {
        SourceOptions {
            format: self.input_format,
            width: self.width,
            height: self.height,
            cache: self.cache_frames,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EncoderConfig {
    /// Path to ffmpeg (searched on PATH when unset)
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    #[serde(default = "default_fps")]
    pub fps: u32,

    /// Frames per GOP, and so per fragment
    #[serde(default = "default_gop")]
    pub gop: u32,

    #[serde(default = "default_crf")]
    pub crf: u8,

    #[serde(default = "default_preset")]
    pub preset: String,

    #[serde(default = "default_tune")]
    pub tune: String,

    /// Burn the local wall-clock time into each frame
    #[serde(default = "default_true")]
    pub timestamp_overlay: bool,

    #[serde(default)]
    pub extra_args: Vec<String>,

    /// Frames that may wait for ffmpeg to read them before the run fails
    #[serde(default = "default_input_queue")]
    pub input_queue_frames: usize,
}

fn default_fps() -> u32 {
    30
}
fn default_gop() -> u32 {
    30
}
fn default_crf() -> u8 {
    35
}
fn default_preset() -> String {
    "ultrafast".to_string()
}
fn default_tune() -> String {
    "zerolatency".to_string()
}
fn default_input_queue() -> usize {
    DEFAULT_INPUT_QUEUE
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            fps: default_fps(),
            gop: default_gop(),
            crf: default_crf(),
            preset: default_preset(),
            tune: default_tune(),
            timestamp_overlay: true,
            extra_args: Vec::new(),
            input_queue_frames: default_input_queue(),
        }
    }
}

impl Config {
    /// Encoder parameters derived from the source and encoder sections.
    pub fn encoder_settings(&self) -> EncoderSettings {
        EncoderSettings {
            fps: self.encoder.fps,
            width: self.source.width,
            height: self.source.height,
            input_format: self.source.input_format,
            gop: self.encoder.gop,
            crf: self.encoder.crf,
            preset: self.encoder.preset.clone(),
            tune: self.encoder.tune.clone(),
            timestamp_overlay: self.encoder.timestamp_overlay,
            extra_args: self.encoder.extra_args.clone(),
            input_queue: self.encoder.input_queue_frames,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    /// Directory holding init.m4s, media.mp4 and meta.txt
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,

    /// Largest atom accepted from the encoder, in bytes
    #[serde(default = "default_max_atom_size")]
    pub max_atom_size: u64,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./chunks")
}
fn default_max_atom_size() -> u64 {
    loopcast_media::DEFAULT_MAX_ATOM_SIZE
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            max_atom_size: default_max_atom_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LiveConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Start new clients at the beginning of media.mp4 instead of the live edge
    #[serde(default)]
    pub replay_history: bool,
}

fn default_poll_interval() -> u64 {
    500
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            replay_history: false,
        }
    }
}

impl LiveConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
