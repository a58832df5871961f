//! # loopcast-av
//!
//! The producer side of a loopcast pipeline, up to the encoder's output pipe.
//!
//! This crate provides:
//! - Frame sources: still images loaded from a directory in file-name order
//! - [`FramePacer`]: cyclic replay of those sources at a fixed frame rate
//! - [`Encoder`]: an opaque encoder capability with a write side and a read
//!   side, implemented for an `ffmpeg` subprocess by [`FfmpegEncoder`]
//! - External tool detection
//!
//! ## Example
//!
//! ```no_run
//! use loopcast_av::{scan_frames_dir, FramePacer, SourceOptions};
//!
//! # async fn run() -> loopcast_av::Result<()> {
//! let sources = scan_frames_dir("./frames", &SourceOptions::default())?;
//! let mut pacer = FramePacer::new(sources, 30.0)?;
//! let frame = pacer.next_frame().await?;
//! println!("{} at {:?}", frame.id, frame.elapsed);
//! # Ok(())
//! # }
//! ```

pub mod encoder;
mod error;
pub mod pacer;
pub mod source;
pub mod tools;

pub use encoder::{
    Encoder, EncoderHandle, EncoderInput, EncoderOutput, EncoderProcess, EncoderSettings,
    FfmpegEncoder, DEFAULT_INPUT_QUEUE,
};
pub use error::{Error, Result};
pub use pacer::{Frame, FramePacer};
pub use source::{
    is_image_file, scan_frames_dir, FrameSource, ImageFrameSource, InputFormat,
    MemoryFrameSource, SourceOptions,
};
pub use tools::{check_tool, check_tools, require_tool, ToolInfo};
