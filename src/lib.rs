//! Serve a camera's continuous frame output as an HTTP
//! `multipart/x-mixed-replace` live stream.
//!
//! A [`LiveStream`] owns one [`CameraDriver`], runs it through
//! start/pause/resume/stop, and fans every frame out to all connected
//! HTTP clients while keeping the most recent frame for snapshots.

pub use models::*;

mod camera;
mod controller;
mod error;
mod fanout;
mod models;
mod server;
mod settings;
mod synthetic;
mod utils;

pub use camera::{CameraDriver, Completion, FrameSink, FrameSource};
pub use controller::LiveStream;
pub use error::{Error, Result};
pub use server::{HttpHost, MountTable};
pub use settings::Settings;
pub use synthetic::{render_frame, SyntheticCamera};
pub use utils::{data_uri, multipart_part, BOUNDARY, MULTIPART_CONTENT_TYPE};
