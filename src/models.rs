use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Frame encodings the camera's hardware encoder can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EncodingType {
    Jpeg,
    Gif,
    Png,
    Ppm,
    Tga,
    Bmp,
}

impl EncodingType {
    /// Supported encodings in their canonical order.
    pub const ALL: [EncodingType; 6] = [
        EncodingType::Jpeg,
        EncodingType::Gif,
        EncodingType::Png,
        EncodingType::Ppm,
        EncodingType::Tga,
        EncodingType::Bmp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EncodingType::Jpeg => "JPEG",
            EncodingType::Gif => "GIF",
            EncodingType::Png => "PNG",
            EncodingType::Ppm => "PPM",
            EncodingType::Tga => "TGA",
            EncodingType::Bmp => "BMP",
        }
    }

    /// MIME type used for each multipart part and for snapshots.
    pub fn mime_type(&self) -> String {
        format!("image/{}", self.as_str().to_lowercase())
    }

    /// Comma-joined list of every supported encoding.
    pub fn supported() -> String {
        Self::ALL
            .iter()
            .map(EncodingType::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for EncodingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EncodingType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|encoding| encoding.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                Error::validation(
                    "encoding",
                    format!("{:?} is not one of {}", s, Self::supported()),
                )
            })
    }
}

/// Camera module generation; sensor resolution limits depend on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CameraVersion {
    V1,
    #[default]
    V2,
}

impl CameraVersion {
    pub fn max_width(&self) -> u32 {
        match self {
            CameraVersion::V1 => 2592,
            CameraVersion::V2 => 3280,
        }
    }

    pub fn max_height(&self) -> u32 {
        match self {
            CameraVersion::V1 => 1944,
            CameraVersion::V2 => 2464,
        }
    }
}

impl TryFrom<u8> for CameraVersion {
    type Error = Error;

    fn try_from(version: u8) -> Result<Self> {
        match version {
            1 => Ok(CameraVersion::V1),
            2 => Ok(CameraVersion::V2),
            other => Err(Error::validation(
                "camera version",
                format!("{} is not 1 or 2", other),
            )),
        }
    }
}

// Capture parameters handed to the camera on start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub encoding: EncodingType,
    pub quality: u8,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 16,
            encoding: EncodingType::Jpeg,
            quality: 25,
        }
    }
}

// Where the stream route is served
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerBinding {
    pub port: u16,
    pub pathname: String,
    pub hostname: String,
    pub bind_address: String,
    /// Set once an external server has been registered; the controller
    /// then never creates or closes a server of its own.
    #[serde(skip)]
    pub external: bool,
}

impl Default for ServerBinding {
    fn default() -> Self {
        Self {
            port: 8000,
            pathname: "/live.stream".to_string(),
            hostname: "localhost".to_string(),
            bind_address: "0.0.0.0".to_string(),
            external: false,
        }
    }
}

impl ServerBinding {
    pub fn url(&self, port: u16) -> String {
        format!("http://{}:{}{}", self.hostname, port, self.pathname)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StreamState {
    #[default]
    Idle,
    Started,
    Paused,
    Stopped,
}

impl StreamState {
    /// Whether frames may be served in this state.
    pub fn is_active(&self) -> bool {
        matches!(self, StreamState::Started | StreamState::Paused)
    }
}

// Flag view of the lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStatus {
    pub started: bool,
    pub paused: bool,
    pub stopped: bool,
}

impl From<StreamState> for StreamStatus {
    fn from(state: StreamState) -> Self {
        StreamStatus {
            started: state.is_active(),
            paused: state == StreamState::Paused,
            stopped: state == StreamState::Stopped,
        }
    }
}
