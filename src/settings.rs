use crate::error::{Error, Result};
use crate::models::{CameraVersion, EncodingType, ServerBinding, StreamConfig};
use std::ops::RangeInclusive;
use std::time::Duration;

const MIN_WIDTH: u32 = 32;
const MIN_HEIGHT: u32 = 16;
const FPS_RANGE: RangeInclusive<u32> = 1..=90;
const QUALITY_RANGE: RangeInclusive<u8> = 1..=100;

/// Capture parameters and server binding behind validated setters.
///
/// Every setter either stores the new value or returns
/// [`Error::Validation`] and leaves the previous value untouched.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    config: StreamConfig,
    binding: ServerBinding,
    verbose: bool,
    operation_timeout: Option<Duration>,
}

fn check_range<T>(field: &'static str, value: T, range: RangeInclusive<T>) -> Result<T>
where
    T: PartialOrd + std::fmt::Display + Copy,
{
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(Error::validation(
            field,
            format!(
                "{} is outside [{}, {}]",
                value,
                range.start(),
                range.end()
            ),
        ))
    }
}

impl Settings {
    pub fn new(config: StreamConfig, binding: ServerBinding) -> Result<Self> {
        let mut settings = Settings::default();
        settings.set_width(config.width, CameraVersion::default())?;
        settings.set_height(config.height, CameraVersion::default())?;
        settings.set_fps(config.fps)?;
        settings.set_quality(config.quality)?;
        settings.config.encoding = config.encoding;
        settings.set_port(binding.port);
        settings.set_pathname(&binding.pathname);
        settings.set_hostname(&binding.hostname)?;
        settings.set_bind_address(&binding.bind_address)?;
        Ok(settings)
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn binding(&self) -> &ServerBinding {
        &self.binding
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout
    }

    pub fn mime_type(&self) -> String {
        self.config.encoding.mime_type()
    }

    /// Ports up to 1023 are accepted but usually need elevated privileges.
    pub fn set_port(&mut self, port: u16) {
        if port <= 1023 {
            log::warn!(
                "Port {} is in the privileged range; binding may require elevated permissions",
                port
            );
        }
        self.binding.port = port;
    }

    pub fn set_pathname(&mut self, pathname: &str) {
        let trimmed = pathname.trim().trim_start_matches('/');
        self.binding.pathname = format!("/{}", trimmed);
    }

    pub fn set_hostname(&mut self, hostname: &str) -> Result<()> {
        let hostname = hostname.trim();
        if hostname.is_empty() {
            return Err(Error::validation("hostname", "must not be empty"));
        }
        self.binding.hostname = hostname.to_string();
        Ok(())
    }

    pub fn set_bind_address(&mut self, address: &str) -> Result<()> {
        let address = address.trim();
        address
            .parse::<std::net::IpAddr>()
            .map_err(|e| Error::validation("bind address", format!("{:?}: {}", address, e)))?;
        self.binding.bind_address = address.to_string();
        Ok(())
    }

    pub fn set_verbose_mode(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn set_operation_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        if timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::validation("operation timeout", "must be non-zero"));
        }
        self.operation_timeout = timeout;
        Ok(())
    }

    pub fn set_width(&mut self, width: u32, version: CameraVersion) -> Result<()> {
        self.config.width = check_range("width", width, MIN_WIDTH..=version.max_width())?;
        Ok(())
    }

    pub fn set_height(&mut self, height: u32, version: CameraVersion) -> Result<()> {
        self.config.height = check_range("height", height, MIN_HEIGHT..=version.max_height())?;
        Ok(())
    }

    pub fn set_fps(&mut self, fps: u32) -> Result<()> {
        self.config.fps = check_range("fps", fps, FPS_RANGE)?;
        Ok(())
    }

    /// Accepts any casing of a supported encoding name.
    pub fn set_encoding(&mut self, encoding: &str) -> Result<()> {
        self.config.encoding = encoding.parse()?;
        Ok(())
    }

    pub fn set_quality(&mut self, quality: u8) -> Result<()> {
        self.config.quality = check_range("quality", quality, QUALITY_RANGE)?;
        Ok(())
    }

    /// Marks the binding as served by an externally owned server.
    pub(crate) fn set_external(&mut self, port: Option<u16>) {
        if let Some(port) = port {
            self.set_port(port);
        }
        self.binding.external = true;
    }
}
