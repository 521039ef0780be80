use crate::camera::{CameraDriver, Completion};
use crate::error::{Error, Result};
use crate::fanout::{spawn_recorder, stream_router, StreamHub};
use crate::models::{CameraVersion, EncodingType, ServerBinding, StreamConfig, StreamState, StreamStatus};
use crate::server::{HttpHost, OwnedServer};
use crate::settings::Settings;
use crate::utils::data_uri;
use bytes::Bytes;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

/// Resources held for the lifetime of one stream session.
struct Session<C> {
    camera: Option<C>,
    server: Option<OwnedServer>,
    recorder: Option<JoinHandle<()>>,
    route_registered: bool,
    url: Option<String>,
}

/// Drives one camera through `idle -> started <-> paused -> stopped` and
/// serves its frames to every connected HTTP client.
///
/// The lifecycle is one-shot: once stopped, the camera is released and a
/// new `LiveStream` is needed to stream again. Lifecycle operations are
/// serialized, so concurrent calls queue instead of interleaving.
pub struct LiveStream<C: CameraDriver> {
    settings: Mutex<Settings>,
    host: Mutex<Option<Arc<dyn HttpHost>>>,
    hub: Arc<StreamHub>,
    session: AsyncMutex<Session<C>>,
}

impl<C: CameraDriver> LiveStream<C> {
    pub fn new(camera: C) -> Self {
        Self::with_settings(camera, Settings::default())
    }

    pub fn with_settings(camera: C, settings: Settings) -> Self {
        let hub = Arc::new(StreamHub::new(settings.mime_type()));
        hub.set_verbose(settings.verbose());
        Self {
            settings: Mutex::new(settings),
            host: Mutex::new(None),
            hub,
            session: AsyncMutex::new(Session {
                camera: Some(camera),
                server: None,
                recorder: None,
                route_registered: false,
                url: None,
            }),
        }
    }

    fn settings(&self) -> MutexGuard<'_, Settings> {
        match self.settings.lock() {
            Ok(settings) => settings,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn external_host(&self) -> Option<Arc<dyn HttpHost>> {
        match self.host.lock() {
            Ok(host) => host.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set_port(&self, port: u16) {
        self.settings().set_port(port);
    }

    pub fn set_pathname(&self, pathname: &str) {
        self.settings().set_pathname(pathname);
    }

    pub fn set_hostname(&self, hostname: &str) -> Result<()> {
        self.settings().set_hostname(hostname)
    }

    pub fn set_bind_address(&self, address: &str) -> Result<()> {
        self.settings().set_bind_address(address)
    }

    /// Enables per-connection and write-failure logging.
    pub fn set_verbose_mode(&self, verbose: bool) {
        self.settings().set_verbose_mode(verbose);
        self.hub.set_verbose(verbose);
    }

    pub fn set_operation_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.settings().set_operation_timeout(timeout)
    }

    pub fn set_width(&self, width: u32, version: CameraVersion) -> Result<()> {
        self.settings().set_width(width, version)
    }

    pub fn set_height(&self, height: u32, version: CameraVersion) -> Result<()> {
        self.settings().set_height(height, version)
    }

    pub fn set_fps(&self, fps: u32) -> Result<()> {
        self.settings().set_fps(fps)
    }

    pub fn set_encoding(&self, encoding: &str) -> Result<()> {
        self.settings().set_encoding(encoding)
    }

    pub fn set_quality(&self, quality: u8) -> Result<()> {
        self.settings().set_quality(quality)
    }

    /// Serve the stream route from a server the caller owns. `port`, when
    /// given, replaces the configured port used in the stream URL. The host
    /// is never started or closed by this controller.
    pub fn register(&self, host: Arc<dyn HttpHost>, port: Option<u16>) -> Result<()> {
        if self.hub.current_state() != StreamState::Idle {
            return Err(Error::lifecycle(
                "register a server for",
                "stream has already been started",
            ));
        }
        self.settings().set_external(port);
        match self.host.lock() {
            Ok(mut slot) => *slot = Some(host),
            Err(poisoned) => *poisoned.into_inner() = Some(host),
        }
        Ok(())
    }

    pub fn config(&self) -> StreamConfig {
        self.settings().config().clone()
    }

    pub fn binding(&self) -> ServerBinding {
        self.settings().binding().clone()
    }

    pub fn verbose(&self) -> bool {
        self.settings().verbose()
    }

    pub fn mime_type(&self) -> String {
        self.settings().mime_type()
    }

    pub fn get_supported_encoding_types(&self) -> String {
        EncodingType::supported()
    }

    pub fn state(&self) -> StreamState {
        self.hub.current_state()
    }

    pub fn status(&self) -> StreamStatus {
        self.state().into()
    }

    pub fn connected_clients(&self) -> usize {
        self.hub.connected_clients()
    }

    /// Frames the camera has produced since this stream was created.
    pub fn frames_emitted(&self) -> u64 {
        self.hub.frames.frames_emitted()
    }

    pub async fn stream_url(&self) -> Option<String> {
        self.session.lock().await.url.clone()
    }

    /// Start the camera and begin serving the stream route. Resolves to the
    /// stream URL once the camera reports it is ready.
    pub async fn start(&self) -> Result<String> {
        let mut session = self.session.lock().await;
        match self.hub.current_state() {
            StreamState::Idle => {}
            StreamState::Stopped => {
                return Err(Error::lifecycle(
                    "start",
                    "a stopped stream cannot be restarted",
                ))
            }
            StreamState::Started | StreamState::Paused => {
                return Err(Error::lifecycle("start", "stream is already started"))
            }
        }

        let (config, binding, timeout) = {
            let settings = self.settings();
            (
                settings.config().clone(),
                settings.binding().clone(),
                settings.operation_timeout(),
            )
        };
        let host = self.external_host();

        let mut server = match host {
            Some(_) => None,
            None => Some(OwnedServer::bind(&binding.bind_address, binding.port).await?),
        };

        let camera = session
            .camera
            .as_mut()
            .ok_or_else(|| Error::CameraError("camera has been released".to_string()))?;
        self.hub.set_mime_type(config.encoding.mime_type());
        // Subscribed ahead of the camera so frames emitted while it starts
        // still reach the last-frame slot.
        let recorded = self.hub.frames.subscribe();
        let (ready, pending) = Completion::new();
        camera.start(&config, self.hub.frames.sink(), ready);
        if let Err(e) = pending.wait("start", timeout).await {
            log::error!("Camera failed to start: {}", e);
            return Err(e);
        }

        self.hub.state.send_replace(StreamState::Started);
        session.recorder = Some(spawn_recorder(self.hub.clone(), recorded));

        if !session.route_registered {
            let router = stream_router(self.hub.clone(), &binding.pathname);
            if let Some(host) = &host {
                host.mount(&binding.pathname, router);
            } else if let Some(server) = server.as_mut() {
                server.serve(router);
            }
            session.route_registered = true;
        }

        let port = server
            .as_ref()
            .map(|server| server.local_addr().port())
            .unwrap_or(binding.port);
        let url = binding.url(port);
        session.server = server;
        session.url = Some(url.clone());
        log::info!(
            "Streaming {}x{} {} at {} fps on {}",
            config.width,
            config.height,
            config.encoding,
            config.fps,
            url
        );
        Ok(url)
    }

    pub async fn pause(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        if self.hub.current_state() != StreamState::Started {
            return Err(Error::lifecycle("pause", "stream is not started"));
        }
        self.drive(&mut session, "pause", |camera, done| camera.pause(done))
            .await?;
        self.hub.state.send_replace(StreamState::Paused);
        log::info!("Stream paused");
        Ok(())
    }

    pub async fn resume(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        if self.hub.current_state() != StreamState::Paused {
            return Err(Error::lifecycle("resume", "stream is not paused"));
        }
        self.drive(&mut session, "resume", |camera, done| camera.resume(done))
            .await?;
        self.hub.state.send_replace(StreamState::Started);
        log::info!("Stream resumed");
        Ok(())
    }

    /// Stop the camera, end every client response and release the camera.
    /// A server created by this controller is closed; a registered one is
    /// left running.
    pub async fn stop(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        if !self.hub.current_state().is_active() {
            return Err(Error::lifecycle("stop", "stream is not started"));
        }
        self.drive(&mut session, "stop", |camera, done| camera.stop(done))
            .await?;
        self.hub.state.send_replace(StreamState::Stopped);
        session.camera = None;

        if let Some(recorder) = session.recorder.take() {
            if let Err(e) = recorder.await {
                log::warn!("Last-frame recorder ended abnormally: {}", e);
            }
        }
        if let Some(mut server) = session.server.take() {
            server.shutdown().await;
        }
        log::info!("Stream stopped");
        Ok(())
    }

    async fn drive<F>(&self, session: &mut Session<C>, operation: &'static str, call: F) -> Result<()>
    where
        F: FnOnce(&mut C, Completion),
    {
        let timeout = self.settings().operation_timeout();
        let camera = session
            .camera
            .as_mut()
            .ok_or_else(|| Error::CameraError("camera has been released".to_string()))?;
        let (done, pending) = Completion::new();
        call(camera, done);
        pending.wait(operation, timeout).await.map_err(|e| {
            log::error!("Camera failed to {}: {}", operation, e);
            e
        })
    }

    /// The most recent frame, or `None` if the camera has not produced one
    /// yet. Fails if the stream was never started.
    pub fn get_last_frame(&self) -> Result<Option<Bytes>> {
        if self.hub.current_state() == StreamState::Idle {
            return Err(Error::lifecycle(
                "read the last frame of",
                "stream has not been started",
            ));
        }
        Ok(self.hub.last_frame())
    }

    /// The most recent frame as a `data:` URI.
    pub fn get_snapshot(&self) -> Option<String> {
        self.hub
            .last_frame()
            .map(|frame| data_uri(&self.hub.mime_type(), &frame))
    }
}

impl<C: CameraDriver> Drop for LiveStream<C> {
    fn drop(&mut self) {
        if self.hub.current_state().is_active() {
            self.hub.state.send_replace(StreamState::Stopped);
        }
    }
}
