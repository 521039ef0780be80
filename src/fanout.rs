use crate::camera::FrameSource;
use crate::error::Error;
use crate::models::StreamState;
use crate::utils::{multipart_part, MULTIPART_CONTENT_TYPE};
use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Parts queued between a client's pump and its response body.
const CLIENT_QUEUE: usize = 2;

/// State shared between the controller, the route handler and every
/// connection task.
pub(crate) struct StreamHub {
    pub frames: FrameSource,
    pub last_frame: watch::Sender<Option<Bytes>>,
    pub state: watch::Sender<StreamState>,
    mime_type: RwLock<String>,
    verbose: AtomicBool,
    clients: AtomicUsize,
}

impl StreamHub {
    pub fn new(mime_type: String) -> Self {
        Self {
            frames: FrameSource::new(),
            last_frame: watch::Sender::new(None),
            state: watch::Sender::new(StreamState::Idle),
            mime_type: RwLock::new(mime_type),
            verbose: AtomicBool::new(false),
            clients: AtomicUsize::new(0),
        }
    }

    pub fn mime_type(&self) -> String {
        match self.mime_type.read() {
            Ok(mime) => mime.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set_mime_type(&self, mime_type: String) {
        match self.mime_type.write() {
            Ok(mut mime) => *mime = mime_type,
            Err(poisoned) => *poisoned.into_inner() = mime_type,
        }
    }

    pub fn verbose(&self) -> bool {
        self.verbose.load(Ordering::Relaxed)
    }

    pub fn set_verbose(&self, verbose: bool) {
        self.verbose.store(verbose, Ordering::Relaxed);
    }

    pub fn connected_clients(&self) -> usize {
        self.clients.load(Ordering::Acquire)
    }

    pub fn last_frame(&self) -> Option<Bytes> {
        self.last_frame.borrow().clone()
    }

    pub fn current_state(&self) -> StreamState {
        *self.state.borrow()
    }
}

/// Resolves once the stream reaches `Stopped` or the hub goes away.
async fn stopped(state: &mut watch::Receiver<StreamState>) {
    loop {
        if *state.borrow_and_update() == StreamState::Stopped {
            return;
        }
        if state.changed().await.is_err() {
            return;
        }
    }
}

/// Keeps the last-frame slot current for the whole session, whether or
/// not any client is connected. `frames` must be subscribed before the
/// camera starts so nothing it emits early is missed.
pub(crate) fn spawn_recorder(
    hub: Arc<StreamHub>,
    mut frames: broadcast::Receiver<Bytes>,
) -> JoinHandle<()> {
    let mut state = hub.state.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = frames.recv() => match frame {
                    Ok(frame) => {
                        hub.last_frame.send_replace(Some(frame));
                    }
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                },
                _ = stopped(&mut state) => break,
            }
        }
    })
}

/// One connected client's frame listener. Dropping it detaches the
/// listener from the frame source.
pub(crate) struct ClientSubscription {
    id: Uuid,
    frames: broadcast::Receiver<Bytes>,
    hub: Arc<StreamHub>,
}

impl ClientSubscription {
    pub fn attach(hub: Arc<StreamHub>) -> Self {
        let id = Uuid::new_v4();
        let frames = hub.frames.subscribe();
        let clients = hub.clients.fetch_add(1, Ordering::AcqRel) + 1;
        if hub.verbose() {
            log::debug!("Client {} connected ({} active)", id, clients);
        }
        Self { id, frames, hub }
    }

    /// Forward frames to the client's response body until the client goes
    /// away or the stream stops. A client that reads slowly holds back only
    /// its own receiver, which then skips ahead once it lags.
    pub async fn pump(mut self, body: mpsc::Sender<Bytes>) {
        let mut state = self.hub.state.subscribe();
        if !state.borrow_and_update().is_active() {
            return;
        }
        let mime_type = self.hub.mime_type();
        loop {
            tokio::select! {
                frame = self.frames.recv() => match frame {
                    Ok(frame) => {
                        let part = multipart_part(&mime_type, &frame);
                        tokio::select! {
                            sent = body.send(part) => {
                                if sent.is_err() {
                                    if self.hub.verbose() {
                                        log::warn!("{}", Error::Write(self.id.to_string()));
                                    }
                                    break;
                                }
                            }
                            _ = stopped(&mut state) => break,
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        if self.hub.verbose() {
                            log::debug!("Client {} lagged, skipped {} frames", self.id, skipped);
                        }
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = body.closed() => break,
                _ = stopped(&mut state) => break,
            }
        }
    }
}

impl Drop for ClientSubscription {
    fn drop(&mut self) {
        let remaining = self.hub.clients.fetch_sub(1, Ordering::AcqRel) - 1;
        if self.hub.verbose() {
            log::debug!("Client {} disconnected ({} active)", self.id, remaining);
        }
    }
}

/// Router serving the multipart stream at `pathname`.
pub(crate) fn stream_router(hub: Arc<StreamHub>, pathname: &str) -> Router {
    Router::new()
        .route(pathname, get(serve_stream))
        .with_state(hub)
}

async fn serve_stream(State(hub): State<Arc<StreamHub>>) -> Response {
    if !hub.current_state().is_active() {
        return (StatusCode::SERVICE_UNAVAILABLE, "stream is not active").into_response();
    }

    let subscription = ClientSubscription::attach(hub);
    let (tx, rx) = mpsc::channel::<Bytes>(CLIENT_QUEUE);
    tokio::spawn(subscription.pump(tx));

    let parts = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|part| (Ok::<_, Infallible>(part), rx))
    });

    (
        [
            (
                header::CACHE_CONTROL,
                "no-store, no-cache, must-revalidate, pre-check=0, post-check=0, max-age=0",
            ),
            (header::PRAGMA, "no-cache"),
            (header::CONNECTION, "close"),
            (header::CONTENT_TYPE, MULTIPART_CONTENT_TYPE),
        ],
        Body::from_stream(parts),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn active_hub() -> Arc<StreamHub> {
        let hub = Arc::new(StreamHub::new("image/jpeg".to_string()));
        hub.state.send_replace(StreamState::Started);
        hub
    }

    #[tokio::test]
    async fn test_subscription_counts_clients() {
        let hub = active_hub();
        let a = ClientSubscription::attach(hub.clone());
        let b = ClientSubscription::attach(hub.clone());
        assert_eq!(hub.connected_clients(), 2);
        assert_eq!(hub.frames.subscriber_count(), 2);
        drop(a);
        assert_eq!(hub.connected_clients(), 1);
        drop(b);
        assert_eq!(hub.connected_clients(), 0);
        assert_eq!(hub.frames.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_pump_writes_parts() {
        let hub = active_hub();
        let (tx, mut rx) = mpsc::channel(CLIENT_QUEUE);
        let task = tokio::spawn(ClientSubscription::attach(hub.clone()).pump(tx));

        hub.frames.sink().push(Bytes::from_static(b"frame"));
        let part = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(part.ends_with(b"Content-length: 5\n\nframe"));

        drop(rx);
        hub.frames.sink().push(Bytes::from_static(b"next"));
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hub.connected_clients(), 0);
    }

    #[tokio::test]
    async fn test_pump_delivers_a_burst_in_order() {
        let hub = active_hub();
        let (tx, mut rx) = mpsc::channel(CLIENT_QUEUE);
        let task = tokio::spawn(ClientSubscription::attach(hub.clone()).pump(tx));

        let sink = hub.frames.sink();
        for n in 0..10 {
            sink.push(format!("f{:02}", n).into_bytes());
        }
        for n in 0..10 {
            let part = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert!(part.ends_with(format!("f{:02}", n).as_bytes()));
        }

        hub.state.send_replace(StreamState::Stopped);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_pump_ends_on_stop() {
        let hub = active_hub();
        let (tx, mut rx) = mpsc::channel(CLIENT_QUEUE);
        let task = tokio::spawn(ClientSubscription::attach(hub.clone()).pump(tx));

        tokio::task::yield_now().await;
        hub.state.send_replace(StreamState::Stopped);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_recorder_keeps_last_frame() {
        let hub = active_hub();
        let recorder = spawn_recorder(hub.clone(), hub.frames.subscribe());
        let mut last = hub.last_frame.subscribe();

        hub.frames.sink().push(Bytes::from_static(b"one"));
        hub.frames.sink().push(Bytes::from_static(b"two"));
        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if last.borrow_and_update().as_deref() == Some(&b"two"[..]) {
                    break;
                }
                last.changed().await.unwrap();
            }
        })
        .await
        .unwrap();

        hub.state.send_replace(StreamState::Stopped);
        tokio::time::timeout(Duration::from_secs(1), recorder)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hub.last_frame().unwrap(), Bytes::from_static(b"two"));
    }
}
