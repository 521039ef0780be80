use crate::error::Result;
use axum::Router;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// An HTTP server owned by the caller that the stream route can be
/// mounted on. The controller never starts, stops or reconfigures it.
pub trait HttpHost: Send + Sync {
    fn mount(&self, pathname: &str, route: Router);
}

/// Collects mounted routes so the caller can serve them alongside its own.
#[derive(Clone, Default)]
pub struct MountTable {
    routes: Arc<Mutex<Router>>,
}

impl MountTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything mounted so far, merged into a single router.
    pub fn router(&self) -> Router {
        match self.routes.lock() {
            Ok(routes) => routes.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl HttpHost for MountTable {
    fn mount(&self, pathname: &str, route: Router) {
        let mut routes = match self.routes.lock() {
            Ok(routes) => routes,
            Err(poisoned) => poisoned.into_inner(),
        };
        let current = std::mem::take(&mut *routes);
        *routes = current.merge(route);
        log::info!("Mounted stream route {}", pathname);
    }
}

/// Server created and owned by the controller. The socket is bound up
/// front so address problems surface before the camera starts; requests
/// are only served once [`OwnedServer::serve`] hands it a router.
pub(crate) struct OwnedServer {
    local_addr: SocketAddr,
    listener: Option<TcpListener>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl OwnedServer {
    pub async fn bind(address: &str, port: u16) -> Result<Self> {
        let listener = TcpListener::bind((address, port)).await?;
        let local_addr = listener.local_addr()?;
        log::info!("Stream server bound to {}", local_addr);
        Ok(Self {
            local_addr,
            listener: Some(listener),
            shutdown: None,
            task: None,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Start serving `router`. Only the first call has any effect.
    pub fn serve(&mut self, router: Router) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        let (shutdown, signal) = oneshot::channel::<()>();
        let local_addr = self.local_addr;
        self.shutdown = Some(shutdown);
        self.task = Some(tokio::spawn(async move {
            let server = axum::serve(listener, router).with_graceful_shutdown(async move {
                let _ = signal.await;
            });
            if let Err(e) = server.await {
                log::error!("Stream server on {} failed: {}", local_addr, e);
            }
        }));
    }

    /// Stop accepting connections and wait for open responses to finish.
    pub async fn shutdown(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::error!("Stream server task ended abnormally: {}", e);
            }
        }
        self.listener = None;
        log::info!("Stream server on {} closed", self.local_addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn fetch(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
            path
        );
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[test]
    fn test_mount_table_merges_routes() {
        let table = MountTable::new();
        table.mount("/a", Router::new().route("/a", get(|| async { "a" })));
        table.mount("/b", Router::new().route("/b", get(|| async { "b" })));
        let _router: Router = table.router();
    }

    #[tokio::test]
    async fn test_owned_server_serves_and_shuts_down() {
        let mut server = OwnedServer::bind("127.0.0.1", 0).await.unwrap();
        let addr = server.local_addr();
        assert_ne!(addr.port(), 0);

        server.serve(Router::new().route("/ping", get(|| async { "pong" })));
        let response = fetch(addr, "/ping").await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("pong"));

        server.shutdown().await;
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_bind_conflict_is_io_error() {
        let server = OwnedServer::bind("127.0.0.1", 0).await.unwrap();
        let port = server.local_addr().port();
        let err = match OwnedServer::bind("127.0.0.1", port).await {
            Ok(_) => panic!("second bind on port {} succeeded", port),
            Err(e) => e,
        };
        assert!(matches!(err, crate::Error::Io(_)));
    }
}
