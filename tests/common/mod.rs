#![allow(dead_code)]

use camera_livestream::{CameraDriver, Completion, FrameSink, LiveStream, StreamConfig};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

/// Camera whose frames are pushed by the test itself.
#[derive(Clone, Default)]
pub struct ManualCamera {
    sink: Arc<Mutex<Option<FrameSink>>>,
}

impl ManualCamera {
    pub fn sink(&self) -> FrameSink {
        self.sink
            .lock()
            .unwrap()
            .clone()
            .expect("camera has not been started")
    }

    /// Push `tick-<n>` frames every few milliseconds until aborted.
    pub fn spawn_ticker(&self) -> JoinHandle<()> {
        let sink = self.sink();
        tokio::spawn(async move {
            let mut n = 0u64;
            loop {
                sink.push(format!("tick-{}", n).into_bytes());
                n += 1;
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
    }
}

impl CameraDriver for ManualCamera {
    fn start(&mut self, _config: &StreamConfig, frames: FrameSink, ready: Completion) {
        *self.sink.lock().unwrap() = Some(frames);
        ready.succeed();
    }

    fn pause(&mut self, done: Completion) {
        done.succeed();
    }

    fn resume(&mut self, done: Completion) {
        done.succeed();
    }

    fn stop(&mut self, done: Completion) {
        self.sink.lock().unwrap().take();
        done.succeed();
    }
}

pub fn local_stream<C: CameraDriver>(camera: C) -> LiveStream<C> {
    let stream = LiveStream::new(camera);
    stream.set_bind_address("127.0.0.1").unwrap();
    stream.set_port(0);
    stream
}

pub fn port_of(url: &str) -> u16 {
    let authority = url
        .trim_start_matches("http://")
        .split('/')
        .next()
        .unwrap();
    authority.rsplit(':').next().unwrap().parse().unwrap()
}

pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

/// Open a client connection and send a GET for `path`.
pub async fn open(port: u16, path: &str) -> TcpStream {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let request = format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", path);
    stream.write_all(request.as_bytes()).await.unwrap();
    stream
}

/// Read into `buf` until it contains `needle`; panics after five seconds.
pub async fn read_until(stream: &mut TcpStream, buf: &mut Vec<u8>, needle: &[u8]) {
    tokio::time::timeout(Duration::from_secs(5), async {
        let mut chunk = [0u8; 4096];
        while !contains(&buf[..], needle) {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(
                n > 0,
                "connection closed before {:?} arrived",
                String::from_utf8_lossy(needle)
            );
            buf.extend_from_slice(&chunk[..n]);
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {:?}", String::from_utf8_lossy(needle)));
}

/// Response head, lowercased, once the blank line after it has arrived.
pub async fn read_head(stream: &mut TcpStream, buf: &mut Vec<u8>) -> String {
    read_until(stream, buf, b"\r\n\r\n").await;
    let end = buf.windows(4).position(|w| w == b"\r\n\r\n").unwrap();
    let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
    buf.drain(..end + 4);
    head
}

pub async fn wait_for_clients<C: CameraDriver>(stream: &LiveStream<C>, expected: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while stream.connected_clients() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "expected {} clients, still {}",
            expected,
            stream.connected_clients()
        )
    });
}
