#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub enum Route {
    Body {
        content_type: &'static str,
        body: Vec<u8>,
        delay: Duration,
    },
    Status(u16),
    /// Accept the request and never answer.
    Hang,
}

impl Route {
    pub fn html(body: &str) -> Self {
        Self::Body {
            content_type: "text/html; charset=utf-8",
            body: body.as_bytes().to_vec(),
            delay: Duration::ZERO,
        }
    }

    pub fn png(width: u32, height: u32) -> Self {
        Self::Body {
            content_type: "image/png",
            body: png_bytes(width, height),
            delay: Duration::ZERO,
        }
    }

    pub fn slow_png(width: u32, height: u32, delay: Duration) -> Self {
        Self::Body {
            content_type: "image/png",
            body: png_bytes(width, height),
            delay,
        }
    }
}

/// Minimal HTTP/1.1 server: one response per connection, requests counted per path.
pub struct TestServer {
    pub base: String,
    hits: Arc<Mutex<HashMap<String, usize>>>,
    task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start(routes: Vec<(&str, Route)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let routes: Arc<HashMap<String, Route>> = Arc::new(
            routes
                .into_iter()
                .map(|(path, route)| (path.to_string(), route))
                .collect(),
        );
        let hits = Arc::new(Mutex::new(HashMap::new()));
        let task = tokio::spawn({
            let hits = Arc::clone(&hits);
            async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        break;
                    };
                    let routes = Arc::clone(&routes);
                    let hits = Arc::clone(&hits);
                    tokio::spawn(async move {
                        let _ = serve(stream, &routes, &hits).await;
                    });
                }
            }
        });
        Self {
            base: format!("http://{addr}"),
            hits,
            task,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn hits(&self, path: &str) -> usize {
        self.hits.lock().get(path).copied().unwrap_or(0)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    mut stream: TcpStream,
    routes: &HashMap<String, Route>,
    hits: &Mutex<HashMap<String, usize>>,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let head = String::from_utf8_lossy(&buf);
    let path = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/")
        .to_string();
    *hits.lock().entry(path.clone()).or_default() += 1;

    let (status, content_type, body) = match routes.get(&path) {
        Some(Route::Body {
            content_type,
            body,
            delay,
        }) => {
            tokio::time::sleep(*delay).await;
            (200, *content_type, body.clone())
        }
        Some(Route::Status(code)) => (*code, "text/plain", b"nope".to_vec()),
        Some(Route::Hang) => {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            return Ok(());
        }
        None => (404, "text/plain", b"not found".to_vec()),
    };
    let header = format!(
        "HTTP/1.1 {status} X\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    stream.write_all(header.as_bytes()).await?;
    stream.write_all(&body).await?;
    stream.shutdown().await
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([90, 120, 200, 255]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

pub fn write_png(path: &Path, width: u32, height: u32) {
    std::fs::write(path, png_bytes(width, height)).unwrap();
}

/// Poll `cond` every 20ms until it holds or five seconds pass.
pub async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}

pub fn preload_options() -> bird_slideshow::tasks::preloader::PreloadOptions {
    bird_slideshow::tasks::preloader::PreloadOptions {
        max_preload: 3,
        retain_behind: 2,
        small_memory: false,
        workers: 2,
        max_resize: 2.0,
        window: bird_slideshow::processing::layout::Dimensions::new(800, 600),
        fetch: bird_slideshow::config::FetchOptions {
            timeout: Duration::from_millis(500),
            retries: 1,
            backoff: Duration::from_millis(10),
        },
    }
}
