//! Exposes an in-process test site for use in integration tests.
//!
//! ```
//! use trafgen_test::server::TestSite;
//!
//! #[tokio::main]
//! async fn main() {
//!    let site = TestSite::new().await;
//!    let url = site.url("/");
//!    // use the URL in tests...
//! }
//! ```

use std::net::{IpAddr, SocketAddr, TcpListener};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;

/// Size of the image embedded in the index page.
pub const LOGO_SIZE: usize = 1000;
/// Size of the script embedded in the index page.
pub const SCRIPT_SIZE: usize = 200;
/// Size of the stylesheet linked from the index page.
pub const STYLE_SIZE: usize = 50;
/// Body of the plain text page.
pub const PLAIN_TEXT: &str = "just some text, no links here";

/// The index page.
///
/// It embeds three resources served by the site and one on a port nothing listens on.
pub const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
  <head>
    <link rel="stylesheet" href="/static/style.css">
    <script src="/static/app.js"></script>
  </head>
  <body>
    <img src='static/logo.png' alt="logo">
    <img src="http://127.0.0.1:1/unreachable.png">
    <a href="mailto:nobody@example.com">contact</a>
  </body>
</html>
"#;

/// Total bytes transferred when loading the index page with all reachable resources.
pub const INDEX_TOTAL_SIZE: usize = INDEX_HTML.len() + LOGO_SIZE + SCRIPT_SIZE + STYLE_SIZE;

/// How long the `/slow` page takes to respond.
pub const SLOW_DELAY: Duration = Duration::from_millis(300);

/// An in-process HTTP site for use in integration tests.
///
/// The site listens on a random available port on localhost and serves:
///
///  - `/`: an HTML page embedding several resources, see [`INDEX_HTML`].
///  - `/plain`: a plain text document, see [`PLAIN_TEXT`].
///  - `/slow`: a plain text document delayed by [`SLOW_DELAY`].
///  - `/static/*`: the embedded resources.
///
/// Every other path responds with `404 Not Found`. The site counts every request it receives
/// and records the source address of each, see [`TestSite::hits`] and [`TestSite::peers`].
#[derive(Debug)]
pub struct TestSite {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
    requests: Arc<Requests>,
}

/// Bookkeeping of the requests the site has served.
#[derive(Debug, Default)]
struct Requests {
    hits: AtomicUsize,
    peers: Mutex<Vec<IpAddr>>,
}

impl TestSite {
    pub async fn new() -> Self {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = TcpListener::bind(addr).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();

        let requests = Arc::new(Requests::default());
        let app = Router::new()
            .route("/", get(index))
            .route("/plain", get(plain))
            .route("/slow", get(slow))
            .route("/static/logo.png", get(logo))
            .route("/static/app.js", get(script))
            .route("/static/style.css", get(style))
            .layer(middleware::from_fn_with_state(
                Arc::clone(&requests),
                track,
            ));

        let handle = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            let service = app.into_make_service_with_connect_info::<SocketAddr>();
            axum::serve(listener, service).await.unwrap();
        });

        Self {
            handle,
            socket,
            requests,
        }
    }

    /// Returns a full URL pointing to the given path.
    pub fn url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("http://127.0.0.1:{}/{}", self.socket.port(), path)
    }

    /// Returns the number of requests served so far, including sub-resources.
    pub fn hits(&self) -> usize {
        self.requests.hits.load(Ordering::SeqCst)
    }

    /// Returns the source address of every request served so far, in arrival order.
    pub fn peers(&self) -> Vec<IpAddr> {
        self.requests.peers.lock().unwrap().clone()
    }
}

impl Drop for TestSite {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn track(
    State(requests): State<Arc<Requests>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    requests.hits.fetch_add(1, Ordering::SeqCst);
    requests.peers.lock().unwrap().push(peer.ip());
    next.run(request).await
}

async fn index() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], INDEX_HTML)
}

async fn plain() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain")], PLAIN_TEXT)
}

async fn slow() -> impl IntoResponse {
    tokio::time::sleep(SLOW_DELAY).await;
    ([(header::CONTENT_TYPE, "text/plain")], PLAIN_TEXT)
}

async fn logo() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "image/png")], vec![0x89; LOGO_SIZE])
}

async fn script() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/javascript")],
        "/".repeat(SCRIPT_SIZE),
    )
}

async fn style() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/css")], " ".repeat(STYLE_SIZE))
}
