//! Shared helpers for integration tests: a scripted HTTP server.
#![allow(dead_code)]

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use axum::{Router, body::Bytes, extract::State, http::StatusCode};
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};

#[derive(Clone)]
struct Script {
    replies: Arc<Vec<(u16, String)>>,
    hits: Arc<AtomicUsize>,
    bodies: Arc<Mutex<Vec<String>>>,
}

/// Answers every request with the next scripted `(status, body)`; the last
/// entry repeats once the script runs out.
pub struct MockServer {
    base: String,
    script: Script,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MockServer {
    pub async fn start(replies: &[(u16, &str)]) -> Self {
        assert!(!replies.is_empty(), "script needs at least one reply");
        let script = Script {
            replies: Arc::new(replies.iter().map(|(s, b)| (*s, b.to_string())).collect()),
            hits: Arc::new(AtomicUsize::new(0)),
            bodies: Arc::new(Mutex::new(Vec::new())),
        };

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock listener");
        let addr = listener.local_addr().expect("mock listener address");

        let app = Router::new().fallback(respond).with_state(script.clone());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(err) = server.await {
                eprintln!("mock server stopped: {err}");
            }
        });

        Self {
            base: format!("http://{addr}"),
            script,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    pub fn hits(&self) -> usize {
        self.script.hits.load(Ordering::SeqCst)
    }

    /// Request bodies received so far, in arrival order.
    pub fn bodies(&self) -> Vec<String> {
        self.script.bodies.lock().unwrap().clone()
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

async fn respond(State(script): State<Script>, body: Bytes) -> (StatusCode, String) {
    let n = script.hits.fetch_add(1, Ordering::SeqCst);
    script
        .bodies
        .lock()
        .unwrap()
        .push(String::from_utf8_lossy(&body).into_owned());
    let (code, text) = &script.replies[n.min(script.replies.len() - 1)];
    (StatusCode::from_u16(*code).unwrap(), text.clone())
}

/// A URL nothing is listening on.
pub async fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind throwaway listener");
    let addr = listener.local_addr().expect("throwaway address");
    drop(listener);
    format!("http://{addr}/resource")
}
