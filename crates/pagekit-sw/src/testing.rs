//! Scripted in-memory network for exercising interception and lifecycle
//! flows without sockets.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use bytes::Bytes;
use futures::future::BoxFuture;
use hashbrown::HashMap;
use http::{HeaderMap, StatusCode};

use crate::fetch::{FetchFailure, FetchRequest, FetchedResponse, RemoteFetch};

/// A scripted network: responses keyed by URL path, with switchable
/// offline mode and per-path failures.
#[derive(Default)]
pub struct ScriptedNetwork {
    responses: Mutex<HashMap<String, (u16, Vec<u8>)>>,
    failing: Mutex<Vec<String>>,
    offline: AtomicBool,
    requests: Mutex<Vec<String>>,
}

impl ScriptedNetwork {
    /// Create an empty scripted network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a response for a path.
    pub fn respond(&self, path: &str, status: u16, body: &[u8]) {
        self.responses
            .lock()
            .unwrap()
            .insert(path.to_string(), (status, body.to_vec()));
    }

    /// Make one path fail with a network error.
    pub fn fail(&self, path: &str) {
        self.failing.lock().unwrap().push(path.to_string());
    }

    /// Fail every request until `go_online`.
    pub fn go_offline(&self) {
        self.offline.store(true, Ordering::SeqCst);
    }

    /// Resume scripted responses.
    pub fn go_online(&self) {
        self.offline.store(false, Ordering::SeqCst);
    }

    /// Paths fetched so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl RemoteFetch for ScriptedNetwork {
    fn fetch<'a>(
        &'a self,
        request: &'a FetchRequest,
    ) -> BoxFuture<'a, Result<FetchedResponse, FetchFailure>> {
        let path = request.url.path().to_string();
        self.requests.lock().unwrap().push(path.clone());

        let result = if self.offline.load(Ordering::SeqCst) {
            Err(FetchFailure::Network("offline".to_string()))
        } else if self.failing.lock().unwrap().iter().any(|p| *p == path) {
            Err(FetchFailure::Network(format!("connection reset: {path}")))
        } else {
            match self.responses.lock().unwrap().get(&path) {
                Some((status, body)) => Ok(FetchedResponse {
                    status: StatusCode::from_u16(*status).unwrap_or(StatusCode::OK),
                    headers: HeaderMap::new(),
                    body: Bytes::from(body.clone()),
                }),
                None => Err(FetchFailure::Network(format!("no route to {path}"))),
            }
        };

        Box::pin(async move { result })
    }
}
