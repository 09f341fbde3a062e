// Scripted transport for tests.
// Serves canned JSON per endpoint and parameter subset, with optional delays.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::cache::MemoryStore;
use crate::config::Config;
use crate::error::{GlitchError, Result};

use super::client::Transport;
use super::session::Session;
use super::types::{HttpRequest, Params, params};

enum Reply {
    Body(Value),
    Timeout,
}

struct Route {
    endpoint: String,
    params: Params,
    reply: Reply,
    delay: Duration,
}

impl Route {
    fn matches(&self, request: &HttpRequest) -> bool {
        self.endpoint == request.endpoint
            && self
                .params
                .iter()
                .all(|(k, v)| request.params.get(k) == Some(v))
    }
}

/// Transport that answers from a routing table instead of the network.
///
/// The most specific matching route (most parameters) wins.
#[derive(Default)]
pub struct MockTransport {
    routes: Vec<Route>,
    calls: Mutex<Vec<HttpRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(self, endpoint: &str, route_params: &[(&str, &str)], response: Value) -> Self {
        self.route_delayed(endpoint, route_params, response, Duration::ZERO)
    }

    pub fn route_delayed(
        mut self,
        endpoint: &str,
        route_params: &[(&str, &str)],
        response: Value,
        delay: Duration,
    ) -> Self {
        self.routes.push(Route {
            endpoint: endpoint.to_string(),
            params: params(route_params.iter().copied()),
            reply: Reply::Body(response),
            delay,
        });
        self
    }

    /// Matching requests fail as if the server never answered.
    pub fn route_timeout(mut self, endpoint: &str, route_params: &[(&str, &str)]) -> Self {
        self.routes.push(Route {
            endpoint: endpoint.to_string(),
            params: params(route_params.iter().copied()),
            reply: Reply::Timeout,
            delay: Duration::ZERO,
        });
        self
    }

    pub fn calls(&self) -> Vec<HttpRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, endpoint: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.endpoint == endpoint)
            .count()
    }

    /// Highest number of requests observed in flight at once.
    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &HttpRequest) -> Result<Value> {
        self.calls.lock().unwrap().push(request.clone());

        let route = self
            .routes
            .iter()
            .filter(|r| r.matches(request))
            .max_by_key(|r| r.params.len())
            .ok_or_else(|| {
                GlitchError::Other(format!(
                    "no route for {}?{:?}",
                    request.endpoint,
                    request.public_params()
                ))
            })?;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !route.delay.is_zero() {
            tokio::time::sleep(route.delay).await;
        } else {
            tokio::task::yield_now().await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match &route.reply {
            Reply::Body(body) => Ok(body.clone()),
            Reply::Timeout => Err(GlitchError::Timeout {
                endpoint: request.endpoint.clone(),
            }),
        }
    }
}

/// Session over a mock transport and an in-memory cache, with token `tok`.
pub fn test_session(transport: MockTransport) -> (Session, Arc<MockTransport>, Arc<MemoryStore>) {
    let transport = Arc::new(transport);
    let cache = Arc::new(MemoryStore::new());
    let session = Session::new(Config::default(), transport.clone(), cache.clone(), "tok");
    (session, transport, cache)
}
