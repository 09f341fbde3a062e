// Request scheduler.
// Queues requests, runs their I/O with bounded concurrency, and drains until
// no request is pending, including requests queued by completion callbacks.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::cache::{CacheStore, request_key};
use crate::error::{GlitchError, Result};

use super::client::Transport;
use super::policy::current_cache_ttl;
use super::types::{HttpRequest, Params, check_envelope};

/// Completion handler. Receives the decoded body of a successful response and
/// a handle for queueing follow-up requests into the same drain.
pub type Completion = Box<dyn FnOnce(Value, &Scheduler) -> Result<()> + Send>;

/// Identifies one enqueued request within a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

/// A request waiting to be executed.
pub struct PendingRequest {
    pub endpoint: String,
    pub params: Params,
    pub headers: Vec<(String, String)>,
    /// Explicit TTL; otherwise the ambient policy at enqueue time applies.
    pub ttl_override: Option<Duration>,
    on_complete: Option<Completion>,
}

impl PendingRequest {
    pub fn new(endpoint: impl Into<String>, params: Params) -> Self {
        Self {
            endpoint: endpoint.into(),
            params,
            headers: Vec::new(),
            ttl_override: None,
            on_complete: None,
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_override = Some(ttl);
        self
    }

    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(Value, &Scheduler) -> Result<()> + Send + 'static,
    {
        self.on_complete = Some(Box::new(callback));
        self
    }

    /// Cache key for this request's identity (credential excluded).
    pub fn cache_key(&self) -> String {
        request_key(&self.endpoint, &self.params)
    }
}

impl fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("endpoint", &self.endpoint)
            .field("params", &self.params.keys().collect::<Vec<_>>())
            .field("ttl_override", &self.ttl_override)
            .field("has_callback", &self.on_complete.is_some())
            .finish()
    }
}

/// A request that did not complete successfully.
#[derive(Debug)]
pub struct RequestFailure {
    pub id: RequestId,
    pub error: GlitchError,
}

/// Outcome of one drain.
#[derive(Debug, Default)]
pub struct DrainReport {
    /// Requests whose envelope succeeded.
    pub completed: usize,
    /// Of those, how many were served from the cache.
    pub cache_hits: usize,
    pub failures: Vec<RequestFailure>,
}

impl DrainReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Remove and return the failure recorded for `id`, if any.
    pub fn take_failure(&mut self, id: RequestId) -> Option<GlitchError> {
        let index = self.failures.iter().position(|f| f.id == id)?;
        Some(self.failures.remove(index).error)
    }

    /// First failure in the drain as an error, otherwise the completed count.
    pub fn into_result(self) -> Result<usize> {
        match self.failures.into_iter().next() {
            Some(failure) => Err(failure.error),
            None => Ok(self.completed),
        }
    }
}

struct Queued {
    id: RequestId,
    ttl: Duration,
    request: PendingRequest,
}

struct Waiting {
    endpoint: String,
    on_complete: Option<Completion>,
}

struct Fetched {
    body: Value,
    from_cache: bool,
}

struct Inner {
    transport: Arc<dyn Transport>,
    cache: Arc<dyn CacheStore>,
    max_in_flight: usize,
    queue: Mutex<VecDeque<Queued>>,
    next_id: AtomicU64,
}

/// Bounded-concurrency request scheduler with dynamic fan-out.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(
        transport: Arc<dyn Transport>,
        cache: Arc<dyn CacheStore>,
        max_in_flight: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                cache,
                max_in_flight: max_in_flight.max(1),
                queue: Mutex::new(VecDeque::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Add a request to the pending set. Its TTL is fixed now: the explicit
    /// override if set, otherwise the ambient policy of the calling task.
    pub fn enqueue(&self, request: PendingRequest) -> RequestId {
        let id = RequestId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let ttl = request.ttl_override.unwrap_or_else(current_cache_ttl);
        self.queue().push_back(Queued { id, ttl, request });
        id
    }

    /// Number of requests queued but not yet started.
    pub fn pending(&self) -> usize {
        self.queue().len()
    }

    /// Drain the queue. Returns once nothing is queued and nothing is in
    /// flight; calling it again on an empty queue is a no-op.
    pub async fn run(&self) -> DrainReport {
        let mut report = DrainReport::default();
        let mut waiting: HashMap<RequestId, Waiting> = HashMap::new();
        let mut in_flight: JoinSet<(RequestId, Result<Fetched>)> = JoinSet::new();

        loop {
            while in_flight.len() < self.inner.max_in_flight {
                let Some(queued) = self.queue().pop_front() else {
                    break;
                };
                self.start(queued, &mut waiting, &mut in_flight);
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };

            match joined {
                Ok((id, outcome)) => self.finish(id, outcome, &mut waiting, &mut report),
                Err(e) => error!(error = %e, "request task failed"),
            }
        }

        for (id, orphan) in waiting.drain() {
            report.failures.push(RequestFailure {
                id,
                error: GlitchError::Other(format!("request to {} was aborted", orphan.endpoint)),
            });
        }

        if report.completed > 0 || !report.failures.is_empty() {
            debug!(
                completed = report.completed,
                cache_hits = report.cache_hits,
                failed = report.failures.len(),
                "drain finished"
            );
        }
        report
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<Queued>> {
        self.inner.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn start(
        &self,
        queued: Queued,
        waiting: &mut HashMap<RequestId, Waiting>,
        in_flight: &mut JoinSet<(RequestId, Result<Fetched>)>,
    ) {
        let Queued { id, ttl, request } = queued;
        let key = request.cache_key();
        let http = HttpRequest {
            endpoint: request.endpoint,
            params: request.params,
            headers: request.headers,
        };

        waiting.insert(
            id,
            Waiting {
                endpoint: http.endpoint.clone(),
                on_complete: request.on_complete,
            },
        );

        let transport = Arc::clone(&self.inner.transport);
        let cache = Arc::clone(&self.inner.cache);
        in_flight.spawn(async move {
            let outcome = fetch(transport.as_ref(), cache.as_ref(), &http, &key, ttl).await;
            (id, outcome)
        });
    }

    fn finish(
        &self,
        id: RequestId,
        outcome: Result<Fetched>,
        waiting: &mut HashMap<RequestId, Waiting>,
        report: &mut DrainReport,
    ) {
        let Some(entry) = waiting.remove(&id) else {
            return;
        };

        let fetched = match outcome {
            Ok(fetched) => fetched,
            Err(error) => {
                warn!(endpoint = %entry.endpoint, error = %error, "request failed");
                report.failures.push(RequestFailure { id, error });
                return;
            }
        };

        report.completed += 1;
        if fetched.from_cache {
            report.cache_hits += 1;
        }

        if let Some(callback) = entry.on_complete {
            if let Err(error) = callback(fetched.body, self) {
                warn!(endpoint = %entry.endpoint, error = %error, "completion handler failed");
                report.failures.push(RequestFailure { id, error });
            }
        }
    }
}

/// Serve one request from the cache or the transport, validating the envelope.
/// Only successful envelopes are written back, and only for cacheable requests.
async fn fetch(
    transport: &dyn Transport,
    cache: &dyn CacheStore,
    http: &HttpRequest,
    key: &str,
    ttl: Duration,
) -> Result<Fetched> {
    if let Some(body) = cache.get(key, ttl) {
        return Ok(Fetched {
            body,
            from_cache: true,
        });
    }

    debug!(endpoint = %http.endpoint, ttl_secs = ttl.as_secs(), "fetching");
    let body = transport.send(http).await?;
    let body = check_envelope(&http.endpoint, &http.public_params(), body)?;

    let body = if ttl.is_zero() {
        body
    } else {
        cache.set(key, body)
    };

    Ok(Fetched {
        body,
        from_cache: false,
    })
}
