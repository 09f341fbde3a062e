// API session.
// Owns the transport, cache and credential; issues authenticated requests through
// per-operation schedulers and exposes the single, cached and paginated fetches.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tracing::debug;

use crate::cache::{CacheStore, DiskStore, TOKEN_PARAM};
use crate::config::{Config, TtlConfig};
use crate::error::{GlitchError, Result};

use super::client::{HttpTransport, Transport};
use super::policy::{current_cache_ttl, with_cache_ttl};
use super::scheduler::{PendingRequest, Scheduler};
use super::types::{Params, page_count};

/// Attaches the credential to requests. Cheap to clone into callbacks that
/// need to queue further authenticated requests.
#[derive(Clone)]
pub struct Authorizer {
    token: Arc<str>,
}

impl Authorizer {
    pub fn new(token: &str) -> Self {
        Self {
            token: Arc::from(token),
        }
    }

    /// Build a request carrying the `Authorization` header and token parameter.
    pub fn request(&self, endpoint: &str, params: Params) -> PendingRequest {
        PendingRequest::new(endpoint, params)
            .param(TOKEN_PARAM, self.token.as_ref())
            .header("Authorization", format!("OAuth {}", self.token))
    }
}

/// Shared API session. All transport state lives here; resource modules
/// borrow it.
pub struct Session {
    config: Config,
    transport: Arc<dyn Transport>,
    cache: Arc<dyn CacheStore>,
    auth: Authorizer,
}

impl Session {
    pub fn new(
        config: Config,
        transport: Arc<dyn Transport>,
        cache: Arc<dyn CacheStore>,
        token: &str,
    ) -> Self {
        Self {
            config,
            transport,
            cache,
            auth: Authorizer::new(token),
        }
    }

    /// Build the HTTP transport and disk cache described by `config`.
    pub fn from_config(config: Config) -> Result<Self> {
        let token = config.token()?;
        let transport = HttpTransport::new(&config.base_url, config.timeout())?;
        let cache = DiskStore::new(config.cache_root()?);
        Ok(Self::new(config, Arc::new(transport), Arc::new(cache), &token))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ttl(&self) -> &TtlConfig {
        &self.config.ttl
    }

    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.cache
    }

    pub fn authorizer(&self) -> &Authorizer {
        &self.auth
    }

    /// A fresh scheduler bound to this session's transport and cache.
    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.cache),
            self.config.max_in_flight,
        )
    }

    /// Authenticated request for `endpoint`.
    pub fn request(&self, endpoint: &str, params: Params) -> PendingRequest {
        self.auth.request(endpoint, params)
    }

    /// Run `future` with `ttl` as the ambient cache TTL for every request it
    /// issues.
    pub async fn with_cache_ttl<F: Future>(&self, ttl: Duration, future: F) -> F::Output {
        with_cache_ttl(ttl, future).await
    }

    /// TTL currently in effect for requests issued from this task.
    pub fn current_cache_ttl(&self) -> Duration {
        current_cache_ttl()
    }

    /// Single request: enqueue, drain, and return the validated body.
    pub async fn fetch_once(&self, endpoint: &str, params: Params) -> Result<Value> {
        let (tx, rx) = oneshot::channel();
        let scheduler = self.scheduler();
        let id = scheduler.enqueue(self.request(endpoint, params).on_complete(move |body, _| {
            let _ = tx.send(body);
            Ok(())
        }));

        let mut report = scheduler.run().await;
        if let Some(error) = report.take_failure(id) {
            return Err(error);
        }

        rx.await
            .map_err(|_| GlitchError::Other(format!("no response for {}", endpoint)))
    }

    /// Value-level cache around `producer`.
    ///
    /// On a miss the producer runs with `ttl` as the ambient request TTL and
    /// its result is stored under `key`. The previous ambient TTL is restored
    /// afterwards, including when the producer fails.
    pub async fn fetch_cached<T, F, Fut>(&self, key: &str, ttl: Duration, producer: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        with_cache_ttl(ttl, async {
            if let Some(cached) = self.cache.get(key, ttl) {
                match serde_json::from_value(cached) {
                    Ok(value) => return Ok(value),
                    Err(e) => debug!(key, error = %e, "cached value has unexpected shape"),
                }
            }

            let value = producer().await?;
            self.cache.set(key, serde_json::to_value(&value)?);
            Ok::<T, GlitchError>(value)
        })
        .await
    }

    /// Fetch every page of a paginated endpoint and merge the items found
    /// under `merge_key` into one mapping keyed by item id.
    ///
    /// Page 1 reports the page count; pages 2..N are queued from its
    /// completion and merged in whatever order they arrive.
    pub async fn fetch_all_pages(
        &self,
        endpoint: &str,
        params: Params,
        page_size: u32,
        merge_key: &str,
    ) -> Result<Map<String, Value>> {
        let merged = Arc::new(Mutex::new(Map::new()));
        let scheduler = self.scheduler();

        let first = page_params(&params, page_size, 1);
        let auth = self.auth.clone();
        let endpoint_owned = endpoint.to_string();
        let key = merge_key.to_string();
        let sink = Arc::clone(&merged);

        scheduler.enqueue(self.request(endpoint, first).on_complete(move |body, scheduler| {
            for page in 2..=page_count(&body) {
                let sink = Arc::clone(&sink);
                let key = key.clone();
                let request = auth
                    .request(&endpoint_owned, page_params(&params, page_size, page))
                    .on_complete(move |body, _| merge_page(&sink, &body, &key));
                scheduler.enqueue(request);
            }
            merge_page(&sink, &body, &key)
        }));

        scheduler.run().await.into_result()?;

        let mut merged = merged.lock().unwrap_or_else(|e| e.into_inner());
        Ok(std::mem::take(&mut *merged))
    }
}

fn page_params(params: &Params, page_size: u32, page: u64) -> Params {
    let mut params = params.clone();
    params.insert("per_page".to_string(), page_size.to_string());
    params.insert("page".to_string(), page.to_string());
    params
}

/// Insert one page's items. Plain key insertion, so arrival order is irrelevant.
fn merge_page(sink: &Mutex<Map<String, Value>>, body: &Value, merge_key: &str) -> Result<()> {
    match body.get(merge_key) {
        Some(Value::Object(items)) => {
            let mut sink = sink.lock().unwrap_or_else(|e| e.into_inner());
            for (id, item) in items {
                sink.insert(id.clone(), item.clone());
            }
            Ok(())
        }
        // Empty collections arrive as `[]`.
        None | Some(Value::Null) => Ok(()),
        Some(Value::Array(items)) if items.is_empty() => Ok(()),
        Some(_) => Err(GlitchError::Other(format!(
            "unexpected shape for `{}` in paginated response",
            merge_key
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::{MockTransport, test_session as session};
    use crate::api::types::params;
    use serde_json::json;

    fn three_pages(delays: [u64; 3]) -> MockTransport {
        MockTransport::new()
            .route_delayed(
                "auctions.list",
                &[("page", "1")],
                json!({"ok": 1, "pages": 3, "items": {"a1": {"cost": 10}, "a2": {"cost": 20}}}),
                Duration::from_millis(delays[0]),
            )
            .route_delayed(
                "auctions.list",
                &[("page", "2")],
                json!({"ok": 1, "pages": 3, "items": {"b1": {"cost": 30}}}),
                Duration::from_millis(delays[1]),
            )
            .route_delayed(
                "auctions.list",
                &[("page", "3")],
                json!({"ok": 1, "pages": 3, "items": {"c1": {"cost": 40}, "c2": {"cost": 50}}}),
                Duration::from_millis(delays[2]),
            )
    }

    #[tokio::test]
    async fn test_fetch_once_attaches_credentials() {
        let (session, transport, _) =
            session(MockTransport::new().route("players.info", &[], json!({"ok": 1, "player_tsid": "P1"})));

        let body = session.fetch_once("players.info", Params::new()).await.unwrap();
        assert_eq!(body["player_tsid"], "P1");

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].params.get(TOKEN_PARAM).map(String::as_str), Some("tok"));
        assert!(
            calls[0]
                .headers
                .contains(&("Authorization".to_string(), "OAuth tok".to_string()))
        );
    }

    #[tokio::test]
    async fn test_fetch_once_surfaces_api_error() {
        let (session, _, _) = session(MockTransport::new().route(
            "skills.learn",
            &[],
            json!({"ok": 0, "error": "already_learning"}),
        ));

        let err = session
            .fetch_once("skills.learn", params([("skill_class", "animalkinship_1")]))
            .await
            .unwrap_err();

        match err {
            GlitchError::Api {
                code,
                endpoint,
                params,
            } => {
                assert_eq!(code, "already_learning");
                assert_eq!(endpoint, "skills.learn");
                assert_eq!(params.get("skill_class").map(String::as_str), Some("animalkinship_1"));
                assert!(!params.contains_key(TOKEN_PARAM));
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_all_pages_merges_every_page() {
        let (session, transport, _) = session(three_pages([0, 0, 0]));

        let items = session
            .fetch_all_pages("auctions.list", params([("defs", "1")]), 200, "items")
            .await
            .unwrap();

        let mut ids: Vec<_> = items.keys().cloned().collect();
        ids.sort();
        assert_eq!(ids, vec!["a1", "a2", "b1", "c1", "c2"]);
        assert_eq!(transport.call_count("auctions.list"), 3);
        assert!(
            transport
                .calls()
                .iter()
                .all(|c| c.params.get("per_page").map(String::as_str) == Some("200")
                    && c.params.get("defs").map(String::as_str) == Some("1"))
        );
    }

    #[tokio::test]
    async fn test_fetch_all_pages_is_order_independent() {
        let (forward, _, _) = session(three_pages([0, 5, 30]));
        let (reverse, _, _) = session(three_pages([0, 30, 5]));

        let a = forward
            .fetch_all_pages("auctions.list", Params::new(), 200, "items")
            .await
            .unwrap();
        let b = reverse
            .fetch_all_pages("auctions.list", Params::new(), 200, "items")
            .await
            .unwrap();

        assert_eq!(a, b);
        assert_eq!(a.len(), 5);
    }

    #[tokio::test]
    async fn test_fetch_all_pages_fails_on_rejected_page() {
        let transport = MockTransport::new()
            .route("skills.listAll", &[("page", "1")], json!({"ok": 1, "pages": 2, "items": {"a": {}}}))
            .route("skills.listAll", &[("page", "2")], json!({"ok": 0, "error": "rate_limited"}));
        let (session, _, _) = session(transport);

        let err = session
            .fetch_all_pages("skills.listAll", Params::new(), 200, "items")
            .await
            .unwrap_err();
        assert_eq!(err.api_code(), Some("rate_limited"));
    }

    #[tokio::test]
    async fn test_fetch_all_pages_single_page_with_empty_items() {
        let (session, _, _) = session(MockTransport::new().route(
            "auctions.list",
            &[],
            json!({"ok": 1, "pages": 0, "items": []}),
        ));

        let items = session
            .fetch_all_pages("auctions.list", Params::new(), 200, "items")
            .await
            .unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_cached_uses_store_and_scopes_ttl() {
        let (session, transport, cache) =
            session(MockTransport::new().route("players.info", &[], json!({"ok": 1, "n": 1})));
        let ttl = Duration::from_secs(600);

        for _ in 0..2 {
            let value: Value = session
                .fetch_cached("players/me", ttl, || async {
                    assert_eq!(session.current_cache_ttl(), ttl);
                    session.fetch_once("players.info", Params::new()).await
                })
                .await
                .unwrap();
            assert_eq!(value["n"], 1);
        }

        assert_eq!(transport.call_count("players.info"), 1);
        assert!(cache.contains("players/me"));
        assert_eq!(session.current_cache_ttl(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_fetch_cached_restores_ttl_after_failure() {
        let (session, _, cache) = session(MockTransport::new());

        let outer = Duration::from_secs(30);
        let result: Result<Value> = session
            .with_cache_ttl(outer, async {
                let inner = session
                    .fetch_cached("broken", Duration::from_secs(60), || async {
                        Err(GlitchError::Other("boom".to_string()))
                    })
                    .await;
                assert_eq!(session.current_cache_ttl(), outer);
                inner
            })
            .await;

        assert!(result.is_err());
        assert!(!cache.contains("broken"));
    }

    #[tokio::test]
    async fn test_fetch_cached_zero_ttl_always_produces() {
        let (session, transport, _) =
            session(MockTransport::new().route("skills.listAvailable", &[], json!({"ok": 1})));

        for _ in 0..2 {
            let _: Value = session
                .fetch_cached("learnable", Duration::ZERO, || {
                    session.fetch_once("skills.listAvailable", Params::new())
                })
                .await
                .unwrap();
        }
        assert_eq!(transport.call_count("skills.listAvailable"), 2);
    }
}
