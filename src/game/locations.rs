// Street queries and world graph traversal.
// Walks the street graph from a starting street, with one subway hop per branch.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::api::scheduler::{PendingRequest, Scheduler};
use crate::api::session::Authorizer;
use crate::api::types::{keyed_object, params};
use crate::api::{Params, Session};
use crate::error::{GlitchError, Result};

const SUBWAYS_KEY: &str = "subways";
const SUBWAY_MARKER: &str = "Subway Station";

/// Street details from `locations.streetInfo`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Street {
    /// The street tsid the data was requested for.
    #[serde(default, skip_deserializing)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Neighbouring streets keyed by tsid.
    #[serde(default, deserialize_with = "keyed_object")]
    pub connections: Map<String, Value>,
    #[serde(default)]
    pub active_project: Option<Value>,
}

impl Street {
    /// Decode a street response for `tsid`.
    pub fn from_body(tsid: &str, body: Value) -> Result<Self> {
        let mut street: Street = serde_json::from_value(body)?;
        street.id = tsid.to_string();
        Ok(street)
    }

    /// Tsids of directly connected streets.
    pub fn connection_ids(&self) -> impl Iterator<Item = &str> {
        self.connections.keys().map(String::as_str)
    }

    /// Connections that lead to a subway station.
    pub fn subway_connections(&self) -> impl Iterator<Item = &str> {
        self.connections
            .iter()
            .filter(|(_, conn)| {
                conn.get("name")
                    .and_then(Value::as_str)
                    .is_some_and(|name| name.contains(SUBWAY_MARKER))
            })
            .map(|(tsid, _)| tsid.as_str())
    }

    pub fn has_active_project(&self) -> bool {
        !matches!(
            self.active_project,
            None | Some(Value::Null) | Some(Value::Bool(false))
        )
    }
}

/// One street reached during a traversal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Visit {
    pub distance: u32,
    pub via_subway: bool,
    pub street: Street,
}

fn street_params(tsid: &str) -> Params {
    params([("street_tsid", tsid)])
}

/// Street info for one tsid, cached for the configured street TTL.
pub async fn street(session: &Session, tsid: &str) -> Result<Street> {
    let key = format!("streets/{}", tsid);
    let body: Value = session
        .fetch_cached(&key, session.ttl().street(), || {
            session.fetch_once("locations.streetInfo", street_params(tsid))
        })
        .await?;
    Street::from_body(tsid, body)
}

/// Hubs (regions) keyed by hub id.
pub async fn hubs(session: &Session) -> Result<Map<String, Value>> {
    let body = session.fetch_once("locations.getHubs", Params::new()).await?;
    Ok(body
        .get("hubs")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default())
}

/// Visit every street in the world in one drain: hubs, then each hub's
/// streets, then each street's info. Returns the number of streets seen.
///
/// Requests use the ambient cache TTL of the caller.
pub async fn all_streets<F>(session: &Session, on_street: F) -> Result<usize>
where
    F: FnMut(&Street) + Send + 'static,
{
    let scheduler = session.scheduler();
    let auth = session.authorizer().clone();
    let on_street = Arc::new(Mutex::new(on_street));
    let seen: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
    let count = Arc::new(Mutex::new(0usize));

    let counter = Arc::clone(&count);
    scheduler.enqueue(session.request("locations.getHubs", Params::new()).on_complete(
        move |body, scheduler| {
            for hub in object_keys(&body, "hubs") {
                let auth_for_hub = auth.clone();
                let on_street = Arc::clone(&on_street);
                let seen = Arc::clone(&seen);
                let counter = Arc::clone(&counter);
                let request = auth
                    .request("locations.getStreets", params([("hub_id", hub.as_str())]))
                    .on_complete(move |body, scheduler| {
                        for tsid in object_keys(&body, "streets") {
                            if !lock(&seen).insert(tsid.clone()) {
                                continue;
                            }
                            let on_street = Arc::clone(&on_street);
                            let counter = Arc::clone(&counter);
                            scheduler.enqueue(street_request(&auth_for_hub, &tsid, move |street| {
                                *lock(&counter) += 1;
                                (*lock(&on_street))(&street);
                                Ok(())
                            }));
                        }
                        Ok(())
                    });
                scheduler.enqueue(request);
            }
            Ok(())
        },
    ));

    scheduler.run().await.into_result()?;
    Ok(*lock(&count))
}

/// Tsids of every subway street, discovered by scanning all streets.
/// The scan is expensive, so the result is cached for the subway TTL.
pub async fn subways(session: &Session) -> Result<Vec<String>> {
    let street_ttl = session.ttl().street();
    session
        .fetch_cached(SUBWAYS_KEY, session.ttl().subways(), || async {
            let found: Arc<Mutex<BTreeSet<String>>> = Arc::new(Mutex::new(BTreeSet::new()));
            let sink = Arc::clone(&found);
            session
                .with_cache_ttl(
                    street_ttl,
                    all_streets(session, move |street| {
                        lock(&sink).extend(street.subway_connections().map(str::to_string));
                    }),
                )
                .await?;
            let found = lock(&found).iter().cloned().collect::<Vec<_>>();
            debug!(count = found.len(), "subway streets discovered");
            Ok::<_, GlitchError>(found)
        })
        .await
}

/// Streets that currently have an active project.
pub async fn active_projects(session: &Session) -> Result<Vec<Street>> {
    let projects: Arc<Mutex<Vec<Street>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&projects);
    all_streets(session, move |street| {
        if street.has_active_project() {
            lock(&sink).push(street.clone());
        }
    })
    .await?;

    let mut projects = std::mem::take(&mut *lock(&projects));
    projects.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(projects)
}

/// Explore outward from `start`, calling `on_visit(distance, street, via_subway)`
/// once per reachable street. The subway network is looked up first.
pub async fn explore<F>(session: &Session, start: &str, on_visit: F) -> Result<usize>
where
    F: FnMut(u32, &Street, bool) + Send + 'static,
{
    let subways = subways(session).await?;
    explore_with_subways(session, start, subways, on_visit).await
}

/// Like [`explore`], with a caller-supplied set of subway streets.
///
/// Regular connections are always followed. From a subway street, a branch
/// that has not yet ridden the subway may jump to every subway street; the
/// branch is then marked and never jumps again. Each street is visited at
/// most once per traversal. The start street has distance 1.
pub async fn explore_with_subways<F, I>(
    session: &Session,
    start: &str,
    subways: I,
    on_visit: F,
) -> Result<usize>
where
    F: FnMut(u32, &Street, bool) + Send + 'static,
    I: IntoIterator<Item = String>,
{
    let walk = Arc::new(Walk {
        auth: session.authorizer().clone(),
        subways: subways.into_iter().collect(),
        visited: Mutex::new(HashSet::from([start.to_string()])),
        on_visit: Mutex::new(on_visit),
    });

    let scheduler = session.scheduler();
    let report = session
        .with_cache_ttl(session.ttl().explore(), async {
            scheduler.enqueue(visit_request(Arc::clone(&walk), start, 1, false));
            scheduler.run().await
        })
        .await;

    report.into_result()
}

/// Shared state of one traversal.
struct Walk<F> {
    auth: Authorizer,
    subways: BTreeSet<String>,
    visited: Mutex<HashSet<String>>,
    on_visit: Mutex<F>,
}

fn visit_request<F>(walk: Arc<Walk<F>>, tsid: &str, distance: u32, via_subway: bool) -> PendingRequest
where
    F: FnMut(u32, &Street, bool) + Send + 'static,
{
    let id = tsid.to_string();
    walk.auth
        .request("locations.streetInfo", street_params(tsid))
        .on_complete(move |body, scheduler| {
            let street = Street::from_body(&id, body)?;
            (*lock(&walk.on_visit))(distance, &street, via_subway);
            expand(&walk, &street, distance, via_subway, scheduler);
            Ok(())
        })
}

fn expand<F>(walk: &Arc<Walk<F>>, street: &Street, distance: u32, via_subway: bool, scheduler: &Scheduler)
where
    F: FnMut(u32, &Street, bool) + Send + 'static,
{
    let mut next: Vec<(String, bool)> = Vec::new();
    {
        let mut visited = lock(&walk.visited);
        for tsid in street.connection_ids() {
            if visited.insert(tsid.to_string()) {
                next.push((tsid.to_string(), via_subway));
            }
        }
        if !via_subway && walk.subways.contains(&street.id) {
            for tsid in &walk.subways {
                if visited.insert(tsid.clone()) {
                    next.push((tsid.clone(), true));
                }
            }
        }
    }

    for (tsid, subway) in next {
        scheduler.enqueue(visit_request(Arc::clone(walk), &tsid, distance + 1, subway));
    }
}

fn object_keys(body: &Value, key: &str) -> Vec<String> {
    body.get(key)
        .and_then(Value::as_object)
        .map(|map| map.keys().cloned().collect())
        .unwrap_or_default()
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn street_request<C>(auth: &Authorizer, tsid: &str, on_street: C) -> PendingRequest
where
    C: FnOnce(Street) -> Result<()> + Send + 'static,
{
    let id = tsid.to_string();
    auth.request("locations.streetInfo", street_params(tsid))
        .on_complete(move |body, _| on_street(Street::from_body(&id, body)?))
}
