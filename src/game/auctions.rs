// Auction house listing and creation.

use std::time::Duration;

use serde_json::{Map, Value};
use tracing::info;

use crate::api::types::params;
use crate::api::Session;
use crate::error::Result;

fn list_key(category: Option<&str>) -> String {
    format!("auctions/{}", category.unwrap_or("all"))
}

/// Every open auction, optionally limited to one item category, keyed by
/// auction id with item definitions attached.
pub async fn list(session: &Session, category: Option<&str>) -> Result<Map<String, Value>> {
    let mut request = params([("defs", "1")]);
    if let Some(category) = category {
        request.insert("category".to_string(), category.to_string());
    }

    let page_size = session.config().page_size;
    session
        .fetch_cached(&list_key(category), session.ttl().auctions(), || {
            session.fetch_all_pages("auctions.list", request, page_size, "items")
        })
        .await
}

/// Put `count` items from `stack_tsid` up for auction at `cost` currants.
/// Never served from cache.
pub async fn create(session: &Session, stack_tsid: &str, count: u32, cost: u64) -> Result<Value> {
    info!(stack_tsid, count, cost, "creating auction");
    let request = params([
        ("stack_tsid", stack_tsid.to_string()),
        ("count", count.to_string()),
        ("cost", cost.to_string()),
    ]);
    session
        .with_cache_ttl(Duration::ZERO, session.fetch_once("auctions.create", request))
        .await
}
