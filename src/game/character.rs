// Player queries.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::api::types::{keyed_object, params};
use crate::api::{Params, Session};
use crate::error::{GlitchError, Result};

/// Basic identity from `players.info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub player_tsid: String,
    #[serde(default)]
    pub player_name: String,
}

/// Where the player currently stands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub tsid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub hub_id: Option<Value>,
}

pub async fn me(session: &Session) -> Result<Player> {
    let body = session.fetch_once("players.info", Params::new()).await?;
    Ok(serde_json::from_value(body)?)
}

/// Full profile of `player_tsid` as seen by the authenticated player.
pub async fn details(session: &Session, player_tsid: &str) -> Result<Value> {
    let viewer = me(session).await?;
    session
        .fetch_once(
            "players.fullInfo",
            params([
                ("player_tsid", player_tsid),
                ("viewer_tsid", viewer.player_tsid.as_str()),
            ]),
        )
        .await
}

pub async fn location(session: &Session) -> Result<Location> {
    let viewer = me(session).await?;
    let profile = details(session, &viewer.player_tsid).await?;
    match profile.get("location") {
        Some(loc) if loc.is_object() => Ok(serde_json::from_value(loc.clone())?),
        _ => Err(GlitchError::Other(format!(
            "no location in profile of {}",
            viewer.player_tsid
        ))),
    }
}

/// Tsid of the street the player is standing on.
pub async fn current_street(session: &Session) -> Result<String> {
    Ok(location(session).await?.tsid)
}

/// Inventory slots with item definitions attached.
pub async fn inventory(session: &Session) -> Result<Map<String, Value>> {
    #[derive(Deserialize)]
    struct Inventory {
        #[serde(default, deserialize_with = "keyed_object")]
        contents: Map<String, Value>,
    }

    let body = session
        .fetch_once("players.inventory", params([("defs", "1")]))
        .await?;
    let inventory: Inventory = serde_json::from_value(body)?;
    Ok(inventory.contents)
}
