// Skill queries and the learn-queue resolver.
// Computes transitive prerequisite closures and picks what to learn next.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::api::types::{id_list, int_bool, lenient_u64, params};
use crate::api::{Params, Session};
use crate::error::Result;

const ALL_SKILLS_KEY: &str = "all_skills";

/// One skill as reported by the catalog or the learnable listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillRecord {
    /// Taken from the key the API files the skill under.
    #[serde(default, skip_deserializing)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "id_list")]
    pub required_skills: Vec<String>,
    #[serde(default, skip_deserializing)]
    pub learnable: bool,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub time_remaining: u64,
}

/// Skills keyed by id.
pub type SkillCatalog = BTreeMap<String, SkillRecord>;

/// An ordered list of skill ids forming one goal.
pub type TargetChain = Vec<String>;

/// A referenced skill id that is not in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnknownSkill {
    pub id: String,
    /// The skill that listed it as a prerequisite; `None` for a target.
    pub required_by: Option<String>,
}

/// A prerequisite edge that closes a loop: `skill` requires `prerequisite`,
/// which itself depends on `skill`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkillCycle {
    pub skill: String,
    pub prerequisite: String,
}

/// Transitive prerequisites of a set of targets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Closure {
    /// Every id exactly once; later-discovered prerequisites come first.
    pub order: Vec<String>,
    pub unknown: Vec<UnknownSkill>,
    pub cycles: Vec<SkillCycle>,
}

impl Closure {
    pub fn contains(&self, id: &str) -> bool {
        self.order.iter().any(|o| o == id)
    }
}

/// Result of choosing what to learn next.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LearnQueue {
    /// Learnable skills, shortest first.
    pub skills: Vec<SkillRecord>,
    /// Index of the target chain that produced the queue; `None` when falling
    /// back to everything learnable.
    pub chain: Option<usize>,
    pub unknown: Vec<UnknownSkill>,
    pub cycles: Vec<SkillCycle>,
}

/// Unmet requirements for a skill, plus any prerequisite loops met on the way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Blockers {
    pub requirements: Vec<Requirement>,
    pub cycles: Vec<SkillCycle>,
}

/// A requirement from `skills.getInfo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, deserialize_with = "int_bool")]
    pub got: bool,
    #[serde(default)]
    pub class_tsid: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub level: Option<Value>,
}

impl Requirement {
    pub fn is_skill(&self) -> bool {
        self.kind == "skill"
    }

    pub fn is_level(&self) -> bool {
        self.kind == "level"
    }

    /// Display name; level requirements are named by their level.
    pub fn display_name(&self) -> String {
        if self.is_level() {
            if let Some(level) = &self.level {
                return match level {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
            }
        }
        self.name
            .clone()
            .or_else(|| self.class_tsid.clone())
            .unwrap_or_else(|| self.kind.clone())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SkillInfo {
    #[serde(default)]
    reqs: Vec<Requirement>,
}

/// Build records from an API mapping of id to skill object.
pub fn records(items: Map<String, Value>, learnable: bool) -> Result<SkillCatalog> {
    items
        .into_iter()
        .map(|(id, item)| -> Result<(String, SkillRecord)> {
            let mut record: SkillRecord = serde_json::from_value(item)?;
            record.id = id.clone();
            record.learnable = learnable;
            Ok((id, record))
        })
        .collect()
}

/// Transitive prerequisite closure of `targets`.
///
/// Each round prepends the current frontier to the result, then expands the
/// frontier to the union of its prerequisites minus everything already in the
/// result. Ids missing from the catalog are kept but not expanded, and are
/// reported in `unknown`.
pub fn closure(catalog: &SkillCatalog, targets: &[String]) -> Closure {
    let mut order: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut unknown = Vec::new();
    let mut cycles = Vec::new();
    let mut required_by: HashMap<String, String> = HashMap::new();

    let mut frontier: Vec<String> = Vec::new();
    for target in targets {
        if !frontier.contains(target) {
            frontier.push(target.clone());
        }
    }

    while !frontier.is_empty() {
        seen.extend(frontier.iter().cloned());
        let mut prepended = frontier.clone();
        prepended.append(&mut order);
        order = prepended;

        let mut next: Vec<String> = Vec::new();
        let mut queued: HashSet<&str> = HashSet::new();
        for id in &frontier {
            let Some(record) = catalog.get(id) else {
                let parent = required_by.get(id).cloned();
                warn!(skill = %id, required_by = ?parent, "unknown skill id");
                unknown.push(UnknownSkill {
                    id: id.clone(),
                    required_by: parent,
                });
                continue;
            };

            for required in &record.required_skills {
                if seen.contains(required) {
                    let loops = reaches(
                        |skill| catalog.get(skill).map(|r| r.required_skills.as_slice()),
                        required,
                        id,
                    );
                    if loops {
                        warn!(skill = %id, prerequisite = %required, "prerequisite cycle");
                        cycles.push(SkillCycle {
                            skill: id.clone(),
                            prerequisite: required.clone(),
                        });
                    } else {
                        debug!(skill = %required, "prerequisite already resolved");
                    }
                    continue;
                }
                if !queued.insert(required.as_str()) {
                    continue;
                }
                required_by
                    .entry(required.clone())
                    .or_insert_with(|| id.clone());
                next.push(required.clone());
            }
        }

        frontier = next;
    }

    Closure {
        order,
        unknown,
        cycles,
    }
}

/// Whether `to` is reachable from `from` by following prerequisite edges.
fn reaches<'a, F>(prerequisites: F, from: &str, to: &str) -> bool
where
    F: Fn(&str) -> Option<&'a [String]>,
{
    let mut stack = vec![from.to_string()];
    let mut visited: HashSet<String> = HashSet::new();

    while let Some(current) = stack.pop() {
        if current == to {
            return true;
        }
        if !visited.insert(current.clone()) {
            continue;
        }
        if let Some(next) = prerequisites(&current) {
            stack.extend(next.iter().filter(|n| !visited.contains(*n)).cloned());
        }
    }
    false
}

/// Pick the learnable skills serving the highest-priority chain.
///
/// The first chain whose closure intersects the learnable set wins; with no
/// such chain everything learnable is returned. Either way the result is
/// sorted by remaining time, ascending.
pub fn select_learn_queue(
    catalog: &SkillCatalog,
    learnable: &SkillCatalog,
    chains: &[TargetChain],
) -> LearnQueue {
    let mut unknown = Vec::new();
    let mut cycles = Vec::new();

    for (index, chain) in chains.iter().enumerate() {
        let resolved = closure(catalog, chain);
        unknown.extend(resolved.unknown.iter().cloned());
        cycles.extend(resolved.cycles.iter().cloned());

        let wanted: HashSet<&str> = resolved.order.iter().map(String::as_str).collect();
        let picks: Vec<SkillRecord> = learnable
            .values()
            .filter(|skill| wanted.contains(skill.id.as_str()))
            .cloned()
            .collect();

        if !picks.is_empty() {
            debug!(chain = index, count = picks.len(), "target chain selected");
            return LearnQueue {
                skills: sorted_by_time(picks),
                chain: Some(index),
                unknown,
                cycles,
            };
        }
    }

    LearnQueue {
        skills: sorted_by_time(learnable.values().cloned().collect()),
        chain: None,
        unknown,
        cycles,
    }
}

fn sorted_by_time(mut skills: Vec<SkillRecord>) -> Vec<SkillRecord> {
    skills.sort_by_key(|skill| skill.time_remaining);
    skills
}

/// Parse target chains: one chain per non-empty line, ids separated by
/// whitespace.
pub fn parse_targets(contents: &str) -> Vec<TargetChain> {
    contents
        .lines()
        .map(|line| line.split_whitespace().map(str::to_string).collect::<Vec<_>>())
        .filter(|chain| !chain.is_empty())
        .collect()
}

/// Load target chains from a file; a missing file means no chains.
pub fn load_targets(path: &Path) -> Result<Vec<TargetChain>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    Ok(parse_targets(&fs::read_to_string(path)?))
}

/// Full skill catalog, cached for the configured catalog TTL.
pub async fn catalog(session: &Session) -> Result<SkillCatalog> {
    let page_size = session.config().page_size;
    let items = session
        .fetch_cached(ALL_SKILLS_KEY, session.ttl().catalog(), || {
            session.fetch_all_pages("skills.listAll", Params::new(), page_size, "items")
        })
        .await?;
    records(items, false)
}

/// Skills the character can learn right now. Never served from cache.
pub async fn learnable(session: &Session) -> Result<SkillCatalog> {
    let body = session
        .with_cache_ttl(Duration::ZERO, session.fetch_once("skills.listAvailable", Params::new()))
        .await?;
    records(object_at(&body, "skills"), true)
}

/// Detailed info for one skill, cached for the configured skill-info TTL.
async fn info(session: &Session, skill_id: &str) -> Result<SkillInfo> {
    let key = format!("skills/{}", skill_id);
    let body: Value = session
        .fetch_cached(&key, session.ttl().skill_info(), || {
            session.fetch_once(
                "skills.getInfo",
                params([("skill_id", skill_id), ("skill_class", skill_id)]),
            )
        })
        .await?;
    Ok(serde_json::from_value(body)?)
}

/// Learnable skills serving the highest-priority target chain.
pub async fn learn_queue(session: &Session, chains: &[TargetChain]) -> Result<LearnQueue> {
    let (catalog, learnable) = tokio::try_join!(catalog(session), learnable(session))?;
    Ok(select_learn_queue(&catalog, &learnable, chains))
}

/// The single best skill to learn next, if anything is learnable.
pub async fn next_skill(session: &Session, chains: &[TargetChain]) -> Result<Option<SkillRecord>> {
    Ok(learn_queue(session, chains).await?.skills.into_iter().next())
}

/// Unmet non-skill requirements standing between the character and `skill_id`.
///
/// Walks unmet skill requirements breadth-first; level and other requirements
/// are leaves. Each skill is expanded at most once, so a shared prerequisite
/// contributes its leaves once. Loops in the prerequisite graph are reported
/// in `cycles`.
pub async fn blocking_requirements(session: &Session, skill_id: &str) -> Result<Blockers> {
    let mut blockers = Blockers::default();
    let mut edges: HashMap<String, Vec<String>> = HashMap::new();
    let mut revisits: Vec<(String, String)> = Vec::new();
    let mut discovered: HashSet<String> = HashSet::from([skill_id.to_string()]);
    let mut queue = VecDeque::from([skill_id.to_string()]);

    while let Some(id) = queue.pop_front() {
        let mut prerequisites = Vec::new();
        for requirement in info(session, &id).await?.reqs {
            if requirement.got {
                continue;
            }
            if requirement.is_skill() {
                let Some(tsid) = requirement.class_tsid.clone() else {
                    warn!(skill = %id, "skill requirement without class_tsid");
                    continue;
                };
                if discovered.insert(tsid.clone()) {
                    queue.push_back(tsid.clone());
                } else {
                    debug!(skill = %tsid, "skill already expanded");
                    revisits.push((id.clone(), tsid.clone()));
                }
                prerequisites.push(tsid);
            } else {
                let mut requirement = requirement;
                requirement.name = Some(requirement.display_name());
                blockers.requirements.push(requirement);
            }
        }
        edges.insert(id, prerequisites);
    }

    // Every reachable skill has been expanded, so the edge map is complete.
    for (skill, prerequisite) in revisits {
        if reaches(|s| edges.get(s).map(Vec::as_slice), &prerequisite, &skill) {
            warn!(skill = %skill, prerequisite = %prerequisite, "prerequisite cycle");
            blockers.cycles.push(SkillCycle {
                skill,
                prerequisite,
            });
        }
    }

    Ok(blockers)
}

/// Start learning a skill. Never cached and never retried.
pub async fn learn(session: &Session, skill_id: &str) -> Result<Value> {
    tracing::info!(skill = %skill_id, "learning skill");
    session
        .with_cache_ttl(
            Duration::ZERO,
            session.fetch_once("skills.learn", params([("skill_class", skill_id)])),
        )
        .await
}

/// Skills currently being learned, keyed by id.
pub async fn now_learning(session: &Session) -> Result<Map<String, Value>> {
    let body = session
        .with_cache_ttl(Duration::ZERO, session.fetch_once("skills.listLearning", Params::new()))
        .await?;
    Ok(object_at(&body, "learning"))
}

fn object_at(body: &Value, key: &str) -> Map<String, Value> {
    match body.get(key) {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    }
}
