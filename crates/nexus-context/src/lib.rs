use nexus_core::types::{Horizon, SubjectType};
use nexus_knowledge::FactStore;
use nexus_store::types::{FactFilter, KnowledgeFact};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Chars-per-token rule used for the conservative token estimate.
const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone, Serialize)]
pub struct ContextBlock {
    pub horizon: Horizon,
    pub title: String,
    pub source: String,
    pub subject_type: SubjectType,
    pub subject_id: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct HorizonUsage {
    pub short: usize,
    pub medium: usize,
    pub long: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub id: String,
    pub domain: String,
    pub fact_key: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextBundle {
    pub resolved_agent_id: String,
    pub context_blocks: Vec<ContextBlock>,
    pub horizon_usage: HorizonUsage,
    pub sources: Vec<SourceRef>,
    pub context_digest: String,
    pub token_estimate: usize,
}

#[derive(Debug, Clone)]
pub struct AssembleRequest {
    pub user_id: String,
    pub agent_id: String,
    pub include_short: bool,
    pub include_medium: bool,
    pub include_long: bool,
    pub max_blocks: usize,
}

pub struct ContextAssembler {
    facts: std::sync::Arc<FactStore>,
}

impl ContextAssembler {
    pub fn new(facts: std::sync::Arc<FactStore>) -> Self {
        Self { facts }
    }

    /// Builds the deterministic context bundle for one chat turn. Never
    /// fails: a query error against the fact store degrades to an empty
    /// bundle with the digest of the empty set, per the
    /// "never throw on empty" failure mode.
    pub fn assemble(&self, req: &AssembleRequest) -> ContextBundle {
        let mut horizons = Vec::new();
        if req.include_short {
            horizons.push(Horizon::Short);
        }
        if req.include_medium {
            horizons.push(Horizon::Medium);
        }
        if req.include_long {
            horizons.push(Horizon::Long);
        }

        let subjects = vec![
            (SubjectType::User, req.user_id.clone()),
            (SubjectType::Agent, req.agent_id.clone()),
            (SubjectType::Shared, "global".to_string()),
        ];

        let mut all_facts: Vec<KnowledgeFact> = Vec::new();
        for subject in &subjects {
            let filter = FactFilter {
                subjects: vec![subject.clone()],
                horizons: horizons.clone(),
                limit: 0,
                ..Default::default()
            };
            if let Ok(facts) = self.facts.query(filter) {
                all_facts.extend(facts);
            }
        }

        // Dedupe across horizons by (domain, fact_key), preferring the
        // higher-priority (lower `priority()`) horizon.
        all_facts.sort_by_key(|f| f.horizon.priority());
        let mut seen = std::collections::HashSet::new();
        let deduped: Vec<KnowledgeFact> = all_facts
            .into_iter()
            .filter(|f| seen.insert((f.domain.clone(), f.fact_key.clone())))
            .collect();

        let retained = cap_with_horizon_distribution(deduped, &horizons, req.max_blocks);

        let mut horizon_usage = HorizonUsage::default();
        let mut blocks = Vec::with_capacity(retained.len());
        let mut sources = Vec::with_capacity(retained.len());
        let mut digest_input = Vec::with_capacity(retained.len());

        for fact in &retained {
            match fact.horizon {
                Horizon::Short => horizon_usage.short += 1,
                Horizon::Medium => horizon_usage.medium += 1,
                Horizon::Long => horizon_usage.long += 1,
            }
            blocks.push(ContextBlock {
                horizon: fact.horizon,
                title: render_title(fact),
                source: fact.subject_type.as_str().to_string(),
                subject_type: fact.subject_type,
                subject_id: fact.subject_id.clone(),
                body: render_body(fact),
            });
            sources.push(SourceRef {
                id: fact.id.clone(),
                domain: fact.domain.clone(),
                fact_key: fact.fact_key.clone(),
            });
            digest_input.push((fact.id.clone(), fact.updated_at.clone()));
        }

        digest_input.sort();
        let context_digest = compute_digest(&digest_input);
        let token_estimate = blocks.iter().map(|b| b.body.len() + b.title.len()).sum::<usize>() / CHARS_PER_TOKEN;

        ContextBundle {
            resolved_agent_id: req.agent_id.clone(),
            context_blocks: blocks,
            horizon_usage,
            sources,
            context_digest,
            token_estimate,
        }
    }
}

/// Caps the retained fact list at `max_blocks`, preserving a proportional
/// share of each requested horizon — at least one block per horizon that
/// has any candidates, when `max_blocks` allows it.
fn cap_with_horizon_distribution(
    facts: Vec<KnowledgeFact>,
    requested_horizons: &[Horizon],
    max_blocks: usize,
) -> Vec<KnowledgeFact> {
    if max_blocks == 0 || facts.len() <= max_blocks {
        return facts;
    }

    let mut by_horizon: Vec<(Horizon, Vec<KnowledgeFact>)> = requested_horizons
        .iter()
        .map(|h| {
            (
                *h,
                facts.iter().filter(|f| f.horizon == *h).cloned().collect::<Vec<_>>(),
            )
        })
        .collect();
    by_horizon.retain(|(_, v)| !v.is_empty());

    let groups = by_horizon.len().max(1);
    let base_share = (max_blocks / groups).max(1);

    let mut retained = Vec::with_capacity(max_blocks);
    for (_, bucket) in &mut by_horizon {
        let take = base_share.min(bucket.len());
        retained.extend(bucket.drain(..take));
    }

    // Distribute any remaining capacity (rounding leftovers) by horizon priority.
    by_horizon.sort_by_key(|(h, _)| h.priority());
    for (_, bucket) in &mut by_horizon {
        while retained.len() < max_blocks && !bucket.is_empty() {
            retained.push(bucket.remove(0));
        }
    }

    retained.truncate(max_blocks);
    retained
}

fn render_title(fact: &KnowledgeFact) -> String {
    format!("{} / {}", capitalize(&fact.domain), capitalize(&fact.fact_key))
}

fn render_body(fact: &KnowledgeFact) -> String {
    match &fact.fact_value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn compute_digest(pairs: &[(String, String)]) -> String {
    let mut hasher = Sha256::new();
    for (id, updated_at) in pairs {
        hasher.update(id.as_bytes());
        hasher.update(b"|");
        hasher.update(updated_at.as_bytes());
        hasher.update(b";");
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_store::types::FactUpsert;
    use nexus_store::SqliteStore;
    use serde_json::json;
    use std::sync::Arc;

    fn seed_long_fact(facts: &FactStore, user: &str) {
        facts
            .upsert(FactUpsert {
                subject_type: SubjectType::User,
                subject_id: user.into(),
                horizon: Horizon::Long,
                domain: "profile".into(),
                fact_key: "role".into(),
                fact_value: json!("engineer"),
                ttl_seconds: None,
                confidence: 0.8,
                tags: vec![],
            })
            .unwrap();
    }

    #[test]
    fn digest_is_stable_across_repeat_assembly() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let facts = Arc::new(FactStore::new(store));
        seed_long_fact(&facts, "u1");

        let assembler = ContextAssembler::new(facts);
        let req = AssembleRequest {
            user_id: "u1".into(),
            agent_id: "a1".into(),
            include_short: true,
            include_medium: true,
            include_long: true,
            max_blocks: 10,
        };
        let b1 = assembler.assemble(&req);
        let b2 = assembler.assemble(&req);
        assert_eq!(b1.context_digest, b2.context_digest);
        assert_eq!(b1.context_blocks.len(), b2.context_blocks.len());
        assert!(b1.horizon_usage.long >= 1);
    }

    #[test]
    fn empty_store_returns_empty_bundle_not_error() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let facts = Arc::new(FactStore::new(store));
        let assembler = ContextAssembler::new(facts);
        let bundle = assembler.assemble(&AssembleRequest {
            user_id: "nobody".into(),
            agent_id: "a1".into(),
            include_short: true,
            include_medium: true,
            include_long: true,
            max_blocks: 10,
        });
        assert!(bundle.context_blocks.is_empty());
    }
}
