use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use nexus_core::types::{Horizon, SubjectType};
use nexus_store::port::PersistencePort;
use nexus_store::types::{FactFilter, FactUpsert, KnowledgeFact};
use nexus_store::Result;
use tracing::debug;

/// Cache entries survive this long before a fresh DB query is issued.
const CACHE_TTL: Duration = Duration::from_secs(300);

/// A thin layer above the persistence port: upsert/query on
/// the `(subject_type, subject_id, horizon, domain, fact_key)` key, plus an
/// in-process cache keyed by the query's subject set so repeated context
/// assembly calls for the same user/agent don't round-trip to SQLite.
pub struct FactStore {
    port: Arc<dyn PersistencePort>,
    cache: Mutex<HashMap<String, (Instant, Vec<KnowledgeFact>)>>,
}

impl FactStore {
    pub fn new(port: Arc<dyn PersistencePort>) -> Self {
        Self {
            port,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Upsert on the uniqueness key. Confidence is clamped to [0,1] and tags
    /// are deduplicated by the store layer; `created_at` is preserved across
    /// repeat upserts because the store updates the existing row in place.
    pub fn upsert(&self, fact: FactUpsert) -> Result<KnowledgeFact> {
        let result = self.port.upsert_fact(fact)?;
        self.invalidate(&result.subject_type, &result.subject_id);
        Ok(result)
    }

    /// Query facts, honoring the cache for repeat-subject lookups with no
    /// filters beyond subject/horizon (the common context-assembly shape).
    /// Any other filter bypasses the cache to avoid serving a stale subset.
    pub fn query(&self, filter: FactFilter) -> Result<Vec<KnowledgeFact>> {
        let cacheable = filter.domains.is_empty()
            && filter.tags.is_empty()
            && filter.min_confidence.is_none()
            && !filter.include_expired
            && filter.subjects.len() == 1;

        if cacheable {
            let key = cache_key(&filter.subjects[0].0, &filter.subjects[0].1);
            if let Some((fetched_at, cached)) = self.cache.lock().unwrap().get(&key) {
                if fetched_at.elapsed() < CACHE_TTL {
                    debug!(key, "fact cache hit");
                    return Ok(filter_horizons(cached.clone(), &filter.horizons, filter.limit));
                }
            }
            let fresh = self.port.query_facts(&FactFilter {
                horizons: Vec::new(),
                limit: 0,
                include_expired: false,
                ..filter.clone()
            })?;
            self.cache
                .lock()
                .unwrap()
                .insert(key, (Instant::now(), fresh.clone()));
            return Ok(filter_horizons(fresh, &filter.horizons, filter.limit));
        }

        self.port.query_facts(&filter)
    }

    /// Marks TTL-elapsed active rows as stale. Safe to call repeatedly
    /// (idempotent — a row already marked stale is left alone).
    pub fn expire_stale(&self) -> Result<usize> {
        let n = self.port.expire_stale_facts()?;
        self.cache.lock().unwrap().clear();
        Ok(n)
    }

    fn invalidate(&self, subject_type: &SubjectType, subject_id: &str) {
        let key = cache_key(subject_type, subject_id);
        self.cache.lock().unwrap().remove(&key);
    }
}

fn cache_key(subject_type: &SubjectType, subject_id: &str) -> String {
    format!("{}:{}", subject_type.as_str(), subject_id)
}

fn filter_horizons(facts: Vec<KnowledgeFact>, horizons: &[Horizon], limit: usize) -> Vec<KnowledgeFact> {
    let mut out: Vec<KnowledgeFact> = if horizons.is_empty() {
        facts
    } else {
        facts.into_iter().filter(|f| horizons.contains(&f.horizon)).collect()
    };
    if limit > 0 {
        out.truncate(limit);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_store::SqliteStore;
    use serde_json::json;

    fn make_store() -> FactStore {
        FactStore::new(Arc::new(SqliteStore::in_memory().unwrap()))
    }

    #[test]
    fn upsert_preserves_created_at_on_repeat() {
        let store = make_store();
        let f1 = store
            .upsert(FactUpsert {
                subject_type: SubjectType::User,
                subject_id: "u1".into(),
                horizon: Horizon::Long,
                domain: "profile".into(),
                fact_key: "name".into(),
                fact_value: json!("Alice"),
                ttl_seconds: None,
                confidence: 0.9,
                tags: vec!["bio".into()],
            })
            .unwrap();
        let f2 = store
            .upsert(FactUpsert {
                subject_type: SubjectType::User,
                subject_id: "u1".into(),
                horizon: Horizon::Long,
                domain: "profile".into(),
                fact_key: "name".into(),
                fact_value: json!("Alice Smith"),
                ttl_seconds: None,
                confidence: 0.95,
                tags: vec!["bio".into()],
            })
            .unwrap();
        assert_eq!(f1.created_at, f2.created_at);
        assert_eq!(f2.fact_value, json!("Alice Smith"));
    }

    #[test]
    fn confidence_is_clamped() {
        let store = make_store();
        let f = store
            .upsert(FactUpsert {
                subject_type: SubjectType::User,
                subject_id: "u1".into(),
                horizon: Horizon::Short,
                domain: "mood".into(),
                fact_key: "tone".into(),
                fact_value: json!("upbeat"),
                ttl_seconds: Some(60),
                confidence: 5.0,
                tags: vec![],
            })
            .unwrap();
        assert_eq!(f.confidence, 1.0);
    }

    #[test]
    fn query_round_trips_upserted_fact() {
        let store = make_store();
        store
            .upsert(FactUpsert {
                subject_type: SubjectType::User,
                subject_id: "u1".into(),
                horizon: Horizon::Long,
                domain: "profile".into(),
                fact_key: "timezone".into(),
                fact_value: json!("UTC"),
                ttl_seconds: None,
                confidence: 1.0,
                tags: vec![],
            })
            .unwrap();

        let results = store
            .query(FactFilter {
                subjects: vec![(SubjectType::User, "u1".into())],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].fact_key, "timezone");
    }
}
