// Process-local caches used by the rule engine.
//
// 1. RuleCache: the active rule set keyed by rule id, loaded from the store
//    at most once per TTL window
// 2. ResultCache: short-lived evaluation results keyed by
//    (rule id, rule version, context fingerprint)
//
// Both are advisory. A miss or an expired entry only costs a recomputation.

use log::debug;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::engine::EvaluationResult;
use crate::rule_metadata::{Rule, RuleId};

// ============================================================================
// Rule cache
// ============================================================================

#[derive(Debug)]
struct CachedRuleSet {
    rules: HashMap<RuleId, Rule>,
    loaded_at: Instant,
}

impl CachedRuleSet {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.loaded_at.elapsed() > ttl
    }
}

/// Cache of the active rule set.
#[derive(Debug)]
pub struct RuleCache {
    entry: RwLock<Option<CachedRuleSet>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RuleCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entry: RwLock::new(None),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cached rules, or `None` when nothing fresh is cached.
    pub fn get(&self) -> Option<Vec<Rule>> {
        let entry = self.entry.read();
        match entry.as_ref() {
            Some(set) if !set.is_expired(self.ttl) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Rule cache hit ({} rules)", set.rules.len());
                Some(set.rules.values().cloned().collect())
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!("Rule cache miss");
                None
            }
        }
    }

    /// Cached rules regardless of age. Used when the store is unreachable.
    pub fn get_stale(&self) -> Option<Vec<Rule>> {
        self.entry
            .read()
            .as_ref()
            .map(|set| set.rules.values().cloned().collect())
    }

    pub fn store(&self, rules: Vec<Rule>) {
        let rules = rules.into_iter().map(|r| (r.id.clone(), r)).collect();
        *self.entry.write() = Some(CachedRuleSet {
            rules,
            loaded_at: Instant::now(),
        });
    }

    pub fn clear(&self) {
        *self.entry.write() = None;
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Result cache
// ============================================================================

/// Cache key for evaluation results
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResultKey {
    rule_id: RuleId,
    version: u32,
    fingerprint: String,
}

impl ResultKey {
    pub fn new(rule: &Rule, fingerprint: impl Into<String>) -> Self {
        Self {
            rule_id: rule.id.clone(),
            version: rule.version,
            fingerprint: fingerprint.into(),
        }
    }
}

#[derive(Debug, Clone)]
struct ResultEntry {
    result: EvaluationResult,
    cached_at: Instant,
}

impl ResultEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() > ttl
    }
}

/// Short-lived cache of per (rule, context) results.
#[derive(Debug)]
pub struct ResultCache {
    entries: RwLock<HashMap<ResultKey, ResultEntry>>,
    ttl: Duration,
    max_entries: usize,
}

impl ResultCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            max_entries,
        }
    }

    pub fn get(&self, key: &ResultKey) -> Option<EvaluationResult> {
        let entries = self.entries.read();
        entries
            .get(key)
            .filter(|e| !e.is_expired(self.ttl))
            .map(|e| e.result.clone())
    }

    pub fn insert(&self, key: ResultKey, result: EvaluationResult) {
        let mut entries = self.entries.write();

        // Evict expired entries if cache is full
        if entries.len() >= self.max_entries {
            let ttl = self.ttl;
            entries.retain(|_, e| !e.is_expired(ttl));

            // Still full: drop the oldest tenth
            if entries.len() >= self.max_entries {
                let mut by_age: Vec<(ResultKey, Instant)> =
                    entries.iter().map(|(k, e)| (k.clone(), e.cached_at)).collect();
                by_age.sort_by_key(|(_, at)| *at);
                let to_remove = (entries.len() / 10).max(1);
                for (key, _) in by_age.into_iter().take(to_remove) {
                    entries.remove(&key);
                }
            }
        }

        entries.insert(
            key,
            ResultEntry {
                result,
                cached_at: Instant::now(),
            },
        );
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Clear expired cache entries
    pub fn evict_expired(&self) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        let ttl = self.ttl;
        entries.retain(|_, e| !e.is_expired(ttl));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::match_clause::EvaluationContext;
    use crate::rule_metadata::{RuleBuilder, RuleType};
    use serde_json::json;

    fn sample_result(rule: &Rule) -> EvaluationResult {
        EvaluationResult::passed(rule, Vec::new(), 10, EvaluationContext::new(json!({})))
    }

    #[test]
    fn test_rule_cache_expires() {
        let cache = RuleCache::new(Duration::from_millis(0));
        cache.store(vec![RuleBuilder::new("a", RuleType::Planning).build()]);
        std::thread::sleep(Duration::from_millis(2));
        assert!(cache.get().is_none());
        assert_eq!(cache.get_stale().map(|r| r.len()), Some(1));
    }

    #[test]
    fn test_rule_cache_hit_and_clear() {
        let cache = RuleCache::new(Duration::from_secs(60));
        assert!(cache.get().is_none());
        cache.store(vec![RuleBuilder::new("a", RuleType::Planning).build()]);
        assert_eq!(cache.get().map(|r| r.len()), Some(1));
        cache.clear();
        assert!(cache.get().is_none());
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 2);
    }

    #[test]
    fn test_result_cache_keys_on_version() {
        let cache = ResultCache::new(Duration::from_secs(60), 10);
        let rule = RuleBuilder::new("a", RuleType::Planning).build();
        cache.insert(ResultKey::new(&rule, "fp"), sample_result(&rule));
        assert!(cache.get(&ResultKey::new(&rule, "fp")).is_some());

        let bumped = Rule { version: 2, ..rule };
        assert!(cache.get(&ResultKey::new(&bumped, "fp")).is_none());
    }

    #[test]
    fn test_result_cache_bounded() {
        let cache = ResultCache::new(Duration::from_secs(60), 3);
        let rule = RuleBuilder::new("a", RuleType::Planning).build();
        for i in 0..10 {
            cache.insert(ResultKey::new(&rule, format!("fp-{}", i)), sample_result(&rule));
        }
        assert!(cache.len() <= 3);
    }
}
