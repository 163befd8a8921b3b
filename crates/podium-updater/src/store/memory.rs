//! In-memory store gateway.
//!
//! Implements the observable semantics of the Redis gateway entirely in
//! process: hashes, sorted sets with 1-indexed reverse ranks and the
//! reverse-lexicographic tie-break, cursorless scans. Used by the
//! integration test-bed and by `--memory-store` runs where a throwaway
//! engine is handy (demos, local development without infrastructure).
//!
//! TTLs are recorded so callers can assert on them, but keys are never
//! actually reaped; the engine re-expires buckets on every write anyway.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use podium_core::Player;

use super::{LeaderboardStore, RankedScore, StoreOp};
use crate::error::Result;

#[derive(Default)]
struct Inner {
    hashes: HashMap<String, HashMap<String, String>>,
    zsets: HashMap<String, HashMap<String, i64>>,
    ttls: HashMap<String, i64>,
}

/// In-process store with Redis-like semantics.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw score of a member, if present. Test-bed helper.
    pub fn zscore(&self, key: &str, member: &str) -> Option<i64> {
        self.inner
            .lock()
            .zsets
            .get(key)
            .and_then(|set| set.get(member))
            .copied()
    }

    /// Most recently recorded TTL for a key, if any. Test-bed helper.
    pub fn recorded_ttl(&self, key: &str) -> Option<i64> {
        self.inner.lock().ttls.get(key).copied()
    }

    /// Number of keys across all namespaces. Test-bed helper.
    pub fn key_count(&self) -> usize {
        let inner = self.inner.lock();
        inner.hashes.len() + inner.zsets.len()
    }

    /// Set one hash field directly, bypassing the op pipeline. Used to
    /// seed externally-owned state such as the `game_modes` hash.
    pub fn seed_hash_field(&self, key: &str, field: &str, value: &str) {
        self.inner
            .lock()
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
    }

    fn apply(inner: &mut Inner, op: &StoreOp) {
        match op {
            StoreOp::UpsertPlayer {
                player_id,
                username,
                created_at,
            } => {
                let hash = inner
                    .hashes
                    .entry(podium_core::keys::player(player_id))
                    .or_default();
                hash.entry("created_at".to_string())
                    .or_insert_with(|| created_at.clone());
                hash.entry("total_score".to_string())
                    .or_insert_with(|| "0".to_string());
                hash.entry("games_played".to_string())
                    .or_insert_with(|| "0".to_string());
                hash.insert("username".to_string(), username.clone());
            }
            StoreOp::IncPlayerStats {
                player_id,
                score_delta,
            } => {
                let hash = inner
                    .hashes
                    .entry(podium_core::keys::player(player_id))
                    .or_default();
                hash_incr(hash, "total_score", *score_delta);
                hash_incr(hash, "games_played", 1);
            }
            StoreOp::ZIncrBy { key, member, delta } => {
                let set = inner.zsets.entry(key.clone()).or_default();
                *set.entry(member.clone()).or_insert(0) += delta;
            }
            StoreOp::Expire { key, ttl_secs } => {
                inner.ttls.insert(key.clone(), *ttl_secs);
            }
        }
    }

    /// Members ordered the way ZREVRANGE orders them: descending score,
    /// then descending member id among equals.
    fn rev_ordered(inner: &Inner, key: &str) -> Vec<(String, i64)> {
        let mut entries: Vec<(String, i64)> = inner
            .zsets
            .get(key)
            .map(|set| set.iter().map(|(m, s)| (m.clone(), *s)).collect())
            .unwrap_or_default();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
        entries
    }
}

fn hash_incr(hash: &mut HashMap<String, String>, field: &str, delta: i64) {
    let current: i64 = hash.get(field).and_then(|v| v.parse().ok()).unwrap_or(0);
    hash.insert(field.to_string(), (current + delta).to_string());
}

/// Minimal glob matcher for scan patterns (`*` wildcards only).
fn glob_match(pattern: &str, key: &str) -> bool {
    let segments: Vec<&str> = pattern.split('*').collect();
    if segments.len() == 1 {
        return pattern == key;
    }

    let mut rest = key;
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(segment) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == segments.len() - 1 {
            return rest.ends_with(segment);
        } else {
            match rest.find(segment) {
                Some(pos) => rest = &rest[pos + segment.len()..],
                None => return false,
            }
        }
    }
    true
}

#[async_trait]
impl LeaderboardStore for MemoryStore {
    async fn get_player(&self, player_id: &str) -> Result<Option<Player>> {
        let inner = self.inner.lock();
        let Some(hash) = inner.hashes.get(&podium_core::keys::player(player_id)) else {
            return Ok(None);
        };

        Ok(Some(Player {
            username: hash.get("username").cloned().unwrap_or_default(),
            total_score: hash
                .get("total_score")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            games_played: hash
                .get("games_played")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            created_at: hash.get("created_at").cloned().unwrap_or_default(),
        }))
    }

    async fn zrevrank_with_score(&self, key: &str, member: &str) -> Result<Option<RankedScore>> {
        let inner = self.inner.lock();
        let ordered = Self::rev_ordered(&inner, key);
        Ok(ordered
            .iter()
            .position(|(m, _)| m == member)
            .map(|idx| RankedScore {
                rank: idx as u64 + 1,
                score: ordered[idx].1,
            }))
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        let inner = self.inner.lock();
        Ok(inner.zsets.get(key).map(|s| s.len() as u64).unwrap_or(0))
    }

    async fn zrevrange(&self, key: &str, offset: u64, limit: u64) -> Result<Vec<(String, i64)>> {
        let inner = self.inner.lock();
        Ok(Self::rev_ordered(&inner, key)
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn hash_keys(&self, key: &str) -> Result<Vec<String>> {
        let inner = self.inner.lock();
        Ok(inner
            .hashes
            .get(key)
            .map(|h| h.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn scan_for(&self, pattern: &str, filter: for<'a> fn(&'a str) -> bool) -> Result<Option<String>> {
        let inner = self.inner.lock();
        Ok(inner
            .hashes
            .keys()
            .chain(inner.zsets.keys())
            .find(|k| glob_match(pattern, k) && filter(k))
            .cloned())
    }

    async fn run_ops(&self, ops: &[StoreOp]) -> Result<()> {
        let mut inner = self.inner.lock();
        for op in ops {
            Self::apply(&mut inner, op);
        }
        Ok(())
    }
}
