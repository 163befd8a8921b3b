//! Store gateway: typed operations over the leaderboard store.
//!
//! The engine talks to the store exclusively through the
//! [`LeaderboardStore`] port. Production uses [`RedisStore`]; the test-bed
//! and local `--memory-store` runs use [`MemoryStore`], which implements
//! the same sorted-set semantics in process.
//!
//! # Pipelining
//!
//! Writes are expressed as [`StoreOp`] values accumulated by the caller and
//! executed in one round trip via [`LeaderboardStore::run_ops`]. Ordering
//! inside a pipeline is preserved; a failing command surfaces with the
//! index and kind of the op that failed.

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use async_trait::async_trait;
use podium_core::Player;

use crate::error::Result;

/// Rank and cumulative score of a member in a sorted set. Ranks are
/// 1-indexed from the highest score; ties break lexicographically on the
/// member id, mirroring the store's reverse ordering (among equal scores
/// the lexicographically greater member id takes the better rank).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankedScore {
    pub rank: u64,
    pub score: i64,
}

/// One buffered command in a pipelined round trip.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    /// Create the player hash if absent (zeroed stats, `created_at` set),
    /// then unconditionally overwrite `username` so renames take effect.
    UpsertPlayer {
        player_id: String,
        username: String,
        created_at: String,
    },

    /// `total_score += score_delta`, `games_played += 1`.
    IncPlayerStats {
        player_id: String,
        score_delta: i64,
    },

    /// Increment a member's score in a sorted set, creating set and member
    /// as needed.
    ZIncrBy {
        key: String,
        member: String,
        delta: i64,
    },

    /// Refresh a key's TTL.
    Expire { key: String, ttl_secs: i64 },
}

impl StoreOp {
    /// Short operation name for logs and error context.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreOp::UpsertPlayer { .. } => "upsert_player",
            StoreOp::IncPlayerStats { .. } => "inc_player_stats",
            StoreOp::ZIncrBy { .. } => "zincrby",
            StoreOp::Expire { .. } => "expire",
        }
    }
}

/// Typed port over the leaderboard store.
///
/// Implementations are shared process-wide behind an `Arc` and must be
/// safe for concurrent callers; the dispatcher runs independent keys in
/// parallel.
#[async_trait]
pub trait LeaderboardStore: Send + Sync {
    /// Fetch a player's aggregate record.
    async fn get_player(&self, player_id: &str) -> Result<Option<Player>>;

    /// 1-indexed reverse rank and score of `member`, or `None` if absent.
    async fn zrevrank_with_score(&self, key: &str, member: &str) -> Result<Option<RankedScore>>;

    /// Number of members in a sorted set (0 if the key is absent).
    async fn zcard(&self, key: &str) -> Result<u64>;

    /// Members of a sorted set ordered by descending score, paginated.
    async fn zrevrange(&self, key: &str, offset: u64, limit: u64) -> Result<Vec<(String, i64)>>;

    /// Field names of a hash (empty if the key is absent).
    async fn hash_keys(&self, key: &str) -> Result<Vec<String>>;

    /// Cursor-scan keys matching `pattern`, returning the first key
    /// accepted by `filter` without materializing the whole key space.
    async fn scan_for(&self, pattern: &str, filter: for<'a> fn(&'a str) -> bool) -> Result<Option<String>>;

    /// Execute a sequence of ops as one pipelined round trip.
    async fn run_ops(&self, ops: &[StoreOp]) -> Result<()>;
}
