//! Podium leaderboard update engine.
//!
//! Consumes submitted-score events from the `score-submitted` topic and
//! maintains the materialized leaderboard state in the store: per-mode
//! global/daily/weekly rankings and per-player aggregates. Rank movements
//! are published to the `leaderboard-updated` topic and top-100 movements
//! purge the CDN-cached read views.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │    LogClient     │  score-submitted topic, consumer-group offsets
//! └────────┬─────────┘
//!          │ batches
//!          ▼
//! ┌──────────────────┐     ┌─────────────────┐
//! │    Dispatcher    │◄────┤  ReplayTracker  │  replay / tailing mode
//! └────────┬─────────┘     └─────────────────┘
//!          │ pipelined ops            rank diffs
//!          ▼                              ▼
//! ┌──────────────────┐     ┌──────────────────────────────┐
//! │ LeaderboardStore │     │   ChangeSink (notifier)      │
//! │  (Redis/memory)  │     │ leaderboard-updated + purge  │
//! └──────────────────┘     └──────────────────────────────┘
//! ```
//!
//! On startup, an empty materialized view triggers a full replay of the
//! log with notifications suppressed; catch-up with the live tail is
//! detected from consecutive empty batches or delivery idleness.

pub mod applier;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod log;
pub mod notifier;
pub mod recovery;
pub mod store;

// Re-export commonly used types at crate root
pub use config::{Config, PurgeConfig, PurgeProvider};
pub use dispatcher::{Dispatcher, RunStats};
pub use engine::LeaderboardEngine;
pub use error::{Error, Result};
pub use log::{BatchHandler, ConsumedBatch, ConsumedMessage, LogClient, LogConfig};
pub use notifier::{CachePurger, ChangeSink, KafkaNotifier};
pub use recovery::{needs_replay, CatchUp, ReplayTracker};
pub use store::{LeaderboardStore, MemoryStore, RankedScore, RedisStore, StoreOp};
