//! Core types, validation, and shared utilities for the Podium leaderboard
//! service.
//!
//! This crate provides:
//! - Wire types for the `score-submitted` and `leaderboard-updated` topics
//! - Explicit decoding/validation of submitted-score events
//! - The store key layout shared by every Podium component
//! - Daily/weekly leaderboard window identifiers
//! - Prometheus metrics helpers
//! - Shared error types

mod error;
mod event;
pub mod keys;
pub mod metrics;
pub mod window;

// ═══════════════════════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════════════════════

/// Number of leading ranks served by the cached top-N read views.
///
/// A rank change that crosses this boundary (either the old or the new rank
/// is inside it) invalidates the CDN-cached leaderboard pages.
pub const TOP_RANKS_CACHED: u64 = 100;

pub use error::{Error, Result};
pub use event::{decode_score_event, GameMode, Player, RankChange, ScoreEvent};
