//! Store key layout shared by every Podium component.
//!
//! # Key Design
//!
//! ```text
//! player:{playerId}                        hash: username, total_score,
//!                                                games_played, created_at
//! player:{playerId}:last_submission        rate-limiter state (intake API)
//! leaderboard:{mode}:global                sorted set, lives forever
//! leaderboard:{mode}:daily:{YYYY-MM-DD}    sorted set, TTL 7d
//! leaderboard:{mode}:weekly:{YYYY-Www}     sorted set, TTL 28d
//! game_modes                               hash: id -> JSON metadata
//! ```
//!
//! The `last_submission` keys are written by the intake rate limiter and
//! share the `player:` prefix; scans that look for player records must
//! filter them out.

/// Hash of game mode metadata, `{id -> JSON}`. Read-only for the engine.
pub const GAME_MODES: &str = "game_modes";

/// Scan pattern matching player records (and, unavoidably, the intake
/// rate-limiter keys; see [`is_player_record_key`]).
pub const PLAYER_SCAN_PATTERN: &str = "player:*";

/// Key of the per-player aggregate hash.
pub fn player(player_id: &str) -> String {
    format!("player:{player_id}")
}

/// Key of the all-time leaderboard for a game mode.
pub fn leaderboard_global(game_mode: u32) -> String {
    format!("leaderboard:{game_mode}:global")
}

/// Key of a daily leaderboard bucket.
pub fn leaderboard_daily(game_mode: u32, day: &str) -> String {
    format!("leaderboard:{game_mode}:daily:{day}")
}

/// Key of a weekly leaderboard bucket.
pub fn leaderboard_weekly(game_mode: u32, week: &str) -> String {
    format!("leaderboard:{game_mode}:weekly:{week}")
}

/// Whether a key returned by a `player:*` scan is an actual player record,
/// as opposed to ancillary state like `player:{id}:last_submission`.
pub fn is_player_record_key(key: &str) -> bool {
    key.strip_prefix("player:")
        .is_some_and(|rest| !rest.is_empty() && !rest.contains(':'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_shapes() {
        assert_eq!(player("p1"), "player:p1");
        assert_eq!(leaderboard_global(1), "leaderboard:1:global");
        assert_eq!(
            leaderboard_daily(2, "2024-06-01"),
            "leaderboard:2:daily:2024-06-01"
        );
        assert_eq!(
            leaderboard_weekly(3, "2024-W22"),
            "leaderboard:3:weekly:2024-W22"
        );
    }

    #[test]
    fn test_player_record_filter() {
        assert!(is_player_record_key("player:p1"));
        assert!(is_player_record_key("player:uuid-with-dashes"));
        assert!(!is_player_record_key("player:p1:last_submission"));
        assert!(!is_player_record_key("player:"));
        assert!(!is_player_record_key("leaderboard:1:global"));
        assert!(!is_player_record_key("game_modes"));
    }
}
