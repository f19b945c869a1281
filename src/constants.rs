//! Constants for board geometry, coordinate alphabets, and engine defaults.
//!
//! Board sizes are runtime values (read from the `SZ` property), so this
//! module only holds the limits and the defaults used when a record or the
//! configuration leaves something unspecified.

// =============================================================================
// Board Geometry
// =============================================================================

/// Smallest supported board dimension.
pub const MIN_SIZE: u8 = 1;

/// Largest supported board dimension (SGF coordinates stop at `y`).
pub const MAX_SIZE: u8 = 25;

/// Board size used when a root carries no `SZ` property.
pub const DEFAULT_SIZE: u8 = 19;

/// Default komi for new games and for records with no `KM`.
pub const DEFAULT_KOMI: f64 = 7.5;

/// Default ruleset name passed to engines.
pub const DEFAULT_RULES: &str = "chinese";

// =============================================================================
// Coordinate Alphabets
// =============================================================================

/// SGF coordinate letters, index `i` maps to column/row `i`.
pub const SGF_LETTERS: &[u8; 25] = b"abcdefghijklmnopqrstuvwxy";

/// GTP column letters. `I` is skipped by convention.
pub const GTP_LETTERS: &[u8; 25] = b"ABCDEFGHJKLMNOPQRSTUVWXYZ";

// =============================================================================
// SGF Property Keys
// =============================================================================

/// Keys whose values change the position a node represents. Once a node's
/// board has been derived these may no longer be edited on that node.
pub const BOARD_KEYS: &[&str] = &["B", "W", "AB", "AW", "AE", "PL", "KM", "RU", "SZ"];

/// Black winrate (percent) written after a valid analysis.
pub const WINRATE_KEY: &str = "SBKV";

/// Black score lead written after a valid analysis.
pub const SCORE_KEY: &str = "OGSC";

// =============================================================================
// Engine Defaults
// =============================================================================

/// Visit cap sent with every analysis query.
pub const DEFAULT_MAX_VISITS: u64 = 1_000_000;

/// Seconds between intermediate reports.
pub const DEFAULT_REPORT_EVERY: f64 = 0.1;

/// Principal variation length requested from the engine.
pub const DEFAULT_PV_LEN: u32 = 16;

/// Root symmetries sampled per evaluation.
pub const DEFAULT_SYMMETRIES: u32 = 1;

/// Command sent to a GTP engine to interrupt a running analysis.
pub const GTP_BENIGN_COMMAND: &str = "protocol_version";
