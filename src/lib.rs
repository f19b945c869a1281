//! Gobanview: the core of a Go game viewer and analysis front end.
//!
//! Loads and saves SGF game trees, derives board positions with full
//! capture and ko rules, and drives an external analysis engine (KataGo's
//! JSON analysis engine, or any GTP engine with `kata-analyze` or
//! `lz-analyze`), routing its results back onto the tree.
//!
//! ## Modules
//!
//! - [`constants`] - Board limits, defaults and property keys
//! - [`board`] - Stones, captures, ko and move legality
//! - [`tree`] - Arena game tree with lazily derived boards
//! - [`sgf`] - SGF parsing and serialization
//! - [`analysis`] - Normalized engine results
//! - [`query`] - Building and comparing analysis queries
//! - [`config`] - TOML configuration
//! - [`process`] - Engine subprocess plumbing
//! - [`engine`] - The session contract shared by both protocols
//! - [`katago`] - JSON analysis engine session
//! - [`gtp`] - GTP engine session
//! - [`router`] - Attaching results to nodes
//!
//! ## Example
//!
//! ```
//! use gobanview::board::Point;
//! use gobanview::sgf;
//!
//! let games = sgf::load(b"(;SZ[9];B[ee];W[ag])").unwrap().games;
//! let mut tree = games.into_iter().next().unwrap();
//! let end = tree.main_line_end();
//! let next = tree.apply_move(end, Point::from_gtp("C7", 9, 9).unwrap()).unwrap();
//! assert_eq!(tree.board(next).unwrap().stone_count(), 3);
//! ```

pub mod analysis;
pub mod board;
pub mod config;
pub mod constants;
pub mod engine;
pub mod gtp;
pub mod katago;
pub mod process;
pub mod query;
pub mod router;
pub mod sgf;
pub mod tree;
