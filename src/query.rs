//! Building analysis queries from tree nodes.
//!
//! A [`BaseQuery`] holds every parameter that influences what the engine
//! computes and nothing that identifies a particular request. A full
//! [`Query`] adds the position (setup stones plus moves) and a correlation
//! id of the form `{node-id}:{counter}`. Comparing a running or desired
//! query against a freshly built base query tells a session whether the
//! engine is already working on what the caller wants.

use serde::Serialize;

use crate::board::{Color, Move, Point};
use crate::config::AnalysisConfig;
use crate::constants::DEFAULT_RULES;
use crate::tree::{GameTree, NodeId, TreeError};

/// Engine settings overridden per query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideSettings {
    pub wide_root_noise: f64,
    pub root_num_symmetries_to_sample: u32,
}

/// Parameters that decide what the engine computes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryParams {
    pub rules: String,
    pub komi: f64,
    pub board_x_size: u8,
    pub board_y_size: u8,
    pub max_visits: u64,
    pub analysis_pv_len: u32,
    pub report_during_search_every: f64,
    pub include_ownership: bool,
    pub override_settings: OverrideSettings,
}

/// Query parameters for a node, without position or id.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseQuery {
    pub node_id: NodeId,
    pub params: QueryParams,
}

/// A complete request for one node.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub id: String,
    pub params: QueryParams,
    /// Stones on the board before `moves`
    pub initial_stones: Vec<(Color, Point)>,
    pub initial_player: Color,
    pub moves: Vec<(Color, Move)>,
    /// Side to move after `moves`
    pub to_move: Color,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireQuery<'a> {
    id: &'a str,
    #[serde(flatten)]
    params: &'a QueryParams,
    initial_stones: Vec<[String; 2]>,
    initial_player: &'static str,
    moves: Vec<[String; 2]>,
}

impl Query {
    pub fn node_id(&self) -> Option<NodeId> {
        node_id_from_id(&self.id)
    }

    pub fn width(&self) -> u8 {
        self.params.board_x_size
    }

    pub fn height(&self) -> u8 {
        self.params.board_y_size
    }

    /// The query as one line of the JSON analysis protocol.
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        let h = self.height();
        let wire = WireQuery {
            id: &self.id,
            params: &self.params,
            initial_stones: self
                .initial_stones
                .iter()
                .map(|(c, p)| [c.letter().to_string(), p.to_gtp(h)])
                .collect(),
            initial_player: self.initial_player.letter(),
            moves: self
                .moves
                .iter()
                .map(|(c, m)| [c.letter().to_string(), m.to_gtp(h)])
                .collect(),
        };
        serde_json::to_string(&wire)
    }
}

/// Extract the node id from a query or result id. Ids without a counter
/// are accepted as bare node ids.
pub fn node_id_from_id(id: &str) -> Option<NodeId> {
    let prefix = id.split_once(':').map_or(id, |(node, _)| node);
    prefix.parse().ok()
}

/// Whether `full` already asks for what `base` describes.
pub fn matches(full: &Query, base: &BaseQuery) -> bool {
    full.node_id() == Some(base.node_id) && full.params == base.params
}

/// Map a record's rules name onto one the engine understands.
pub fn canonical_rules(raw: &str, fallback: &str) -> String {
    let rules = match raw.trim().to_ascii_lowercase().as_str() {
        "chinese" | "cn" => "chinese",
        "japanese" | "jp" => "japanese",
        "korean" => "korean",
        "aga" => "aga",
        "new zealand" | "new-zealand" | "nz" => "new-zealand",
        "tromp-taylor" | "tromp taylor" | "tt" => "tromp-taylor",
        "stone-scoring" | "stone scoring" => "stone-scoring",
        _ => fallback,
    };
    rules.to_string()
}

/// Allocates query ids. Ids are only meaningful to the session that
/// issued them.
#[derive(Debug, Default)]
pub struct QueryBuilder {
    next: u64,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh counter value for non-query ids such as terminate actions.
    pub fn next_counter(&mut self) -> u64 {
        self.next += 1;
        self.next
    }

    pub fn base_query(
        &self,
        tree: &GameTree,
        node: NodeId,
        config: &AnalysisConfig,
    ) -> Result<BaseQuery, TreeError> {
        let board = tree.board(node)?;
        // Records that never set KM or RU take the configured defaults.
        let rules = match tree.inherited(node, "RU")? {
            Some(ru) => canonical_rules(ru, &config.rules),
            None => canonical_rules(&config.rules, DEFAULT_RULES),
        };
        let komi = match tree.inherited(node, "KM")? {
            Some(_) => board.komi,
            None => config.komi,
        };
        let params = QueryParams {
            rules,
            komi,
            board_x_size: board.width(),
            board_y_size: board.height(),
            max_visits: config.max_visits,
            analysis_pv_len: config.pv_len,
            report_during_search_every: config.report_every,
            include_ownership: config.include_ownership,
            override_settings: OverrideSettings {
                wide_root_noise: config.wide_root_noise,
                root_num_symmetries_to_sample: config.symmetries,
            },
        };
        Ok(BaseQuery {
            node_id: node,
            params,
        })
    }

    /// Base query plus position and a fresh id.
    ///
    /// The position is expressed from the nearest ancestor-or-self that
    /// carries setup properties: its board becomes the initial stones and
    /// the moves after it are listed in order.
    pub fn full_query(
        &mut self,
        tree: &GameTree,
        node: NodeId,
        config: &AnalysisConfig,
    ) -> Result<Query, TreeError> {
        let base = self.base_query(tree, node, config)?;
        let history = tree.history(node)?;
        let mut start = 0;
        for (i, &n) in history.iter().enumerate().rev() {
            if tree.node(n)?.has_setup_properties() {
                start = i;
                break;
            }
        }

        let initial = tree.board(history[start])?;
        let mut moves = Vec::new();
        for &n in &history[start + 1..] {
            if let Some(mv) = tree.move_of(n)? {
                moves.push(mv);
            }
        }

        Ok(Query {
            id: format!("{}:{}", node, self.next_counter()),
            params: base.params,
            initial_stones: initial.stones().map(|(p, c)| (c, p)).collect(),
            initial_player: initial.active,
            moves,
            to_move: tree.board(node)?.active,
        })
    }
}
