//! Normalized engine results and the inbound JSON message schema.
//!
//! Both engine protocols end up producing [`AnalysisResult`]s. Winrates,
//! score leads, LCBs and ownership are always from Black's point of view.
//!
//! Lines from the JSON analysis engine are classified into an
//! [`EngineMessage`] at the protocol boundary; anything that does not fit
//! one of the known shapes is rejected with a [`ProtocolError`].

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::query::node_id_from_id;
use crate::tree::NodeId;

/// Statistics for one candidate move.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MoveInfo {
    /// GTP vertex or `pass`
    #[serde(rename = "move")]
    pub mv: String,
    pub visits: u64,
    pub winrate: f64,
    pub score_lead: f64,
    pub lcb: f64,
    pub prior: f64,
    pub order: u32,
    pub pv: Vec<String>,
}

/// Statistics for the analysed position as a whole.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RootInfo {
    pub visits: u64,
    pub winrate: f64,
    pub score_lead: f64,
}

/// One (possibly intermediate) analysis report.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    /// Id of the query this answers
    pub id: String,
    #[serde(default)]
    pub is_during_search: bool,
    #[serde(default)]
    pub turn_number: u32,
    #[serde(default)]
    pub move_infos: Vec<MoveInfo>,
    #[serde(default)]
    pub root_info: Option<RootInfo>,
    /// One value per point, row-major from the top-left
    #[serde(default)]
    pub ownership: Option<Vec<f64>>,
    #[serde(default)]
    pub no_results: bool,
}

impl AnalysisResult {
    /// Node the originating query was built for.
    pub fn node_id(&self) -> Option<NodeId> {
        node_id_from_id(&self.id)
    }

    /// Has candidate moves and root statistics.
    pub fn is_well_formed(&self) -> bool {
        !self.move_infos.is_empty() && self.root_info.is_some()
    }

    /// The engine's preferred move.
    pub fn best(&self) -> Option<&MoveInfo> {
        self.move_infos
            .iter()
            .find(|m| m.order == 0)
            .or_else(|| self.move_infos.first())
    }
}

/// A classified line from the JSON analysis engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineMessage {
    Analysis(AnalysisResult),
    Error {
        id: Option<String>,
        message: String,
        field: Option<String>,
    },
    Warning {
        id: Option<String>,
        message: String,
        field: Option<String>,
    },
    Version {
        version: String,
        git_hash: Option<String>,
    },
    /// Acknowledgement of an action such as `terminate`
    ActionAck { action: String, id: Option<String> },
}

/// A line the session could not make sense of.
#[derive(Debug)]
pub enum ProtocolError {
    Json(serde_json::Error),
    NotAnObject,
    Unrecognized(String),
    /// Malformed GTP output
    Gtp(String),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Json(e) => write!(f, "malformed JSON: {e}"),
            ProtocolError::NotAnObject => write!(f, "engine line is not a JSON object"),
            ProtocolError::Unrecognized(line) => write!(f, "unrecognized engine message: {line}"),
            ProtocolError::Gtp(line) => write!(f, "unexpected GTP output: {line}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::Json(e)
    }
}

fn str_field(obj: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Classify one line of JSON analysis engine output.
pub fn parse_message(line: &str) -> Result<EngineMessage, ProtocolError> {
    let value: Value = serde_json::from_str(line)?;
    let Value::Object(obj) = &value else {
        return Err(ProtocolError::NotAnObject);
    };
    let id = str_field(obj, "id");
    let field = str_field(obj, "field");

    if let Some(message) = str_field(obj, "error") {
        return Ok(EngineMessage::Error { id, message, field });
    }
    if let Some(message) = str_field(obj, "warning") {
        return Ok(EngineMessage::Warning { id, message, field });
    }
    if let Some(version) = str_field(obj, "version") {
        let git_hash = str_field(obj, "git_hash");
        return Ok(EngineMessage::Version { version, git_hash });
    }
    if let Some(action) = str_field(obj, "action") {
        return Ok(EngineMessage::ActionAck { action, id });
    }
    let is_analysis = id.is_some()
        && ["moveInfos", "rootInfo", "noResults", "isDuringSearch"]
            .iter()
            .any(|k| obj.contains_key(*k));
    if is_analysis {
        return Ok(EngineMessage::Analysis(serde_json::from_value(value)?));
    }
    Err(ProtocolError::Unrecognized(line.to_string()))
}
