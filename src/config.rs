//! Configuration for engines and analysis queries.
//!
//! Every field has a default, so a partial (or missing) TOML file still
//! yields a usable [`Config`].

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{info, warn};

use crate::constants::{
    DEFAULT_KOMI, DEFAULT_MAX_VISITS, DEFAULT_PV_LEN, DEFAULT_REPORT_EVERY, DEFAULT_RULES,
    DEFAULT_SIZE, DEFAULT_SYMMETRIES,
};

/// Wire protocol spoken by the engine process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// KataGo's JSON analysis engine
    #[default]
    Analysis,
    /// Any engine speaking GTP with `kata-analyze` or `lz-analyze`
    Gtp,
}

/// How to launch the engine.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub protocol: Protocol,
    /// Analysis engine executable
    pub path: PathBuf,
    /// Analysis engine config file (`-config`)
    pub config: PathBuf,
    /// Network weights (`-model`)
    pub weights: PathBuf,
    /// GTP launch command
    pub command: PathBuf,
    /// GTP launch arguments
    pub args: Vec<String>,
}

/// Parameters copied into every analysis query.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Rules used when a record's `RU` is missing or not understood
    pub rules: String,
    pub komi: f64,
    pub board_size: u8,
    pub max_visits: u64,
    /// Seconds between intermediate reports
    pub report_every: f64,
    pub wide_root_noise: f64,
    pub include_ownership: bool,
    pub pv_len: u32,
    pub symmetries: u32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            rules: DEFAULT_RULES.to_string(),
            komi: DEFAULT_KOMI,
            board_size: DEFAULT_SIZE,
            max_visits: DEFAULT_MAX_VISITS,
            report_every: DEFAULT_REPORT_EVERY,
            wide_root_noise: 0.0,
            include_ownership: true,
            pv_len: DEFAULT_PV_LEN,
            symmetries: DEFAULT_SYMMETRIES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineSettings,
    pub analysis: AnalysisConfig,
}

/// Load a TOML config, falling back to defaults if it cannot be read.
pub fn load_from_path(path: &Path) -> Config {
    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                info!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                warn!("Failed to parse {}: {}, using defaults", path.display(), e);
                Config::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {}: {}, using defaults", path.display(), e);
            Config::default()
        }
    }
}
