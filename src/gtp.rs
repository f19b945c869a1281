//! Go Text Protocol (GTP) engine session.
//!
//! Drives any engine that speaks GTP version 2 and offers `kata-analyze`
//! or `lz-analyze` (KataGo, Leela Zero and friends).
//!
//! ## Protocol
//!
//! Every command goes out as `<id> <command> <args...>`. A response starts
//! with `=<id>` (success) or `?<id>` (failure) and ends at the first blank
//! line. An analyze command's response consists of `info ...` lines and
//! only ends once the engine is sent another command, so cancelling is
//! done by sending a harmless one and waiting for the boundary.
//!
//! ## Position sync
//!
//! The session remembers what position it last sent. Moving one node
//! forward costs a single `play`, one node back a single `undo`; anything
//! else replays the whole position after `clear_board`.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::analysis::{AnalysisResult, MoveInfo, ProtocolError, RootInfo};
use crate::board::{Color, Move, Point};
use crate::config::{AnalysisConfig, EngineSettings};
use crate::constants::GTP_BENIGN_COMMAND;
use crate::engine::{AnalysisEngine, EngineEvent, Scheduler, Step, problem_text};
use crate::process::{EngineProcess, ProcessEvent};
use crate::query::{Query, QueryBuilder, matches};
use crate::tree::{GameTree, NodeId, TreeError};

/// Analysis commands in order of preference.
const ANALYZE_COMMANDS: &[&str] = &["kata-analyze", "lz-analyze"];

/// Tags that may appear in an analyze info line.
const INFO_KEYWORDS: &[&str] = &[
    "info",
    "move",
    "visits",
    "edgeVisits",
    "utility",
    "winrate",
    "scoreMean",
    "scoreStdev",
    "scoreLead",
    "scoreSelfplay",
    "prior",
    "lcb",
    "utilityLcb",
    "weight",
    "order",
    "isSymmetryOf",
    "pv",
    "pvVisits",
    "pvEdgeVisits",
    "movesOwnership",
    "ownership",
    "ownershipStdev",
];

/// What a sent command was for.
#[derive(Debug, Clone, PartialEq)]
enum Pending {
    ListCommands,
    /// Part of bringing the engine's position up to date
    Sync,
    Analyze(AnalyzeJob),
    /// Sent only to end an analyze response
    Interrupt,
}

#[derive(Debug, Clone, PartialEq)]
struct AnalyzeJob {
    query_id: String,
    to_move: Color,
    width: u8,
    height: u8,
    turn_number: u32,
    /// `lz-analyze` reports winrates and priors in ten-thousandths
    scale: f64,
}

#[derive(Debug)]
struct Response {
    id: Option<u32>,
    kind: Option<Pending>,
    success: bool,
    lines: Vec<String>,
}

/// The position as the engine last saw it.
#[derive(Debug, Clone, PartialEq)]
struct SyncState {
    width: u8,
    height: u8,
    komi: f64,
    rules: String,
    stones: Vec<(Color, Point)>,
    moves: Vec<(Color, Move)>,
}

impl SyncState {
    fn of(query: &Query) -> Self {
        Self {
            width: query.width(),
            height: query.height(),
            komi: query.params.komi,
            rules: query.params.rules.clone(),
            stones: query.initial_stones.clone(),
            moves: query.moves.clone(),
        }
    }

    fn same_start(&self, other: &SyncState) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.komi == other.komi
            && self.rules == other.rules
            && self.stones == other.stones
    }
}

fn play_command((color, mv): (Color, Move), height: u8) -> String {
    format!("play {} {}", color.letter(), mv.to_gtp(height))
}

/// Commands that take the engine from `old` to `new`.
fn sync_commands(old: Option<&SyncState>, new: &SyncState, known: &HashSet<String>) -> Vec<String> {
    if let Some(old) = old.filter(|o| o.same_start(new)) {
        if old.moves == new.moves {
            return Vec::new();
        }
        if new.moves.len() == old.moves.len() + 1 && new.moves.starts_with(&old.moves) {
            return vec![play_command(new.moves[old.moves.len()], new.height)];
        }
        if old.moves.len() == new.moves.len() + 1
            && old.moves.starts_with(&new.moves)
            && known.contains("undo")
        {
            return vec!["undo".to_string()];
        }
    }

    let mut cmds = Vec::new();
    if new.width == new.height {
        cmds.push(format!("boardsize {}", new.width));
    } else if known.contains("rectangular_boardsize") {
        cmds.push(format!("rectangular_boardsize {} {}", new.width, new.height));
    } else {
        warn!("engine has no rectangular_boardsize, using {}", new.width.max(new.height));
        cmds.push(format!("boardsize {}", new.width.max(new.height)));
    }
    cmds.push("clear_board".to_string());
    cmds.push(format!("komi {}", new.komi));
    if known.contains("kata-set-rules") {
        cmds.push(format!("kata-set-rules {}", new.rules));
    }
    for &(color, p) in &new.stones {
        cmds.push(play_command((color, Move::Play(p)), new.height));
    }
    for &mv in &new.moves {
        cmds.push(play_command(mv, new.height));
    }
    cmds
}

/// Parse an optional numeric id from the beginning of a response header.
fn parse_id(line: &str) -> (Option<u32>, &str) {
    let trimmed = line.trim();
    let end = trimmed
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(trimmed.len());
    match trimmed[..end].parse::<u32>() {
        Ok(id) => (Some(id), trimmed[end..].trim()),
        Err(_) => (None, trimmed),
    }
}

fn number(token: Option<&&str>, line: &str) -> Result<f64, ProtocolError> {
    token
        .and_then(|t| t.parse::<f64>().ok())
        .ok_or_else(|| ProtocolError::Gtp(line.to_string()))
}

/// Parse one analyze info line into candidate moves and, if present, the
/// ownership map. Values are returned from Black's point of view.
fn parse_info(line: &str, job: &AnalyzeJob) -> Result<(Vec<MoveInfo>, Option<Vec<f64>>), ProtocolError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let is_keyword = |t: &str| INFO_KEYWORDS.contains(&t);
    let mut infos: Vec<MoveInfo> = Vec::new();
    let mut ownership = None;
    let mut i = 0;

    while i < tokens.len() {
        let key = tokens[i];
        i += 1;
        if key == "info" {
            infos.push(MoveInfo {
                order: infos.len() as u32,
                ..MoveInfo::default()
            });
            continue;
        }
        if matches!(key, "pv" | "pvVisits" | "pvEdgeVisits" | "movesOwnership" | "ownership" | "ownershipStdev") {
            let start = i;
            while i < tokens.len() && !is_keyword(tokens[i]) {
                i += 1;
            }
            let values = &tokens[start..i];
            match key {
                "pv" => {
                    let info = infos.last_mut().ok_or_else(|| ProtocolError::Gtp(line.to_string()))?;
                    info.pv = values.iter().map(|s| s.to_string()).collect();
                }
                "ownership" => {
                    let parsed: Result<Vec<f64>, _> = values.iter().map(|v| v.parse::<f64>()).collect();
                    let mut parsed = parsed.map_err(|_| ProtocolError::Gtp(line.to_string()))?;
                    if job.to_move == Color::White {
                        parsed.iter_mut().for_each(|v| *v = -*v);
                    }
                    ownership = Some(parsed);
                }
                _ => {}
            }
            continue;
        }

        let info = infos.last_mut().ok_or_else(|| ProtocolError::Gtp(line.to_string()))?;
        let value = tokens.get(i);
        i += 1;
        match key {
            "move" => {
                info.mv = value.ok_or_else(|| ProtocolError::Gtp(line.to_string()))?.to_string();
            }
            "visits" => info.visits = number(value, line)? as u64,
            "winrate" => info.winrate = number(value, line)? * job.scale,
            "scoreLead" => info.score_lead = number(value, line)?,
            "scoreMean" if info.score_lead == 0.0 => info.score_lead = number(value, line)?,
            "prior" => info.prior = number(value, line)? * job.scale,
            "lcb" => info.lcb = number(value, line)? * job.scale,
            "order" => info.order = number(value, line)? as u32,
            _ => {}
        }
    }

    if job.to_move == Color::White {
        for info in &mut infos {
            info.winrate = 1.0 - info.winrate;
            info.lcb = 1.0 - info.lcb;
            info.score_lead = -info.score_lead;
        }
    }
    Ok((infos, ownership))
}

/// Fold an info line into the normalized result shape.
fn to_result(job: &AnalyzeJob, infos: Vec<MoveInfo>, ownership: Option<Vec<f64>>) -> AnalysisResult {
    let best = infos
        .iter()
        .find(|m| m.order == 0)
        .or_else(|| infos.first());
    let root_info = best.map(|b| RootInfo {
        visits: infos.iter().map(|m| m.visits).sum(),
        winrate: b.winrate,
        score_lead: b.score_lead,
    });
    AnalysisResult {
        id: job.query_id.clone(),
        is_during_search: true,
        turn_number: job.turn_number,
        move_infos: infos,
        root_info,
        ownership: ownership.filter(|o| o.len() == job.width as usize * job.height as usize),
        no_results: false,
    }
}

pub struct GtpSession {
    settings: EngineSettings,
    process: Option<EngineProcess>,
    builder: QueryBuilder,
    scheduler: Scheduler,
    next_id: u32,
    pending: BTreeMap<u32, Pending>,
    current: Option<Response>,
    /// Filled in by the `list_commands` answer
    known: Option<HashSet<String>>,
    sent: Option<SyncState>,
}

impl GtpSession {
    pub fn start(settings: &EngineSettings) -> Self {
        if let Some(problem) = problem_text(settings, true) {
            warn!("not starting GTP engine: {problem}");
            return Self::detached(settings);
        }
        match EngineProcess::spawn(&settings.command, &settings.args) {
            Ok(process) => Self::with_process(settings, process),
            Err(e) => {
                error!("{e:#}");
                Self::detached(settings)
            }
        }
    }

    fn detached(settings: &EngineSettings) -> Self {
        Self {
            settings: settings.clone(),
            process: None,
            builder: QueryBuilder::new(),
            scheduler: Scheduler::new(),
            next_id: 1,
            pending: BTreeMap::new(),
            current: None,
            known: None,
            sent: None,
        }
    }

    /// Drive an already running process. Asks for the command list first.
    pub fn with_process(settings: &EngineSettings, process: EngineProcess) -> Self {
        let mut session = Self::detached(settings);
        session.process = Some(process);
        session.command("list_commands", Pending::ListCommands);
        session
    }

    pub fn supports(&self, command: &str) -> bool {
        self.known.as_ref().is_some_and(|k| k.contains(command))
    }

    fn command(&mut self, command: &str, kind: Pending) {
        let Some(process) = self.process.as_mut() else {
            return;
        };
        let id = self.next_id;
        self.next_id += 1;
        match process.send_line(&format!("{id} {command}")) {
            Ok(()) => {
                self.pending.insert(id, kind);
            }
            Err(e) => warn!("{e:#}"),
        }
    }

    fn analyze_command(&self) -> Option<&'static str> {
        ANALYZE_COMMANDS.iter().copied().find(|c| self.supports(c))
    }

    /// Sync the position and start analysing `query`.
    fn start_query(&mut self, query: Query) {
        let Some(known) = self.known.clone() else {
            // picked up once list_commands has been answered
            return;
        };
        let Some(analyze) = self.analyze_command() else {
            warn!("engine supports neither kata-analyze nor lz-analyze");
            let step = self.scheduler.finish(&query.id);
            self.perform(step);
            return;
        };

        let target = SyncState::of(&query);
        for cmd in sync_commands(self.sent.as_ref(), &target, &known) {
            self.command(&cmd, Pending::Sync);
        }
        self.sent = Some(target);

        let interval = (query.params.report_during_search_every * 100.0).round().max(1.0) as u32;
        let mut cmd = format!("{analyze} {} {interval}", query.to_move.letter());
        if analyze == "kata-analyze" && query.params.include_ownership {
            cmd.push_str(" ownership true");
        }
        let job = AnalyzeJob {
            query_id: query.id.clone(),
            to_move: query.to_move,
            width: query.width(),
            height: query.height(),
            turn_number: (query.initial_stones.len() + query.moves.len()) as u32,
            scale: if analyze == "lz-analyze" { 1.0 / 10000.0 } else { 1.0 },
        };
        self.command(&cmd, Pending::Analyze(job));
    }

    fn analysis_in_flight(&self) -> bool {
        let is_analyze = |p: &Pending| matches!(p, Pending::Analyze(_));
        self.pending.values().any(is_analyze)
            || self.current.as_ref().and_then(|r| r.kind.as_ref()).is_some_and(is_analyze)
    }

    fn perform(&mut self, step: Step) {
        match step {
            Step::Nothing => {}
            Step::Send(query) => self.start_query(query),
            Step::Cancel(_) => {
                if self.analysis_in_flight() {
                    self.command(GTP_BENIGN_COMMAND, Pending::Interrupt);
                } else {
                    // nothing reached the engine yet (still waiting on the
                    // command list); drop it straight away
                    if let Some(id) = self.scheduler.running().map(|r| r.id.clone()) {
                        let step = self.scheduler.finish(&id);
                        self.perform(step);
                    }
                }
            }
        }
    }

    fn begin_response(&mut self, line: &str) {
        let success = line.starts_with('=');
        let (id, rest) = parse_id(&line[1..]);
        let kind = match id {
            Some(id) => self.pending.remove(&id),
            None => self.pending.pop_first().map(|(_, k)| k),
        };
        if kind.is_none() {
            debug!("response to unknown command: {line}");
        }
        let mut lines = Vec::new();
        if !rest.is_empty() {
            lines.push(rest.to_string());
        }
        self.current = Some(Response {
            id,
            kind,
            success,
            lines,
        });
    }

    fn analysis_line(job: &AnalyzeJob, line: &str) -> Option<EngineEvent> {
        if !line.starts_with("info") {
            debug!("ignoring analyze output: {line}");
            return None;
        }
        match parse_info(line, job) {
            Ok((infos, _)) if infos.is_empty() => None,
            Ok((infos, ownership)) => Some(EngineEvent::Analysis(to_result(job, infos, ownership))),
            Err(e) => {
                warn!("{e}");
                None
            }
        }
    }

    fn end_response(&mut self, response: Response) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        if !response.success {
            let text = format!(
                "engine error{}: {}",
                response.id.map(|i| format!(" (command {i})")).unwrap_or_default(),
                response.lines.join(" ")
            );
            warn!("{text}");
            events.push(EngineEvent::Notice(text));
        }
        match response.kind {
            Some(Pending::ListCommands) => {
                let known: HashSet<String> = if response.success {
                    response.lines.iter().map(|l| l.trim().to_string()).collect()
                } else {
                    HashSet::new()
                };
                debug!("engine knows {} commands", known.len());
                self.known = Some(known);
                if let Some(query) = self.scheduler.running().cloned() {
                    self.start_query(query);
                }
            }
            Some(Pending::Sync) if !response.success => {
                self.sent = None;
            }
            Some(Pending::Analyze(job)) => {
                let step = self.scheduler.finish(&job.query_id);
                self.perform(step);
            }
            Some(Pending::Sync) | Some(Pending::Interrupt) | None => {}
        }
        events
    }
}

impl AnalysisEngine for GtpSession {
    fn request_analysis(
        &mut self,
        tree: &GameTree,
        node: NodeId,
        config: &AnalysisConfig,
    ) -> Result<(), TreeError> {
        if self.process.is_none() {
            return Ok(());
        }
        let base = self.builder.base_query(tree, node, config)?;
        if self.scheduler.desired().is_some_and(|d| matches(d, &base)) {
            return Ok(());
        }
        let query = self.builder.full_query(tree, node, config)?;
        let step = self.scheduler.request(query);
        self.perform(step);
        Ok(())
    }

    fn halt(&mut self) {
        let step = self.scheduler.halt();
        self.perform(step);
    }

    fn handle_line(&mut self, line: &str) -> Vec<EngineEvent> {
        let line = line.trim_end_matches('\r');
        let Some(current) = self.current.as_mut() else {
            if line.starts_with('=') || line.starts_with('?') {
                self.begin_response(line);
                if let Some(Response { kind: Some(Pending::Analyze(job)), lines, .. }) = &self.current {
                    if let Some(first) = lines.first() {
                        return Self::analysis_line(job, first).into_iter().collect();
                    }
                }
            } else if !line.trim().is_empty() {
                debug!("unsolicited engine output: {line}");
            }
            return Vec::new();
        };

        if line.trim().is_empty() {
            let Some(response) = self.current.take() else {
                return Vec::new();
            };
            return self.end_response(response);
        }
        match &current.kind {
            Some(Pending::Analyze(job)) if current.success => {
                Self::analysis_line(job, line).into_iter().collect()
            }
            _ => {
                current.lines.push(line.to_string());
                Vec::new()
            }
        }
    }

    fn process_exited(&mut self) -> Vec<EngineEvent> {
        warn!("GTP engine exited");
        self.process = None;
        self.scheduler.reset();
        self.pending.clear();
        self.current = None;
        self.sent = None;
        vec![EngineEvent::Exited]
    }

    fn next_process_event(&mut self, timeout: Option<Duration>) -> Option<ProcessEvent> {
        let process = self.process.as_ref()?;
        match timeout {
            Some(t) => process.recv_timeout(t),
            None => process.try_recv(),
        }
    }

    fn problem_text(&self) -> Option<String> {
        problem_text(&self.settings, self.process.is_some())
    }

    fn shutdown(&mut self) {
        self.halt();
        self.command("quit", Pending::Interrupt);
        if let Some(mut process) = self.process.take() {
            process.kill();
        }
        self.scheduler.reset();
        self.pending.clear();
    }

    fn running(&self) -> Option<&Query> {
        self.scheduler.running()
    }

    fn desired(&self) -> Option<&Query> {
        self.scheduler.desired()
    }

    fn is_alive(&self) -> bool {
        self.process.is_some()
    }
}
