//! The engine session contract shared by both protocols.
//!
//! A session owns one engine process and keeps at most one query running
//! on it. Callers say what they want analysed with
//! [`AnalysisEngine::request_analysis`]; the session decides whether that
//! means sending a query now, cancelling the current one first, or doing
//! nothing because the engine is already on it. The bookkeeping for that
//! decision lives in [`Scheduler`] so both protocols share it.

use std::path::Path;
use std::time::Duration;

use tracing::{error, info};

use crate::analysis::AnalysisResult;
use crate::config::{AnalysisConfig, EngineSettings, Protocol};
use crate::gtp::GtpSession;
use crate::katago::KataGoSession;
use crate::process::ProcessEvent;
use crate::query::Query;
use crate::tree::{GameTree, NodeId, TreeError};

/// Something the caller should react to.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Analysis data to hand to the router
    Analysis(AnalysisResult),
    /// Error or warning worth showing the user
    Notice(String),
    /// Engine identified itself
    Version(String),
    /// The engine process went away
    Exited,
}

/// What the session has to send after a scheduling decision.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Nothing,
    /// Send this query; it is now running
    Send(Query),
    /// Ask the engine to stop this (running) query
    Cancel(Query),
}

/// Running/desired bookkeeping.
///
/// `running` is the query the engine is working on. `desired` is the
/// caller's latest wish. A cancel is outstanding whenever something runs
/// that is not what the caller wants, so at most one cancel is ever sent
/// per running query.
#[derive(Debug, Default)]
pub struct Scheduler {
    running: Option<Query>,
    desired: Option<Query>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn running(&self) -> Option<&Query> {
        self.running.as_ref()
    }

    pub fn desired(&self) -> Option<&Query> {
        self.desired.as_ref()
    }

    fn cancel_outstanding(&self) -> bool {
        match (&self.running, &self.desired) {
            (Some(r), Some(d)) => r.id != d.id,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    /// Make `query` the desired one.
    pub fn request(&mut self, query: Query) -> Step {
        let cancelling = self.cancel_outstanding();
        self.desired = Some(query.clone());
        match &self.running {
            None => {
                self.running = Some(query.clone());
                Step::Send(query)
            }
            Some(r) if !cancelling => Step::Cancel(r.clone()),
            Some(_) => Step::Nothing,
        }
    }

    /// Stop whatever runs and do not resume afterwards.
    pub fn halt(&mut self) -> Step {
        let step = match &self.running {
            Some(r) if !self.cancel_outstanding() => Step::Cancel(r.clone()),
            _ => Step::Nothing,
        };
        self.desired = None;
        step
    }

    /// The query with id `id` ended (normally, by error, or by cancel).
    /// Ids other than the running one are ignored.
    pub fn finish(&mut self, id: &str) -> Step {
        let Some(running) = self.running.take_if(|r| r.id == id) else {
            return Step::Nothing;
        };
        if self.desired.as_ref().is_some_and(|d| d.id == running.id) {
            self.desired = None;
        }
        match &self.desired {
            Some(d) => {
                self.running = Some(d.clone());
                Step::Send(d.clone())
            }
            None => Step::Nothing,
        }
    }

    /// Forget everything, e.g. because the process died.
    pub fn reset(&mut self) {
        self.running = None;
        self.desired = None;
    }
}

/// One engine session, whichever protocol it speaks.
pub trait AnalysisEngine {
    /// Ask for analysis of `node`. A no-op when there is no process or the
    /// desired query already covers the node's current settings.
    fn request_analysis(
        &mut self,
        tree: &GameTree,
        node: NodeId,
        config: &AnalysisConfig,
    ) -> Result<(), TreeError>;

    /// Stop analysing without queuing anything else.
    fn halt(&mut self);

    /// Handle one line of engine stdout.
    fn handle_line(&mut self, line: &str) -> Vec<EngineEvent>;

    fn handle_stderr(&mut self, line: &str) -> Vec<EngineEvent> {
        info!("engine: {line}");
        Vec::new()
    }

    /// The process went away.
    fn process_exited(&mut self) -> Vec<EngineEvent>;

    /// Next raw event from the process, waiting up to `timeout` if given.
    fn next_process_event(&mut self, timeout: Option<Duration>) -> Option<ProcessEvent>;

    fn dispatch(&mut self, event: ProcessEvent) -> Vec<EngineEvent> {
        match event {
            ProcessEvent::Stdout(line) => self.handle_line(&line),
            ProcessEvent::Stderr(line) => self.handle_stderr(&line),
            ProcessEvent::Exited => self.process_exited(),
        }
    }

    /// Handle every event that is already waiting.
    fn poll(&mut self) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Some(ev) = self.next_process_event(None) {
            events.extend(self.dispatch(ev));
        }
        events
    }

    /// Wait up to `timeout` for activity, then handle everything waiting.
    fn wait(&mut self, timeout: Duration) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        if let Some(ev) = self.next_process_event(Some(timeout)) {
            events.extend(self.dispatch(ev));
        }
        events.extend(self.poll());
        events
    }

    /// Why the engine is not usable, if it is not.
    fn problem_text(&self) -> Option<String>;

    fn shutdown(&mut self);

    fn running(&self) -> Option<&Query>;

    fn desired(&self) -> Option<&Query>;

    fn is_alive(&self) -> bool;
}

fn missing(path: &Path) -> bool {
    path.as_os_str().is_empty() || !path.exists()
}

/// First thing preventing `settings` from giving a working engine, in the
/// order path, config, weights, process.
pub fn problem_text(settings: &EngineSettings, alive: bool) -> Option<String> {
    match settings.protocol {
        Protocol::Analysis => {
            if missing(&settings.path) {
                return Some(format!("engine not found: {}", settings.path.display()));
            }
            if missing(&settings.config) {
                return Some(format!("engine config not found: {}", settings.config.display()));
            }
            if missing(&settings.weights) {
                return Some(format!("weights not found: {}", settings.weights.display()));
            }
        }
        Protocol::Gtp => {
            if missing(&settings.command) {
                return Some(format!("engine not found: {}", settings.command.display()));
            }
        }
    }
    if !alive {
        return Some("engine process is not running".to_string());
    }
    None
}

/// Launch the session `settings` ask for. A session whose process could
/// not be started is still returned; it just ignores requests.
pub fn start_session(settings: &EngineSettings) -> Box<dyn AnalysisEngine> {
    let session: Box<dyn AnalysisEngine> = match settings.protocol {
        Protocol::Analysis => Box::new(KataGoSession::start(settings)),
        Protocol::Gtp => Box::new(GtpSession::start(settings)),
    };
    if let Some(problem) = session.problem_text() {
        error!("{problem}");
    }
    session
}
