//! Session for KataGo's JSON analysis engine.
//!
//! Queries and results are single JSON lines. A query finishes when the
//! engine reports it with `isDuringSearch: false` or answers it with an
//! error; cancelling is a `terminate` action naming the running id.

use std::time::Duration;

use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::analysis::{EngineMessage, parse_message};
use crate::config::{AnalysisConfig, EngineSettings};
use crate::engine::{AnalysisEngine, EngineEvent, Scheduler, Step, problem_text};
use crate::process::{EngineProcess, ProcessEvent, absolute_path};
use crate::query::{Query, QueryBuilder, matches};
use crate::tree::{GameTree, NodeId, TreeError};

pub struct KataGoSession {
    settings: EngineSettings,
    process: Option<EngineProcess>,
    builder: QueryBuilder,
    scheduler: Scheduler,
    version: Option<String>,
}

/// Command line for `katago analysis`. The engine runs in its own
/// directory, so file arguments are made absolute first.
fn engine_args(settings: &EngineSettings) -> Vec<String> {
    vec![
        "analysis".to_string(),
        "-config".to_string(),
        absolute_path(&settings.config).display().to_string(),
        "-model".to_string(),
        absolute_path(&settings.weights).display().to_string(),
    ]
}

impl KataGoSession {
    /// Spawn the analysis engine. Missing files or a failed spawn leave a
    /// session without a process.
    pub fn start(settings: &EngineSettings) -> Self {
        if let Some(problem) = problem_text(settings, true) {
            warn!("not starting analysis engine: {problem}");
            return Self::detached(settings);
        }
        match EngineProcess::spawn(&settings.path, &engine_args(settings)) {
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
            version: None,
        }
    }

    /// Drive an already running process.
    pub fn with_process(settings: &EngineSettings, process: EngineProcess) -> Self {
        let mut session = Self::detached(settings);
        session.process = Some(process);
        session.send(&json!({"id": "version", "action": "query_version"}).to_string());
        session
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    fn send(&mut self, line: &str) {
        if let Some(process) = self.process.as_mut() {
            if let Err(e) = process.send_line(line) {
                warn!("{e:#}");
            }
        }
    }

    fn perform(&mut self, step: Step) {
        match step {
            Step::Nothing => {}
            Step::Send(query) => match query.to_json_line() {
                Ok(line) => self.send(&line),
                Err(e) => error!("failed to encode query {}: {e}", query.id),
            },
            Step::Cancel(running) => {
                let id = format!("terminate:{}", self.builder.next_counter());
                let line = json!({"id": id, "action": "terminate", "terminateId": running.id});
                self.send(&line.to_string());
            }
        }
    }

    fn finish(&mut self, id: &str) {
        let step = self.scheduler.finish(id);
        self.perform(step);
    }
}

impl AnalysisEngine for KataGoSession {
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
        let message = match parse_message(line) {
            Ok(m) => m,
            Err(e) => {
                warn!("{e}");
                return Vec::new();
            }
        };
        let mut events = Vec::new();
        match message {
            EngineMessage::Analysis(result) => {
                let done = !result.is_during_search;
                let id = result.id.clone();
                if !result.move_infos.is_empty() || result.root_info.is_some() {
                    events.push(EngineEvent::Analysis(result));
                }
                if done {
                    self.finish(&id);
                }
            }
            EngineMessage::Error { id, message, field } => {
                let text = match field {
                    Some(field) => format!("engine error: {message} ({field})"),
                    None => format!("engine error: {message}"),
                };
                warn!("{text}");
                events.push(EngineEvent::Notice(text));
                if let Some(id) = id {
                    self.finish(&id);
                }
            }
            EngineMessage::Warning { message, field, .. } => {
                let text = match field {
                    Some(field) => format!("engine warning: {message} ({field})"),
                    None => format!("engine warning: {message}"),
                };
                warn!("{text}");
                events.push(EngineEvent::Notice(text));
            }
            EngineMessage::Version { version, git_hash } => {
                info!("KataGo {version} ({})", git_hash.as_deref().unwrap_or("unknown build"));
                self.version = Some(version.clone());
                events.push(EngineEvent::Version(version));
            }
            EngineMessage::ActionAck { action, id } => {
                debug!("{action} acknowledged ({})", id.as_deref().unwrap_or("-"));
            }
        }
        events
    }

    fn process_exited(&mut self) -> Vec<EngineEvent> {
        warn!("analysis engine exited");
        self.process = None;
        self.scheduler.reset();
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
        if let Some(mut process) = self.process.take() {
            process.kill();
        }
        self.scheduler.reset();
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::Point;
    use crate::process::testing::{SharedBuf, fake_process};
    use serde_json::Value;
    use std::sync::mpsc::Sender;

    struct Harness {
        session: KataGoSession,
        out: SharedBuf,
        tx: Sender<ProcessEvent>,
        tree: GameTree,
        config: AnalysisConfig,
    }

    impl Harness {
        fn new() -> Self {
            let (process, out, tx) = fake_process();
            let session = KataGoSession::with_process(&EngineSettings::default(), process);
            let handshake = out.take_lines();
            assert_eq!(handshake.len(), 1);
            assert!(handshake[0].contains("query_version"));
            Self {
                session,
                out,
                tx,
                tree: GameTree::new(19, 19, 7.5, "chinese").unwrap(),
                config: AnalysisConfig::default(),
            }
        }

        fn request(&mut self, node: NodeId) {
            self.session
                .request_analysis(&self.tree, node, &self.config)
                .unwrap();
        }

        fn sent(&self) -> Vec<Value> {
            self.out
                .take_lines()
                .iter()
                .map(|l| serde_json::from_str(l).unwrap())
                .collect()
        }

        fn reply(&mut self, line: String) -> Vec<EngineEvent> {
            self.tx.send(ProcessEvent::Stdout(line)).unwrap();
            self.session.poll()
        }
    }

    fn final_result(id: &str) -> String {
        json!({
            "id": id,
            "isDuringSearch": false,
            "turnNumber": 1,
            "moveInfos": [{"move": "Q16", "visits": 10, "winrate": 0.48, "scoreLead": -0.5,
                           "lcb": 0.45, "prior": 0.3, "order": 0, "pv": ["Q16"]}],
            "rootInfo": {"visits": 11, "winrate": 0.48, "scoreLead": -0.5}
        })
        .to_string()
    }

    #[test]
    fn test_request_then_supersede() {
        let mut h = Harness::new();
        let root = h.tree.root();
        let a = h.tree.apply_move(root, Point::new(3, 15)).unwrap();
        let b = h.tree.apply_move(a, Point::new(15, 3)).unwrap();

        h.request(a);
        let sent = h.sent();
        assert_eq!(sent.len(), 1);
        let a_id = sent[0]["id"].as_str().unwrap().to_string();
        assert!(a_id.starts_with(&format!("{a}:")));

        h.request(b);
        let sent = h.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["action"], "terminate");
        assert_eq!(sent[0]["terminateId"], Value::String(a_id.clone()));

        // nothing new goes out until A is finished
        h.request(b);
        assert!(h.sent().is_empty());

        let events = h.reply(final_result(&a_id));
        assert!(matches!(events.as_slice(), [EngineEvent::Analysis(_)]));
        let sent = h.sent();
        assert_eq!(sent.len(), 1);
        let b_id = sent[0]["id"].as_str().unwrap();
        assert!(b_id.starts_with(&format!("{b}:")));
        assert_eq!(sent[0]["moves"].as_array().unwrap().len(), 2);
        assert_eq!(h.session.running().map(|q| q.id.as_str()), Some(b_id));
    }

    #[test]
    fn test_repeated_requests_queue_only_latest() {
        let mut h = Harness::new();
        let mut node = h.tree.root();
        let mut nodes = Vec::new();
        for x in 0..5 {
            node = h.tree.apply_move(node, Point::new(x, 0)).unwrap();
            nodes.push(node);
        }
        for &n in &nodes {
            h.request(n);
        }
        let sent = h.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].get("action").is_none());
        assert_eq!(sent[1]["action"], "terminate");

        let first = sent[0]["id"].as_str().unwrap().to_string();
        h.reply(final_result(&first));
        let sent = h.sent();
        assert_eq!(sent.len(), 1);
        let last = nodes[4];
        assert!(sent[0]["id"].as_str().unwrap().starts_with(&format!("{last}:")));
    }

    #[test]
    fn test_same_node_twice_is_noop() {
        let mut h = Harness::new();
        let root = h.tree.root();
        h.request(root);
        h.request(root);
        assert_eq!(h.sent().len(), 1);
    }

    #[test]
    fn test_halt_then_finish_sends_nothing() {
        let mut h = Harness::new();
        let root = h.tree.root();
        h.request(root);
        let id = h.sent()[0]["id"].as_str().unwrap().to_string();
        h.session.halt();
        assert_eq!(h.sent()[0]["action"], "terminate");
        h.reply(final_result(&id));
        assert!(h.sent().is_empty());
        assert!(h.session.running().is_none());
        assert!(h.session.desired().is_none());
    }

    #[test]
    fn test_intermediate_results_do_not_finish() {
        let mut h = Harness::new();
        let root = h.tree.root();
        h.request(root);
        let id = h.sent()[0]["id"].as_str().unwrap().to_string();
        let mut v: Value = serde_json::from_str(&final_result(&id)).unwrap();
        v["isDuringSearch"] = Value::Bool(true);
        let events = h.reply(v.to_string());
        assert_eq!(events.len(), 1);
        assert!(h.session.running().is_some());
    }

    #[test]
    fn test_error_for_running_query_completes_it() {
        let mut h = Harness::new();
        let root = h.tree.root();
        let a = h.tree.apply_move(root, Point::new(3, 3)).unwrap();
        h.request(root);
        let id = h.sent()[0]["id"].as_str().unwrap().to_string();
        h.request(a);
        h.sent();
        let events = h.reply(json!({"id": id, "error": "bad query"}).to_string());
        assert!(matches!(events.as_slice(), [EngineEvent::Notice(_)]));
        let sent = h.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0]["id"].as_str().unwrap().starts_with(&format!("{a}:")));
    }

    #[test]
    fn test_garbage_lines_change_nothing() {
        let mut h = Harness::new();
        let root = h.tree.root();
        h.request(root);
        h.sent();
        let before = h.session.running().cloned();
        assert!(h.reply("{not json".to_string()).is_empty());
        assert!(h.reply(r#"{"unexpected":true}"#.to_string()).is_empty());
        assert_eq!(h.session.running().cloned(), before);
        assert!(h.sent().is_empty());
    }

    #[test]
    fn test_version_and_exit() {
        let mut h = Harness::new();
        let events = h.reply(
            json!({"action": "query_version", "id": "version", "version": "1.15.3", "git_hash": "x"})
                .to_string(),
        );
        assert_eq!(events, vec![EngineEvent::Version("1.15.3".into())]);
        assert_eq!(h.session.version(), Some("1.15.3"));

        h.tx.send(ProcessEvent::Exited).unwrap();
        assert_eq!(h.session.poll(), vec![EngineEvent::Exited]);
        assert!(!h.session.is_alive());
        let root = h.tree.root();
        h.request(root);
        assert!(h.session.running().is_none());
    }

    #[test]
    fn test_no_process_requests_are_noops() {
        let settings = EngineSettings {
            path: "/nonexistent/katago".into(),
            ..EngineSettings::default()
        };
        let mut session = KataGoSession::start(&settings);
        let tree = GameTree::new(9, 9, 7.5, "chinese").unwrap();
        session
            .request_analysis(&tree, tree.root(), &AnalysisConfig::default())
            .unwrap();
        assert!(session.running().is_none());
        assert!(session.problem_text().unwrap().starts_with("engine not found"));
    }

    #[test]
    fn test_engine_args_are_absolute() {
        let settings = EngineSettings {
            config: "engines/analysis.cfg".into(),
            weights: "/nets/b18.bin.gz".into(),
            ..EngineSettings::default()
        };
        let args = engine_args(&settings);
        assert_eq!(args[0], "analysis");
        assert_eq!(args[1], "-config");
        assert!(std::path::Path::new(&args[2]).is_absolute());
        assert!(args[2].ends_with("engines/analysis.cfg"));
        assert_eq!(args[3..], ["-model", "/nets/b18.bin.gz"]);
    }
}
