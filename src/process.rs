//! Engine subprocess plumbing.
//!
//! An [`EngineProcess`] owns the child process, a writer for its stdin and
//! a channel fed by reader threads on stdout and stderr. Lines arrive on
//! the channel in the order the engine wrote them, so the session that owns
//! the process can drain it from its own event loop without blocking.

use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, warn};

/// Something the engine process did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Stdout(String),
    Stderr(String),
    /// Stdout reached end of file
    Exited,
}

/// A running engine (or an in-memory stand-in for one).
pub struct EngineProcess {
    child: Option<Child>,
    stdin: Box<dyn Write + Send>,
    rx: Receiver<ProcessEvent>,
}

fn forward_lines<R: Read + Send + 'static>(
    reader: R,
    tx: Sender<ProcessEvent>,
    wrap: fn(String) -> ProcessEvent,
    on_eof: Option<ProcessEvent>,
) {
    thread::spawn(move || {
        for line in BufReader::new(reader).lines() {
            match line {
                Ok(l) => {
                    if tx.send(wrap(l)).is_err() {
                        return;
                    }
                }
                Err(_) => break,
            }
        }
        if let Some(ev) = on_eof {
            let _ = tx.send(ev);
        }
    });
}

/// `path` made absolute against the current directory. Paths handed to an
/// engine must survive the change of working directory in
/// [`EngineProcess::spawn`].
pub fn absolute_path(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

impl EngineProcess {
    /// Launch `program` with `args`, working directory set to the
    /// program's own directory. A bare program name is looked up on `PATH`
    /// and keeps the current directory.
    pub fn spawn(program: &Path, args: &[String]) -> Result<Self> {
        let dir = program.parent().filter(|d| !d.as_os_str().is_empty());
        let program = match dir {
            Some(_) => absolute_path(program),
            None => program.to_path_buf(),
        };
        let mut cmd = Command::new(&program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = program.parent().filter(|_| dir.is_some()) {
            cmd.current_dir(dir);
        }
        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn engine at {}", program.display()))?;
        let stdin = child.stdin.take().ok_or_else(|| anyhow!("no stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| anyhow!("no stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| anyhow!("no stderr"))?;

        let (tx, rx) = mpsc::channel();
        forward_lines(stdout, tx.clone(), ProcessEvent::Stdout, Some(ProcessEvent::Exited));
        forward_lines(stderr, tx, ProcessEvent::Stderr, None);

        debug!("spawned engine {} (pid {})", program.display(), child.id());
        Ok(Self {
            child: Some(child),
            stdin: Box::new(stdin),
            rx,
        })
    }

    /// Wrap an arbitrary writer and event channel, e.g. for tests.
    pub fn from_parts(stdin: Box<dyn Write + Send>, rx: Receiver<ProcessEvent>) -> Self {
        Self {
            child: None,
            stdin,
            rx,
        }
    }

    /// Write one line to the engine.
    pub fn send_line(&mut self, line: &str) -> Result<()> {
        debug!("--> {line}");
        writeln!(self.stdin, "{line}").context("engine stdin closed")?;
        self.stdin.flush().context("engine stdin closed")?;
        Ok(())
    }

    /// Next pending event, if any, without blocking.
    pub fn try_recv(&self) -> Option<ProcessEvent> {
        match self.rx.try_recv() {
            Ok(ev) => Some(ev),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(ProcessEvent::Exited),
        }
    }

    /// Wait up to `timeout` for the next event.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ProcessEvent> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                warn!("failed to kill engine: {e}");
            }
            let _ = child.wait();
        }
    }
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        self.kill();
    }
}
