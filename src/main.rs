//! Gobanview command line.
//!
//! ## Usage
//!
//! - `gobanview show game.sgf` - Print the final main-line position of each game
//! - `gobanview analyze game.sgf --seconds 10` - Analyse the main-line end with the configured engine
//! - `gobanview convert game.sgf --out clean.sgf` - Re-serialize a collection

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use gobanview::config::{self, Config};
use gobanview::engine::{EngineEvent, start_session};
use gobanview::router::route;
use gobanview::sgf::{self, Collection};
use gobanview::tree::{GameTree, NodeId};

/// Gobanview: Go game records and engine analysis
#[derive(Parser)]
#[command(name = "gobanview")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load an SGF file and print the final position of every game
    Show {
        file: PathBuf,
    },
    /// Analyse the last main-line position of a game
    Analyze {
        /// SGF file; an empty board from the config is used when omitted
        file: Option<PathBuf>,
        #[arg(long, default_value = "gobanview.toml")]
        config: PathBuf,
        /// How long to let the engine think
        #[arg(long, default_value_t = 5.0)]
        seconds: f64,
        /// Save the game, with score properties, here afterwards
        #[arg(long)]
        out: Option<PathBuf>,
        /// Number of candidate moves to print
        #[arg(long, default_value_t = 5)]
        top: usize,
    },
    /// Load an SGF file and write it back out normalized
    Convert {
        file: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
}

fn init_tracing(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("gobanview={level}")));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match cli.command {
        Commands::Show { file } => show(&file),
        Commands::Analyze {
            file,
            config: config_path,
            seconds,
            out,
            top,
        } => {
            let config = config::load_from_path(&config_path);
            analyze(file.as_deref(), &config, seconds, out.as_deref(), top)
        }
        Commands::Convert { file, out } => convert(&file, &out),
    }
}

fn load(path: &Path) -> Result<Collection> {
    let buf = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let collection = sgf::load(&buf).with_context(|| format!("failed to parse {}", path.display()))?;
    for e in &collection.errors {
        warn!("{}: skipped a game: {e}", path.display());
    }
    info!(
        "{}: {} game(s), {} rejected",
        path.display(),
        collection.games.len(),
        collection.errors.len()
    );
    Ok(collection)
}

fn show(path: &Path) -> Result<()> {
    let collection = load(path)?;
    for (i, tree) in collection.games.iter().enumerate() {
        let end = tree.main_line_end();
        let board = tree.board(end)?;
        let moves = tree.history(end)?.len() - 1;
        println!(
            "Game {} ({}x{}, komi {}, {} rules), after {} node(s):",
            i + 1,
            board.width(),
            board.height(),
            board.komi,
            board.rules,
            moves
        );
        println!("{board}");
        println!(
            "Captures: black {}, white {}; {} to play\n",
            board.black_captures, board.white_captures, board.active
        );
    }
    Ok(())
}

fn convert(path: &Path, out: &Path) -> Result<()> {
    let collection = load(path)?;
    let mut text = String::new();
    for tree in &collection.games {
        text.push_str(&sgf::serialize(tree)?);
    }
    std::fs::write(out, text).with_context(|| format!("failed to write {}", out.display()))?;
    info!("wrote {}", out.display());
    Ok(())
}

fn analyze(
    path: Option<&Path>,
    config: &Config,
    seconds: f64,
    out: Option<&Path>,
    top: usize,
) -> Result<()> {
    let mut tree = match path {
        Some(path) => match load(path)?.games.into_iter().next() {
            Some(tree) => tree,
            None => bail!("{} holds no games", path.display()),
        },
        None => {
            let a = &config.analysis;
            GameTree::new(a.board_size, a.board_size, a.komi, &a.rules)?
        }
    };
    let node = tree.main_line_end();

    let mut session = start_session(&config.engine);
    if let Some(problem) = session.problem_text() {
        bail!("{problem}");
    }
    session.request_analysis(&tree, node, &config.analysis)?;

    let deadline = Instant::now() + Duration::from_secs_f64(seconds.max(0.0));
    let mut halted = false;
    loop {
        let now = Instant::now();
        if now >= deadline && !halted {
            session.halt();
            halted = true;
        }
        if halted && session.running().is_none() {
            break;
        }
        for event in session.wait(Duration::from_millis(100)) {
            match event {
                EngineEvent::Analysis(result) => {
                    route(&mut tree, node, result);
                }
                EngineEvent::Notice(text) => warn!("{text}"),
                EngineEvent::Version(v) => info!("engine version {v}"),
                EngineEvent::Exited => {
                    if !halted {
                        bail!("engine exited during analysis");
                    }
                    halted = true;
                }
            }
        }
        if !session.is_alive() {
            break;
        }
    }
    session.shutdown();

    report(&tree, node, top)?;
    if let Some(out) = out {
        std::fs::write(out, sgf::serialize(&tree)?)
            .with_context(|| format!("failed to write {}", out.display()))?;
        info!("wrote {}", out.display());
    }
    Ok(())
}

fn report(tree: &GameTree, node: NodeId, top: usize) -> Result<()> {
    let board = tree.board(node)?;
    println!("{board}");
    let Some(result) = tree.node(node)?.analysis().filter(|r| r.is_well_formed()) else {
        println!("No analysis received.");
        return Ok(());
    };
    if let Some(root) = &result.root_info {
        println!(
            "{} visits, Black winrate {:.1}%, Black leads by {:.1}",
            root.visits,
            root.winrate * 100.0,
            root.score_lead
        );
    }
    let mut candidates: Vec<_> = result.move_infos.iter().collect();
    candidates.sort_by_key(|m| m.order);
    for m in candidates.into_iter().take(top) {
        println!(
            "  {:>4}  visits {:>7}  winrate {:5.1}%  lead {:+6.1}  pv {}",
            m.mv,
            m.visits,
            m.winrate * 100.0,
            m.score_lead,
            m.pv.join(" ")
        );
    }
    Ok(())
}
