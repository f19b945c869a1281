//! Integration tests for gobanview
//!
//! These exercise the public API end to end: building game trees by play,
//! loading and saving SGF, building queries and routing results back, and
//! random games checked against the board rules.

use gobanview::analysis::{AnalysisResult, MoveInfo, RootInfo};
use gobanview::board::{Board, Color, Move, MoveError, Point};
use gobanview::config::{AnalysisConfig, EngineSettings, Protocol};
use gobanview::constants::{SCORE_KEY, WINRATE_KEY};
use gobanview::engine::start_session;
use gobanview::query::{QueryBuilder, matches};
use gobanview::router::route;
use gobanview::sgf;
use gobanview::tree::{GameTree, NodeId, TreeError};

// =============================================================================
// Helper functions for setting up test positions
// =============================================================================

/// Play a sequence of GTP vertices (or "pass") from `from`, alternating
/// colors as the tree dictates. Returns the last node.
fn play_sequence(tree: &mut GameTree, from: NodeId, moves: &[&str]) -> NodeId {
    let (w, h) = tree.size().unwrap();
    let mut node = from;
    for mv in moves {
        node = match Move::from_gtp(mv, w, h).unwrap() {
            Move::Play(p) => tree.apply_move(node, p).unwrap(),
            Move::Pass => tree.apply_pass(node).unwrap(),
        };
    }
    node
}

fn new_game(size: u8) -> GameTree {
    GameTree::new(size, size, 7.5, "chinese").unwrap()
}

fn gtp(vertex: &str, size: u8) -> Point {
    Point::from_gtp(vertex, size, size).unwrap()
}

/// Assert two trees have the same properties and child order everywhere.
fn assert_same_tree(a: &GameTree, an: NodeId, b: &GameTree, bn: NodeId) {
    let na = a.node(an).unwrap();
    let nb = b.node(bn).unwrap();
    assert_eq!(na.props(), nb.props(), "properties differ");
    assert_eq!(
        na.children().len(),
        nb.children().len(),
        "child count differs"
    );
    for (&ca, &cb) in na.children().iter().zip(nb.children()) {
        assert_same_tree(a, ca, b, cb);
    }
}

fn result_for(node: NodeId, winrate: f64) -> AnalysisResult {
    AnalysisResult {
        id: format!("{node}:99"),
        move_infos: vec![MoveInfo {
            mv: "C3".into(),
            visits: 100,
            winrate,
            ..MoveInfo::default()
        }],
        root_info: Some(RootInfo {
            visits: 100,
            winrate,
            score_lead: -2.04,
        }),
        ..AnalysisResult::default()
    }
}

// =============================================================================
// Playing through the tree
// =============================================================================

#[test]
fn test_two_moves_and_two_passes() {
    let mut tree = new_game(19);
    let root = tree.root();
    let a = play_sequence(&mut tree, root, &["D4"]);
    let b = play_sequence(&mut tree, a, &["Q16"]);
    let c = play_sequence(&mut tree, b, &["pass"]);
    let d = play_sequence(&mut tree, c, &["pass"]);

    assert_eq!(tree.board(a).unwrap().active, Color::White);
    assert_eq!(tree.board(b).unwrap().active, Color::Black);
    assert_eq!(tree.board(c).unwrap().active, Color::White);

    let board = tree.board(d).unwrap();
    assert_eq!(board.stone_count(), 2, "two stones on the board");
    assert_eq!(board.active, Color::Black);
    assert_eq!(board.black_captures, 0);
    assert_eq!(board.white_captures, 0);
    assert_eq!(board.get(gtp("D4", 19)), Some(Color::Black));
    assert_eq!(board.get(gtp("Q16", 19)), Some(Color::White));
    assert_eq!(tree.history(d).unwrap().len(), 5);
}

#[test]
fn test_surrounded_stone_is_captured() {
    let mut tree = new_game(19);
    let root = tree.root();
    let before = play_sequence(
        &mut tree,
        root,
        &["C4", "D4", "E4", "pass", "D3", "pass"],
    );
    assert_eq!(tree.board(before).unwrap().get(gtp("D4", 19)), Some(Color::White));
    assert_eq!(tree.board(before).unwrap().black_captures, 0);

    let after = play_sequence(&mut tree, before, &["D5"]);
    let board = tree.board(after).unwrap();
    assert_eq!(board.get(gtp("D4", 19)), None, "white stone removed");
    assert_eq!(board.black_captures, 1, "exactly one capture");
    assert_eq!(board.white_captures, 0);
    assert_eq!(board.stone_count(), 4);
}

#[test]
fn test_ko_cannot_be_retaken_at_once() {
    // Black D5 C4 D3 and White E5 F4 E3 leave a ko at D4/E4.
    let mut tree = new_game(9);
    let root = tree.root();
    let node = play_sequence(
        &mut tree,
        root,
        &["D5", "E5", "C4", "F4", "D3", "E3", "H8", "D4"],
    );
    // White D4 sits in atari; Black takes it from E4.
    let take = play_sequence(&mut tree, node, &["E4"]);
    let board = tree.board(take).unwrap();
    assert_eq!(board.get(gtp("D4", 9)), None);
    assert_eq!(board.ko, Some(gtp("D4", 9)));

    assert!(matches!(
        tree.apply_move(take, gtp("D4", 9)),
        Err(TreeError::Illegal(MoveError::Ko))
    ));

    let threat = play_sequence(&mut tree, take, &["A1", "B1"]);
    assert_eq!(tree.board(threat).unwrap().ko, None);
    let retake = tree.apply_move(threat, gtp("D4", 9)).unwrap();
    let board = tree.board(retake).unwrap();
    assert_eq!(board.get(gtp("E4", 9)), None, "white retakes the ko");
    assert_eq!(board.ko, Some(gtp("E4", 9)));
}

#[test]
fn test_occupied_and_suicide_rejected() {
    let mut tree = new_game(9);
    let root = tree.root();
    let node = play_sequence(&mut tree, root, &["B1", "E5", "A2"]);
    assert!(matches!(
        tree.apply_move(node, gtp("B1", 9)),
        Err(TreeError::Illegal(MoveError::Occupied))
    ));
    assert!(matches!(
        tree.apply_move(node, gtp("A1", 9)),
        Err(TreeError::Illegal(MoveError::Suicide))
    ));
    // the refused moves left no children behind
    assert!(tree.children(node).unwrap().is_empty());
}

// =============================================================================
// SGF
// =============================================================================

#[test]
fn test_sibling_games_have_independent_boards() {
    let collection = sgf::load(b"(;SZ[9];B[ee];W[ag])(;SZ[9];B[cc])").unwrap();
    assert_eq!(collection.games.len(), 2);
    assert!(collection.errors.is_empty());

    let first = &collection.games[0];
    let second = &collection.games[1];
    assert_ne!(first.root(), second.root());

    let a = first.board(first.main_line_end()).unwrap();
    let b = second.board(second.main_line_end()).unwrap();
    assert_eq!((a.width(), a.height()), (9, 9));
    assert_eq!((b.width(), b.height()), (9, 9));
    assert_eq!(a.stone_count(), 2);
    assert_eq!(b.stone_count(), 1);
    assert_eq!(b.get(Point::new(2, 2)), Some(Color::Black));
    assert_eq!(b.get(Point::new(4, 4)), None);
}

#[test]
fn test_round_trip_with_variations() {
    let text = br#"(;GM[1]FF[4]SZ[13]KM[6.5]RU[Japanese]PB[Black \] player]C[a\\b]
        ;B[dd];W[jj](;B[dj];W[jd])(;B[jd]C[variation];W[dj])(;B[gg]))"#;
    let original = sgf::load(text).unwrap().games.remove(0);
    let written = sgf::serialize(&original).unwrap();
    let reread = sgf::load(written.as_bytes()).unwrap().games.remove(0);
    assert_same_tree(&original, original.root(), &reread, reread.root());

    let root = reread.node(reread.root()).unwrap();
    assert_eq!(root.get("PB"), Some("Black ] player"));
    assert_eq!(root.get("C"), Some("a\\b"));
    let end = reread.main_line_end();
    assert_eq!(reread.board(end).unwrap().stone_count(), 4);
    assert_eq!(reread.board(end).unwrap().rules, "Japanese");
}

#[test]
fn test_bad_trailing_game_is_reported() {
    let collection = sgf::load(b"(;SZ[9];B[aa])(;SZ[9];B[bb]]").unwrap();
    assert_eq!(collection.games.len(), 1);
    assert_eq!(collection.errors.len(), 1);
    assert!(sgf::load(b"]").is_err());
}

#[test]
fn test_analysis_survives_as_properties() {
    let mut tree = new_game(9);
    let root = tree.root();
    let node = play_sequence(&mut tree, root, &["E5", "C3"]);
    assert_eq!(route(&mut tree, node, result_for(node, 0.625)), Some(node));

    let text = sgf::serialize(&tree).unwrap();
    let reread = sgf::load(text.as_bytes()).unwrap().games.remove(0);
    let end = reread.node(reread.main_line_end()).unwrap();
    assert_eq!(end.get(WINRATE_KEY), Some("62.50"));
    assert_eq!(end.get(SCORE_KEY), Some("-2.0"));
    assert!(end.analysis().is_none(), "full analysis is not saved");
}

// =============================================================================
// Queries and routing
// =============================================================================

#[test]
fn test_query_matches_its_base_everywhere() {
    let mut tree = new_game(19);
    let root = tree.root();
    let end = play_sequence(&mut tree, root, &["D4", "Q16", "D16", "pass", "Q4"]);
    let config = AnalysisConfig::default();
    let mut builder = QueryBuilder::new();

    for node in tree.history(end).unwrap() {
        let full = builder.full_query(&tree, node, &config).unwrap();
        let base = builder.base_query(&tree, node, &config).unwrap();
        assert!(matches(&full, &base), "query for {node} should match its base");

        let changed = AnalysisConfig {
            wide_root_noise: 0.02,
            ..config.clone()
        };
        assert!(!matches(&full, &builder.base_query(&tree, node, &changed).unwrap()));
    }

    let full = builder.full_query(&tree, end, &config).unwrap();
    assert_eq!(full.moves.len(), 5);
    assert_eq!(full.moves[3], (Color::White, Move::Pass));
    assert_eq!(full.to_move, Color::White);
}

#[test]
fn test_route_follows_navigation() {
    let mut tree = new_game(9);
    let root = tree.root();
    let a = play_sequence(&mut tree, root, &["E5"]);
    let b = play_sequence(&mut tree, a, &["C3"]);
    let c = play_sequence(&mut tree, b, &["G7"]);

    // result for b arrives after stepping forward to c
    assert_eq!(route(&mut tree, c, result_for(b, 0.5)), Some(b));
    // result for c arrives after stepping back to b
    assert_eq!(route(&mut tree, b, result_for(c, 0.5)), Some(c));
    // result for the root is too far away from c
    assert_eq!(route(&mut tree, c, result_for(root, 0.5)), None);
    assert!(tree.has_valid_analysis(b));
    assert!(tree.has_valid_analysis(c));
    assert!(!tree.has_valid_analysis(root));
}

// =============================================================================
// Engine sessions
// =============================================================================

#[test]
fn test_unconfigured_engine_is_inert() {
    for protocol in [Protocol::Analysis, Protocol::Gtp] {
        let settings = EngineSettings {
            protocol,
            ..EngineSettings::default()
        };
        let mut session = start_session(&settings);
        assert!(!session.is_alive());
        assert!(session.problem_text().is_some());

        let tree = new_game(9);
        session
            .request_analysis(&tree, tree.root(), &AnalysisConfig::default())
            .unwrap();
        assert!(session.running().is_none());
        assert!(session.desired().is_none());
        assert!(session.poll().is_empty());
        session.halt();
        session.shutdown();
    }
}

// =============================================================================
// Random games
// =============================================================================

/// Play random legal moves, checking the rules after every one.
fn random_game(seed: u64, size: u8, moves: usize) -> (GameTree, NodeId) {
    let mut rng = fastrand::Rng::with_seed(seed);
    let mut tree = new_game(size);
    let mut node = tree.root();
    let mut shadow = Board::new(size, size, 7.5, "chinese");

    for _ in 0..moves {
        let board = tree.board(node).unwrap().clone();
        let color = board.active;
        let p = Point::new(rng.u8(0..size), rng.u8(0..size));

        if let Some(ko) = board.ko {
            assert!(!board.is_legal(ko, color), "ko point must be illegal");
        }
        if board.get(p).is_some() {
            assert_eq!(board.legality(p, color), Err(MoveError::Occupied));
        }

        if board.is_legal(p, color) {
            node = tree.apply_move(node, p).unwrap();
            shadow.play(Move::Play(p), color);
            let after = tree.board(node).unwrap();
            assert_eq!(after.get(p), Some(color), "played stone stays");
            assert!(after.has_liberties(p), "played group has liberties");
        } else {
            assert!(tree.apply_move(node, p).is_err());
            if rng.u8(0..10) == 0 {
                node = tree.apply_pass(node).unwrap();
                shadow.play(Move::Pass, color);
            }
        }
        let derived = tree.board(node).unwrap();
        assert_eq!(derived.to_string(), shadow.to_string());
        assert_eq!(derived.black_captures, shadow.black_captures);
        assert_eq!(derived.white_captures, shadow.white_captures);
    }
    (tree, node)
}

#[test]
fn test_random_games_follow_the_rules() {
    for seed in 0..8 {
        random_game(seed, 7, 300);
    }
    random_game(99, 19, 400);
}

#[test]
fn test_random_games_round_trip() {
    for seed in 0..5 {
        let (mut tree, end) = random_game(seed + 100, 9, 120);
        // branch off a few variations
        let mut rng = fastrand::Rng::with_seed(seed);
        let line = tree.history(end).unwrap();
        for _ in 0..4 {
            let from = line[rng.usize(0..line.len())];
            let board = tree.board(from).unwrap().clone();
            let free: Vec<Point> = (0..9)
                .flat_map(|x| (0..9).map(move |y| Point::new(x, y)))
                .filter(|&p| board.is_legal(p, board.active))
                .collect();
            if !free.is_empty() {
                tree.apply_move(from, free[rng.usize(0..free.len())]).unwrap();
            }
        }

        let text = sgf::serialize(&tree).unwrap();
        let reread = sgf::load(text.as_bytes()).unwrap().games.remove(0);
        assert_same_tree(&tree, tree.root(), &reread, reread.root());
        assert!(tree.contains(end));
        assert_eq!(
            tree.board(tree.main_line_end()).unwrap().to_string(),
            reread.board(reread.main_line_end()).unwrap().to_string()
        );
    }
}
