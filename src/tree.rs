//! Game tree of SGF property-bag nodes.
//!
//! Nodes live in an arena owned by [`GameTree`] and are addressed by
//! [`NodeId`]s, which are unique across every tree in the process so that
//! an id embedded in an engine query can never be confused with a node of
//! another game. Each node keeps its properties in file order and derives
//! its [`Board`] lazily from its parent's board plus its own properties;
//! once derived, the board is cached until the node is destroyed.

use std::cell::OnceCell;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::analysis::AnalysisResult;
use crate::board::{Board, Color, Move, MoveError, Point};
use crate::constants::{BOARD_KEYS, DEFAULT_KOMI, DEFAULT_RULES, DEFAULT_SIZE, SCORE_KEY, WINRATE_KEY};

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identifier of a node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    fn fresh() -> Self {
        NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(NodeId)
    }
}

/// Misuse of the tree API.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeError {
    /// Id does not name a node of this tree
    UnknownNode(NodeId),
    /// The root cannot be detached
    DetachRoot,
    /// A board-affecting property was edited after the board was derived
    BoardFrozen { node: NodeId, key: String },
    /// Property keys are non-empty runs of uppercase letters
    BadKey(String),
    /// `SZ` is missing a usable value
    BadSize(String),
    /// Interactive move refused by the rules
    Illegal(MoveError),
}

impl fmt::Display for TreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeError::UnknownNode(id) => write!(f, "no node with id {id}"),
            TreeError::DetachRoot => write!(f, "the root node cannot be detached"),
            TreeError::BoardFrozen { node, key } => {
                write!(f, "cannot set {key} on node {node}: its board was already derived")
            }
            TreeError::BadKey(key) => write!(f, "invalid property key {key:?}"),
            TreeError::BadSize(sz) => write!(f, "unsupported board size {sz:?}"),
            TreeError::Illegal(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for TreeError {}

impl From<MoveError> for TreeError {
    fn from(e: MoveError) -> Self {
        TreeError::Illegal(e)
    }
}

/// One node of the tree.
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    props: Vec<(String, Vec<String>)>,
    board: OnceCell<Board>,
    analysis: Option<AnalysisResult>,
    depth: usize,
}

impl Node {
    fn new(parent: Option<NodeId>, depth: usize) -> Self {
        Self {
            id: NodeId::fresh(),
            parent,
            children: Vec::new(),
            props: Vec::new(),
            board: OnceCell::new(),
            analysis: None,
            depth,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Properties in insertion order.
    pub fn props(&self) -> &[(String, Vec<String>)] {
        &self.props
    }

    pub fn values(&self, key: &str) -> &[String] {
        self.props
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
            .unwrap_or(&[])
    }

    /// First value of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values(key).first().map(String::as_str)
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.props.iter().any(|(k, _)| k == key)
    }

    pub fn analysis(&self) -> Option<&AnalysisResult> {
        self.analysis.as_ref()
    }

    /// Carries `AB`, `AW`, `AE` or `PL`.
    pub fn has_setup_properties(&self) -> bool {
        ["AB", "AW", "AE", "PL"].iter().any(|k| self.has_key(k))
    }
}

fn valid_key(key: &str) -> bool {
    !key.is_empty() && key.bytes().all(|b| b.is_ascii_uppercase())
}

/// Parse an `SZ` value: `19` or `19:13`.
pub fn parse_size(value: &str) -> Option<(u8, u8)> {
    let (w, h) = match value.split_once(':') {
        Some((w, h)) => (w.trim().parse().ok()?, h.trim().parse().ok()?),
        None => {
            let n = value.trim().parse().ok()?;
            (n, n)
        }
    };
    Board::valid_size(w, h).then_some((w, h))
}

/// Expand an SGF point list value, which may be a single point or a
/// compressed rectangle such as `aa:cc`.
fn point_list(value: &str, width: u8, height: u8) -> Vec<Point> {
    if let Some((a, b)) = value.split_once(':') {
        let (Some(a), Some(b)) = (Point::from_sgf(a, width, height), Point::from_sgf(b, width, height))
        else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for y in a.y.min(b.y)..=a.y.max(b.y) {
            for x in a.x.min(b.x)..=a.x.max(b.x) {
                out.push(Point::new(x, y));
            }
        }
        return out;
    }
    Point::from_sgf(value, width, height).into_iter().collect()
}

/// An arena-backed game tree.
#[derive(Debug)]
pub struct GameTree {
    nodes: HashMap<NodeId, Node>,
    root: NodeId,
}

impl GameTree {
    /// A tree with a single property-less root (19x19 when derived).
    pub fn bare() -> Self {
        let root = Node::new(None, 0);
        let id = root.id;
        let mut nodes = HashMap::new();
        nodes.insert(id, root);
        Self { nodes, root: id }
    }

    /// A new game with size, komi and rules recorded on the root.
    pub fn new(width: u8, height: u8, komi: f64, rules: &str) -> Result<Self, TreeError> {
        if !Board::valid_size(width, height) {
            return Err(TreeError::BadSize(format!("{width}:{height}")));
        }
        let mut tree = Self::bare();
        let root = tree.root;
        let sz = if width == height {
            width.to_string()
        } else {
            format!("{width}:{height}")
        };
        tree.set_property(root, "GM", "1")?;
        tree.set_property(root, "FF", "4")?;
        tree.set_property(root, "SZ", &sz)?;
        tree.set_property(root, "KM", &komi.to_string())?;
        tree.set_property(root, "RU", rules)?;
        Ok(tree)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Result<&Node, TreeError> {
        self.nodes.get(&id).ok_or(TreeError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, TreeError> {
        self.nodes.get_mut(&id).ok_or(TreeError::UnknownNode(id))
    }

    /// Board dimensions from the root's `SZ` (19x19 when absent).
    pub fn size(&self) -> Result<(u8, u8), TreeError> {
        match self.node(self.root)?.get("SZ") {
            None => Ok((DEFAULT_SIZE, DEFAULT_SIZE)),
            Some(sz) => parse_size(sz).ok_or_else(|| TreeError::BadSize(sz.to_string())),
        }
    }

    // -------------------------------------------------------------------------
    // Properties
    // -------------------------------------------------------------------------

    fn check_editable(&self, id: NodeId, key: &str) -> Result<(), TreeError> {
        if !valid_key(key) {
            return Err(TreeError::BadKey(key.to_string()));
        }
        let node = self.node(id)?;
        if node.board.get().is_some() && BOARD_KEYS.contains(&key) {
            return Err(TreeError::BoardFrozen {
                node: id,
                key: key.to_string(),
            });
        }
        Ok(())
    }

    /// Replace every value of `key` with `value`.
    pub fn set_property(&mut self, id: NodeId, key: &str, value: &str) -> Result<(), TreeError> {
        self.check_editable(id, key)?;
        let node = self.node_mut(id)?;
        match node.props.iter_mut().find(|(k, _)| k == key) {
            Some((_, values)) => *values = vec![value.to_string()],
            None => node.props.push((key.to_string(), vec![value.to_string()])),
        }
        Ok(())
    }

    /// Append `value` to the values of `key`, creating the key if needed.
    pub fn add_value(&mut self, id: NodeId, key: &str, value: &str) -> Result<(), TreeError> {
        self.check_editable(id, key)?;
        let node = self.node_mut(id)?;
        match node.props.iter_mut().find(|(k, _)| k == key) {
            Some((_, values)) => values.push(value.to_string()),
            None => node.props.push((key.to_string(), vec![value.to_string()])),
        }
        Ok(())
    }

    pub fn delete_property(&mut self, id: NodeId, key: &str) -> Result<(), TreeError> {
        self.check_editable(id, key)?;
        self.node_mut(id)?.props.retain(|(k, _)| k != key);
        Ok(())
    }

    /// The move recorded on a node, if any. `B` wins if both are present.
    pub fn move_of(&self, id: NodeId) -> Result<Option<(Color, Move)>, TreeError> {
        let node = self.node(id)?;
        let (w, h) = self.size()?;
        Ok(Self::recorded_move(node, w, h))
    }

    fn recorded_move(node: &Node, w: u8, h: u8) -> Option<(Color, Move)> {
        [Color::Black, Color::White]
            .into_iter()
            .find_map(|color| node.get(color.letter()).map(|v| (color, Move::from_sgf(v, w, h))))
    }

    // -------------------------------------------------------------------------
    // Boards
    // -------------------------------------------------------------------------

    /// The position at `id`, derived on first use and cached afterwards.
    pub fn board(&self, id: NodeId) -> Result<&Board, TreeError> {
        let mut pending = Vec::new();
        let mut cur = id;
        loop {
            let node = self.node(cur)?;
            if node.board.get().is_some() {
                break;
            }
            pending.push(cur);
            match node.parent {
                Some(p) => cur = p,
                None => break,
            }
        }

        let size = if pending.is_empty() { None } else { Some(self.size()?) };
        for &nid in pending.iter().rev() {
            let node = self.node(nid)?;
            let mut board = match node.parent {
                Some(p) => self.cached_board(p)?.clone(),
                None => {
                    let (w, h) = size.ok_or(TreeError::UnknownNode(nid))?;
                    Board::new(w, h, DEFAULT_KOMI, DEFAULT_RULES)
                }
            };
            Self::apply_properties(node, &mut board);
            let _ = node.board.set(board);
        }
        self.cached_board(id)
    }

    fn cached_board(&self, id: NodeId) -> Result<&Board, TreeError> {
        self.node(id)?.board.get().ok_or(TreeError::UnknownNode(id))
    }

    fn apply_properties(node: &Node, board: &mut Board) {
        let (w, h) = (board.width(), board.height());
        let mut setup = false;
        for (key, stone) in [("AB", Some(Color::Black)), ("AW", Some(Color::White)), ("AE", None)] {
            for value in node.values(key) {
                for p in point_list(value, w, h) {
                    board.set(p, stone);
                    setup = true;
                }
            }
        }
        if setup {
            board.ko = None;
        }
        if let Some((color, mv)) = Self::recorded_move(node, w, h) {
            board.play(mv, color);
        }
        if let Some(pl) = node.get("PL").and_then(Color::from_letter) {
            board.active = pl;
        }
        if let Some(km) = node.get("KM").and_then(|v| v.trim().parse().ok()) {
            board.komi = km;
        }
        if let Some(ru) = node.get("RU") {
            board.rules = ru.to_string();
        }
    }

    // -------------------------------------------------------------------------
    // Growth
    // -------------------------------------------------------------------------

    /// Append an empty child to `parent`.
    pub fn new_child(&mut self, parent: NodeId) -> Result<NodeId, TreeError> {
        let depth = self.node(parent)?.depth + 1;
        let child = Node::new(Some(parent), depth);
        let id = child.id;
        self.nodes.insert(id, child);
        self.node_mut(parent)?.children.push(id);
        Ok(id)
    }

    fn find_child_with_move(&self, id: NodeId, color: Color, mv: Move) -> Result<Option<NodeId>, TreeError> {
        for &child in &self.node(id)?.children {
            if self.move_of(child)? == Some((color, mv)) {
                return Ok(Some(child));
            }
        }
        Ok(None)
    }

    /// Play `p` for the side to move. Reuses an existing child with the
    /// same move, otherwise appends a new one.
    pub fn apply_move(&mut self, id: NodeId, p: Point) -> Result<NodeId, TreeError> {
        let board = self.board(id)?;
        let color = board.active;
        board.legality(p, color)?;
        self.replay_move(id, color, Move::Play(p))
    }

    /// Pass for the side to move, reusing an existing pass child.
    pub fn apply_pass(&mut self, id: NodeId) -> Result<NodeId, TreeError> {
        let color = self.board(id)?.active;
        self.replay_move(id, color, Move::Pass)
    }

    /// Record a move as a child without any legality check.
    pub fn replay_move(&mut self, id: NodeId, color: Color, mv: Move) -> Result<NodeId, TreeError> {
        if let Some(existing) = self.find_child_with_move(id, color, mv)? {
            return Ok(existing);
        }
        let child = self.new_child(id)?;
        self.set_property(child, color.letter(), &mv.to_sgf())?;
        Ok(child)
    }

    // -------------------------------------------------------------------------
    // Removal
    // -------------------------------------------------------------------------

    /// Remove `id` and its subtree. Returns the parent and every removed
    /// id, so that bookmarks and pending queries on them can be dropped.
    pub fn detach(&mut self, id: NodeId) -> Result<(NodeId, Vec<NodeId>), TreeError> {
        let parent = self.node(id)?.parent.ok_or(TreeError::DetachRoot)?;
        self.node_mut(parent)?.children.retain(|&c| c != id);
        Ok((parent, self.destroy(id)))
    }

    /// Drop every child of the root and all of the root's properties. The
    /// root is replaced by a fresh node (with a new id) so that no cached
    /// board survives. Returns the new root and the removed ids, old root
    /// included.
    pub fn reset_root(&mut self) -> (NodeId, Vec<NodeId>) {
        let removed = self.destroy(self.root);
        let root = Node::new(None, 0);
        self.root = root.id;
        self.nodes.insert(root.id, root);
        (self.root, removed)
    }

    /// Nearest ancestor-or-self value of `key`.
    pub fn inherited(&self, id: NodeId, key: &str) -> Result<Option<&str>, TreeError> {
        let mut cur = Some(id);
        while let Some(n) = cur {
            let node = self.node(n)?;
            if let Some(v) = node.get(key) {
                return Ok(Some(v));
            }
            cur = node.parent;
        }
        Ok(None)
    }

    fn destroy(&mut self, id: NodeId) -> Vec<NodeId> {
        let mut removed = Vec::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            if let Some(node) = self.nodes.remove(&cur) {
                stack.extend(node.children);
                removed.push(cur);
            }
        }
        removed
    }

    // -------------------------------------------------------------------------
    // Navigation
    // -------------------------------------------------------------------------

    pub fn parent(&self, id: NodeId) -> Result<Option<NodeId>, TreeError> {
        Ok(self.node(id)?.parent)
    }

    pub fn children(&self, id: NodeId) -> Result<&[NodeId], TreeError> {
        Ok(&self.node(id)?.children)
    }

    /// Previous node, or `id` itself at the root.
    pub fn previous(&self, id: NodeId) -> Result<NodeId, TreeError> {
        Ok(self.node(id)?.parent.unwrap_or(id))
    }

    /// Main-line child, or `id` itself at a leaf.
    pub fn next(&self, id: NodeId) -> Result<NodeId, TreeError> {
        Ok(self.node(id)?.children.first().copied().unwrap_or(id))
    }

    /// Follow main-line children from `id` to a leaf.
    pub fn end(&self, id: NodeId) -> Result<NodeId, TreeError> {
        let mut cur = id;
        while let Some(&first) = self.node(cur)?.children.first() {
            cur = first;
        }
        Ok(cur)
    }

    pub fn main_line_end(&self) -> NodeId {
        self.end(self.root).unwrap_or(self.root)
    }

    /// Path from the root to `id`, inclusive.
    pub fn history(&self, id: NodeId) -> Result<Vec<NodeId>, TreeError> {
        let mut path = vec![id];
        let mut cur = id;
        while let Some(p) = self.node(cur)?.parent {
            path.push(p);
            cur = p;
        }
        path.reverse();
        Ok(path)
    }

    fn is_first_child(&self, id: NodeId) -> Result<bool, TreeError> {
        Ok(match self.node(id)?.parent {
            None => true,
            Some(p) => self.node(p)?.children.first() == Some(&id),
        })
    }

    /// Whether every ancestor-or-self is its parent's first child.
    pub fn is_main_line(&self, id: NodeId) -> Result<bool, TreeError> {
        for n in self.history(id)? {
            if !self.is_first_child(n)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Nearest ancestor-or-self lying on the main line.
    pub fn return_to_main_line(&self, id: NodeId) -> Result<NodeId, TreeError> {
        let path = self.history(id)?;
        for (i, &n) in path.iter().enumerate() {
            if !self.is_first_child(n)? {
                return Ok(path[i - 1]);
            }
        }
        Ok(id)
    }

    /// Sibling `delta` places away, wrapping around. Returns `id` when it
    /// has no siblings.
    pub fn sibling(&self, id: NodeId, delta: isize) -> Result<NodeId, TreeError> {
        let Some(parent) = self.node(id)?.parent else {
            return Ok(id);
        };
        let siblings = &self.node(parent)?.children;
        let n = siblings.len() as isize;
        let i = siblings.iter().position(|&c| c == id).unwrap_or(0) as isize;
        Ok(siblings[(i + delta).rem_euclid(n) as usize])
    }

    /// Move the nearest ancestor-or-self that is not a first child one
    /// step earlier among its siblings.
    pub fn promote(&mut self, id: NodeId) -> Result<(), TreeError> {
        for n in self.history(id)?.into_iter().rev() {
            let Some(parent) = self.node(n)?.parent else {
                break;
            };
            let children = &mut self.node_mut(parent)?.children;
            let i = children.iter().position(|&c| c == n).unwrap_or(0);
            if i > 0 {
                children.swap(i, i - 1);
                return Ok(());
            }
        }
        Ok(())
    }

    /// Make `id` part of the main line by moving it and every ancestor to
    /// the front of its parent's children.
    pub fn promote_to_main_line(&mut self, id: NodeId) -> Result<(), TreeError> {
        for n in self.history(id)? {
            let Some(parent) = self.node(n)?.parent else {
                continue;
            };
            let children = &mut self.node_mut(parent)?.children;
            if let Some(i) = children.iter().position(|&c| c == n) {
                let moved = children.remove(i);
                children.insert(0, moved);
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Analysis
    // -------------------------------------------------------------------------

    /// Attach an engine result. Well-formed results also leave a compact
    /// winrate/score record in the node's properties.
    pub fn receive_analysis(&mut self, id: NodeId, result: AnalysisResult) -> Result<(), TreeError> {
        if let Some(root) = result.root_info.as_ref().filter(|_| result.is_well_formed()) {
            let winrate = format!("{:.2}", root.winrate * 100.0);
            let score = format!("{:.1}", root.score_lead);
            self.set_property(id, WINRATE_KEY, &winrate)?;
            self.set_property(id, SCORE_KEY, &score)?;
        }
        self.node_mut(id)?.analysis = Some(result);
        Ok(())
    }

    pub fn has_valid_analysis(&self, id: NodeId) -> bool {
        self.nodes
            .get(&id)
            .and_then(|n| n.analysis.as_ref())
            .is_some_and(AnalysisResult::is_well_formed)
    }

    /// Drop cached analysis everywhere in the tree.
    pub fn forget_analysis(&mut self) {
        for node in self.nodes.values_mut() {
            node.analysis = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree19() -> GameTree {
        GameTree::new(19, 19, 7.5, "chinese").unwrap()
    }

    fn gtp(s: &str) -> Point {
        Point::from_gtp(s, 19, 19).unwrap()
    }

    #[test]
    fn test_scenario_two_moves_two_passes() {
        let mut t = tree19();
        let mut n = t.root();
        n = t.apply_move(n, gtp("D4")).unwrap();
        assert_eq!(t.board(n).unwrap().active, Color::White);
        n = t.apply_move(n, gtp("Q16")).unwrap();
        assert_eq!(t.board(n).unwrap().active, Color::Black);
        n = t.apply_pass(n).unwrap();
        assert_eq!(t.board(n).unwrap().active, Color::White);
        n = t.apply_pass(n).unwrap();

        let b = t.board(n).unwrap();
        assert_eq!(b.stone_count(), 2);
        assert_eq!(b.active, Color::Black);
        assert_eq!(b.black_captures + b.white_captures, 0);
        assert_eq!(t.node(n).unwrap().depth(), 4);
    }

    #[test]
    fn test_apply_move_reuses_child() {
        let mut t = tree19();
        let root = t.root();
        let a = t.apply_move(root, gtp("D4")).unwrap();
        let b = t.apply_move(root, gtp("D4")).unwrap();
        assert_eq!(a, b);
        assert_eq!(t.children(root).unwrap().len(), 1);
        let p1 = t.apply_pass(root).unwrap();
        let p2 = t.apply_pass(root).unwrap();
        assert_eq!(p1, p2);
        assert_eq!(t.children(root).unwrap(), &[a, p1]);
    }

    #[test]
    fn test_apply_move_rejects_occupied() {
        let mut t = tree19();
        let n = t.apply_move(t.root(), gtp("D4")).unwrap();
        assert_eq!(
            t.apply_move(n, gtp("D4")),
            Err(TreeError::Illegal(MoveError::Occupied))
        );
    }

    #[test]
    fn test_board_property_frozen_after_derivation() {
        let mut t = tree19();
        let n = t.apply_move(t.root(), gtp("D4")).unwrap();
        t.board(n).unwrap();
        assert!(matches!(
            t.set_property(n, "B", "aa"),
            Err(TreeError::BoardFrozen { .. })
        ));
        t.set_property(n, "C", "a comment").unwrap();
        assert_eq!(t.node(n).unwrap().get("C"), Some("a comment"));
    }

    #[test]
    fn test_setup_order_and_player_override() {
        let mut t = GameTree::new(9, 9, 6.5, "japanese").unwrap();
        let root = t.root();
        t.add_value(root, "AB", "aa").unwrap();
        t.add_value(root, "AB", "bb").unwrap();
        t.add_value(root, "AW", "bb").unwrap();
        t.add_value(root, "AE", "aa").unwrap();
        t.set_property(root, "PL", "W").unwrap();
        let b = t.board(root).unwrap();
        assert_eq!(b.get(Point::new(0, 0)), None);
        assert_eq!(b.get(Point::new(1, 1)), Some(Color::White));
        assert_eq!(b.active, Color::White);
        assert_eq!(b.komi, 6.5);
        assert_eq!(b.rules, "japanese");
    }

    #[test]
    fn test_node_with_both_moves_plays_black_only() {
        let mut t = GameTree::new(9, 9, 7.5, "chinese").unwrap();
        let n = t.new_child(t.root()).unwrap();
        t.set_property(n, "B", "cc").unwrap();
        t.set_property(n, "W", "dd").unwrap();
        assert_eq!(
            t.move_of(n),
            Ok(Some((Color::Black, Move::Play(Point::new(2, 2)))))
        );
        let b = t.board(n).unwrap();
        assert_eq!(b.get(Point::new(2, 2)), Some(Color::Black));
        assert_eq!(b.get(Point::new(3, 3)), None);
        assert_eq!(b.active, Color::White);
    }

    #[test]
    fn test_inherited_property() {
        let mut t = GameTree::bare();
        let root = t.root();
        let a = t.new_child(root).unwrap();
        assert_eq!(t.inherited(a, "KM"), Ok(None));
        t.set_property(root, "KM", "6.5").unwrap();
        assert_eq!(t.inherited(a, "KM"), Ok(Some("6.5")));
    }

    #[test]
    fn test_compressed_point_list() {
        let mut t = GameTree::new(9, 9, 7.5, "chinese").unwrap();
        let root = t.root();
        t.add_value(root, "AB", "aa:cb").unwrap();
        assert_eq!(t.board(root).unwrap().stone_count(), 6);
    }

    #[test]
    fn test_rectangular_size() {
        let mut t = GameTree::bare();
        t.set_property(t.root(), "SZ", "13:7").unwrap();
        let b = t.board(t.root()).unwrap();
        assert_eq!((b.width(), b.height()), (13, 7));
        assert_eq!(parse_size("26"), None);
    }

    #[test]
    fn test_detach_destroys_subtree() {
        let mut t = tree19();
        let root = t.root();
        let a = t.apply_move(root, gtp("D4")).unwrap();
        let b = t.apply_move(a, gtp("Q16")).unwrap();
        let c = t.apply_move(b, gtp("D16")).unwrap();
        t.board(c).unwrap();
        let (parent, mut removed) = t.detach(a).unwrap();
        assert_eq!(parent, root);
        removed.sort();
        let mut expected = vec![a, b, c];
        expected.sort();
        assert_eq!(removed, expected);
        assert!(!t.contains(a) && !t.contains(b) && !t.contains(c));
        assert!(t.children(root).unwrap().is_empty());
        assert_eq!(t.detach(root), Err(TreeError::DetachRoot));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_reset_root() {
        let mut t = tree19();
        let old = t.root();
        let a = t.apply_move(old, gtp("D4")).unwrap();
        let (new, removed) = t.reset_root();
        assert_ne!(old, new);
        assert_eq!(removed.len(), 2);
        assert!(removed.contains(&old) && removed.contains(&a));
        assert_eq!(t.len(), 1);
        assert!(t.node(new).unwrap().props().is_empty());
    }

    #[test]
    fn test_navigation_and_promotion() {
        let mut t = tree19();
        let root = t.root();
        let a = t.apply_move(root, gtp("D4")).unwrap();
        let b = t.apply_move(root, gtp("Q16")).unwrap();
        let c = t.apply_move(root, gtp("C3")).unwrap();
        let b2 = t.apply_move(b, gtp("D16")).unwrap();

        assert_eq!(t.next(root), Ok(a));
        assert_eq!(t.previous(a), Ok(root));
        assert_eq!(t.sibling(a, 1), Ok(b));
        assert_eq!(t.sibling(a, -1), Ok(c));
        assert_eq!(t.sibling(c, 1), Ok(a));
        assert_eq!(t.end(root), Ok(a));
        assert_eq!(t.is_main_line(b2), Ok(false));
        assert_eq!(t.return_to_main_line(b2), Ok(root));

        t.promote(b2).unwrap();
        assert_eq!(t.children(root).unwrap(), &[b, a, c]);
        assert_eq!(t.is_main_line(b2), Ok(true));
        assert_eq!(t.main_line_end(), b2);

        t.promote_to_main_line(c).unwrap();
        assert_eq!(t.children(root).unwrap(), &[c, b, a]);
    }

    #[test]
    fn test_ids_unique_across_trees() {
        let a = GameTree::bare();
        let b = GameTree::bare();
        assert_ne!(a.root(), b.root());
        assert_eq!(a.root().to_string().parse::<NodeId>(), Ok(a.root()));
    }
}
