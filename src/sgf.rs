//! SGF reading and writing.
//!
//! The reader is a single pass over raw bytes with three states: before
//! the opening `(`, between values (expecting a key, a node marker or a
//! bracket) and inside a `[...]` value. Nested variations are tracked with
//! an explicit stack, so deeply nested records cannot overflow the call
//! stack. A buffer may hold several games one after another; see
//! [`load`].

use std::fmt;

use crate::tree::{GameTree, NodeId, TreeError};

/// Why a game could not be read.
#[derive(Debug, Clone, PartialEq)]
pub enum SgfError {
    /// Input held no `(` at all
    NoTree,
    /// A byte that makes no sense where it appeared
    UnexpectedByte { offset: usize, byte: u8 },
    /// `]` outside of any value, with no node to attach it to
    CloseWithoutNode { offset: usize },
    /// `(` before any node of the enclosing tree
    SubtreeWithoutNode { offset: usize },
    /// `[` with no property key before it
    ValueWithoutKey { offset: usize },
    /// A second value for a node's `B` or `W`
    DuplicateMove { offset: usize, key: String },
    /// Input ended inside a game
    UnexpectedEnd,
    /// The root's `SZ` is unusable
    BadSize(String),
    /// Every game in the buffer failed
    NoGames(Box<SgfError>),
    Tree(TreeError),
}

impl fmt::Display for SgfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SgfError::NoTree => write!(f, "no SGF tree found"),
            SgfError::UnexpectedByte { offset, byte } => {
                write!(f, "unexpected byte {:?} at offset {offset}", *byte as char)
            }
            SgfError::CloseWithoutNode { offset } => {
                write!(f, "value terminator with no open node at offset {offset}")
            }
            SgfError::SubtreeWithoutNode { offset } => {
                write!(f, "variation started before any node at offset {offset}")
            }
            SgfError::ValueWithoutKey { offset } => {
                write!(f, "property value without a key at offset {offset}")
            }
            SgfError::DuplicateMove { offset, key } => {
                write!(f, "second {key} move on one node at offset {offset}")
            }
            SgfError::UnexpectedEnd => write!(f, "input ended inside a game"),
            SgfError::BadSize(sz) => write!(f, "unsupported board size {sz:?}"),
            SgfError::NoGames(first) => write!(f, "no game could be loaded: {first}"),
            SgfError::Tree(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SgfError {}

impl From<TreeError> for SgfError {
    fn from(e: TreeError) -> Self {
        match e {
            TreeError::BadSize(sz) => SgfError::BadSize(sz),
            other => SgfError::Tree(other),
        }
    }
}

/// Games read from one buffer.
#[derive(Debug)]
pub struct Collection {
    pub games: Vec<GameTree>,
    /// Failures after the first good game; the games they belong to (and
    /// anything after them) were dropped
    pub errors: Vec<SgfError>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    BeforeTree,
    ExpectingKey,
    InsideValue,
}

struct Reader<'a> {
    buf: &'a [u8],
    tree: Option<GameTree>,
    node: Option<NodeId>,
    key: String,
    key_complete: bool,
    value: Vec<u8>,
    stack: Vec<NodeId>,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            tree: None,
            node: None,
            key: String::new(),
            key_complete: false,
            value: Vec::new(),
            stack: Vec::new(),
        }
    }

    /// Start a node: the tree's root if there is none yet, otherwise a
    /// child of the current node.
    fn open_node(&mut self) -> Result<(), SgfError> {
        let tree = self.tree.get_or_insert_with(GameTree::bare);
        let id = match self.node {
            Some(parent) => tree.new_child(parent)?,
            None => tree.root(),
        };
        self.node = Some(id);
        self.key.clear();
        self.key_complete = false;
        Ok(())
    }

    /// Whether the pending key is a move the current node already has.
    fn repeats_move(&self) -> bool {
        if self.key != "B" && self.key != "W" {
            return false;
        }
        match (&self.tree, self.node) {
            (Some(tree), Some(node)) => tree.node(node).is_ok_and(|n| n.has_key(&self.key)),
            _ => false,
        }
    }

    fn store_value(&mut self) -> Result<(), SgfError> {
        let value = String::from_utf8_lossy(&self.value).into_owned();
        if let (Some(tree), Some(node)) = (&mut self.tree, self.node) {
            tree.add_value(node, &self.key, &value)?;
        }
        self.value.clear();
        Ok(())
    }

    /// Read one game starting at `offset`. Returns the tree and the offset
    /// just past its closing `)`.
    fn read(mut self, offset: usize) -> Result<(GameTree, usize), SgfError> {
        let mut state = State::BeforeTree;
        let mut i = offset;
        while i < self.buf.len() {
            let c = self.buf[i];
            match state {
                State::BeforeTree => {
                    if c == b'(' {
                        state = State::ExpectingKey;
                    } else if !c.is_ascii_whitespace() {
                        return Err(SgfError::UnexpectedByte { offset: i, byte: c });
                    }
                }
                State::InsideValue => match c {
                    b'\\' => {
                        i += 1;
                        if let Some(&escaped) = self.buf.get(i) {
                            self.value.push(escaped);
                        }
                    }
                    b']' => {
                        if self.node.is_none() {
                            return Err(SgfError::CloseWithoutNode { offset: i });
                        }
                        self.store_value()?;
                        state = State::ExpectingKey;
                    }
                    _ => self.value.push(c),
                },
                State::ExpectingKey => match c {
                    b'[' => {
                        if self.key.is_empty() {
                            return Err(SgfError::ValueWithoutKey { offset: i });
                        }
                        if self.node.is_none() {
                            // "(AB[aa]...)" with no leading ';'
                            let key = std::mem::take(&mut self.key);
                            self.open_node()?;
                            self.key = key;
                        }
                        if self.repeats_move() {
                            return Err(SgfError::DuplicateMove {
                                offset: i,
                                key: self.key.clone(),
                            });
                        }
                        self.key_complete = true;
                        state = State::InsideValue;
                    }
                    b']' => return Err(SgfError::CloseWithoutNode { offset: i }),
                    b';' => self.open_node()?,
                    b'(' => {
                        let node = self.node.ok_or(SgfError::SubtreeWithoutNode { offset: i })?;
                        self.stack.push(node);
                    }
                    b')' => match self.stack.pop() {
                        Some(node) => {
                            self.node = Some(node);
                            self.key.clear();
                        }
                        None => {
                            let tree = self.tree.take().ok_or(SgfError::UnexpectedByte {
                                offset: i,
                                byte: c,
                            })?;
                            return Ok((tree, i + 1));
                        }
                    },
                    b'A'..=b'Z' => {
                        if self.key_complete {
                            self.key.clear();
                            self.key_complete = false;
                        }
                        self.key.push(c as char);
                    }
                    // Long-form FF[3] keys such as "AddBlack" keep only their capitals
                    b'a'..=b'z' => {}
                    _ if c.is_ascii_whitespace() => {}
                    _ => return Err(SgfError::UnexpectedByte { offset: i, byte: c }),
                },
            }
            i += 1;
        }
        if state == State::BeforeTree {
            Err(SgfError::NoTree)
        } else {
            Err(SgfError::UnexpectedEnd)
        }
    }
}

/// Read the single game starting at `offset`.
pub fn parse_one(buf: &[u8], offset: usize) -> Result<(GameTree, usize), SgfError> {
    let (tree, end) = Reader::new(buf).read(offset)?;
    tree.size()?;
    Ok((tree, end))
}

/// Read every game in `buf`.
///
/// Reading stops at the first game that fails. That failure is fatal only
/// if no game was read before it; otherwise it is reported in
/// [`Collection::errors`] and the rest of the buffer is dropped.
pub fn load(buf: &[u8]) -> Result<Collection, SgfError> {
    let mut games = Vec::new();
    let mut errors = Vec::new();
    let mut offset = 0;
    loop {
        while offset < buf.len() && buf[offset].is_ascii_whitespace() {
            offset += 1;
        }
        if offset >= buf.len() {
            break;
        }
        match parse_one(buf, offset) {
            Ok((tree, end)) => {
                games.push(tree);
                offset = end;
            }
            Err(e) => {
                errors.push(e);
                break;
            }
        }
    }
    if games.is_empty() {
        let first = errors.into_iter().next().unwrap_or(SgfError::NoTree);
        return Err(SgfError::NoGames(Box::new(first)));
    }
    Ok(Collection { games, errors })
}

/// Escape a property value for writing.
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        if ch == '\\' || ch == ']' {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

enum Step {
    Open,
    Node(NodeId),
    Close,
}

/// Write a tree as SGF: main line inline, other variations in parentheses.
pub fn serialize(tree: &GameTree) -> Result<String, TreeError> {
    let mut out = String::new();
    let mut steps = vec![Step::Close, Step::Node(tree.root()), Step::Open];
    while let Some(step) = steps.pop() {
        match step {
            Step::Open => out.push('('),
            Step::Close => out.push(')'),
            Step::Node(id) => {
                let node = tree.node(id)?;
                out.push(';');
                for (key, values) in node.props() {
                    out.push_str(key);
                    for v in values {
                        out.push('[');
                        out.push_str(&escape(v));
                        out.push(']');
                    }
                }
                match node.children() {
                    [] => {}
                    [only] => steps.push(Step::Node(*only)),
                    many => {
                        for &child in many.iter().rev() {
                            steps.push(Step::Close);
                            steps.push(Step::Node(child));
                            steps.push(Step::Open);
                        }
                    }
                }
            }
        }
    }
    out.push('\n');
    Ok(out)
}
