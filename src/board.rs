//! Go board representation and rules.
//!
//! A [`Board`] is one position: the stone grid plus the state that travels
//! with it (side to move, ko point, captures, komi and rules). Boards are
//! cheap to clone and the game tree treats them as values, deriving each
//! node's board from a copy of its parent's.
//!
//! Two ways of putting stones down exist on purpose:
//! - [`Board::legality`] / [`Board::is_legal`] decide whether interactive
//!   play may use a point.
//! - [`Board::place`] never refuses. It is what record replay uses, so a
//!   suicide found in a file becomes a self-capture instead of an error.

use std::fmt;

use crate::constants::{GTP_LETTERS, MAX_SIZE, MIN_SIZE, SGF_LETTERS};

/// Stone color.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Color {
    Black,
    White,
}

impl Color {
    /// The other color.
    pub fn opponent(self) -> Color {
        match self {
            Color::Black => Color::White,
            Color::White => Color::Black,
        }
    }

    /// SGF move key and GTP color letter (`"B"` / `"W"`).
    pub fn letter(self) -> &'static str {
        match self {
            Color::Black => "B",
            Color::White => "W",
        }
    }

    /// Parse `B`, `W`, `black`, `white` in any case.
    pub fn from_letter(s: &str) -> Option<Color> {
        match s.to_ascii_lowercase().as_str() {
            "b" | "black" => Some(Color::Black),
            "w" | "white" => Some(Color::White),
            _ => None,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.letter())
    }
}

/// An intersection, zero-based from the top-left corner.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Point {
    pub x: u8,
    pub y: u8,
}

impl Point {
    pub fn new(x: u8, y: u8) -> Self {
        Self { x, y }
    }

    /// Parse a two-letter SGF coordinate. Returns `None` for anything that
    /// is not on a `width` x `height` board.
    pub fn from_sgf(s: &str, width: u8, height: u8) -> Option<Point> {
        let bytes = s.as_bytes();
        if bytes.len() != 2 {
            return None;
        }
        let x = SGF_LETTERS.iter().position(|&c| c == bytes[0])? as u8;
        let y = SGF_LETTERS.iter().position(|&c| c == bytes[1])? as u8;
        (x < width && y < height).then_some(Point { x, y })
    }

    /// Two-letter SGF coordinate.
    pub fn to_sgf(self) -> String {
        let x = SGF_LETTERS[self.x as usize] as char;
        let y = SGF_LETTERS[self.y as usize] as char;
        format!("{x}{y}")
    }

    /// Parse a GTP vertex such as `D4` or `q16`.
    ///
    /// Columns use letters A-Z without I; rows count up from the bottom edge.
    pub fn from_gtp(s: &str, width: u8, height: u8) -> Option<Point> {
        let bytes = s.as_bytes();
        if bytes.len() < 2 {
            return None;
        }
        let col = bytes[0].to_ascii_uppercase();
        let x = GTP_LETTERS.iter().position(|&c| c == col)? as u8;
        let row: u8 = s[1..].parse().ok()?;
        if x >= width || row == 0 || row > height {
            return None;
        }
        Some(Point { x, y: height - row })
    }

    /// GTP vertex for a board of the given height.
    pub fn to_gtp(self, height: u8) -> String {
        let c = GTP_LETTERS[self.x as usize] as char;
        format!("{c}{}", height - self.y)
    }
}

/// A move: a stone on a point, or a pass.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Move {
    Play(Point),
    Pass,
}

impl Move {
    /// Interpret an SGF move value. The empty value, `tt` on boards up to
    /// 19x19, and any off-board coordinate are passes.
    pub fn from_sgf(s: &str, width: u8, height: u8) -> Move {
        match Point::from_sgf(s, width, height) {
            Some(p) if !(s == "tt" && width <= 19 && height <= 19) => Move::Play(p),
            _ => Move::Pass,
        }
    }

    /// SGF value; passes are written as the empty value.
    pub fn to_sgf(self) -> String {
        match self {
            Move::Play(p) => p.to_sgf(),
            Move::Pass => String::new(),
        }
    }

    /// Parse a GTP vertex or `pass`.
    pub fn from_gtp(s: &str, width: u8, height: u8) -> Option<Move> {
        if s.eq_ignore_ascii_case("pass") {
            return Some(Move::Pass);
        }
        Point::from_gtp(s, width, height).map(Move::Play)
    }

    pub fn to_gtp(self, height: u8) -> String {
        match self {
            Move::Play(p) => p.to_gtp(height),
            Move::Pass => "pass".into(),
        }
    }
}

/// Reason an interactive move was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveError {
    /// Point is outside the board
    OffBoard,
    /// Point is not empty
    Occupied,
    /// Move retakes a ko
    Ko,
    /// Move would leave its own group without liberties
    Suicide,
}

impl fmt::Display for MoveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MoveError::OffBoard => write!(f, "illegal move: point is off the board"),
            MoveError::Occupied => write!(f, "illegal move: point not empty"),
            MoveError::Ko => write!(f, "illegal move: retakes ko"),
            MoveError::Suicide => write!(f, "illegal move: suicide"),
        }
    }
}

impl std::error::Error for MoveError {}

/// A Go position.
#[derive(Clone, Debug, PartialEq)]
pub struct Board {
    width: u8,
    height: u8,
    cells: Vec<Option<Color>>,
    /// Side to move
    pub active: Color,
    /// Point where an immediate recapture is forbidden
    pub ko: Option<Point>,
    pub komi: f64,
    pub rules: String,
    /// Stones captured by Black
    pub black_captures: u32,
    /// Stones captured by White
    pub white_captures: u32,
}

impl Board {
    /// Create an empty board.
    ///
    /// # Panics
    /// If either dimension is outside 1..=25.
    pub fn new(width: u8, height: u8, komi: f64, rules: &str) -> Self {
        assert!(
            Self::valid_size(width, height),
            "board size {width}x{height} out of range"
        );
        Self {
            width,
            height,
            cells: vec![None; width as usize * height as usize],
            active: Color::Black,
            ko: None,
            komi,
            rules: rules.to_string(),
            black_captures: 0,
            white_captures: 0,
        }
    }

    /// Whether `width` x `height` is a size boards can be built with.
    pub fn valid_size(width: u8, height: u8) -> bool {
        (MIN_SIZE..=MAX_SIZE).contains(&width) && (MIN_SIZE..=MAX_SIZE).contains(&height)
    }

    pub fn width(&self) -> u8 {
        self.width
    }

    pub fn height(&self) -> u8 {
        self.height
    }

    fn idx(&self, p: Point) -> usize {
        p.y as usize * self.width as usize + p.x as usize
    }

    pub fn in_bounds(&self, p: Point) -> bool {
        p.x < self.width && p.y < self.height
    }

    /// Stone at `p`, `None` if empty or off the board.
    pub fn get(&self, p: Point) -> Option<Color> {
        if !self.in_bounds(p) {
            return None;
        }
        self.cells[self.idx(p)]
    }

    /// Overwrite one intersection. Used for setup properties, which do not
    /// capture and do not change the side to move.
    pub fn set(&mut self, p: Point, stone: Option<Color>) {
        if self.in_bounds(p) {
            let i = self.idx(p);
            self.cells[i] = stone;
        }
    }

    /// All stones on the board in row-major order.
    pub fn stones(&self) -> impl Iterator<Item = (Point, Color)> + '_ {
        let w = self.width as usize;
        self.cells.iter().enumerate().filter_map(move |(i, c)| {
            c.map(|color| (Point::new((i % w) as u8, (i / w) as u8), color))
        })
    }

    pub fn stone_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_some()).count()
    }

    pub fn captures(&self, color: Color) -> u32 {
        match color {
            Color::Black => self.black_captures,
            Color::White => self.white_captures,
        }
    }

    fn neighbors(&self, p: Point) -> impl Iterator<Item = Point> + use<> {
        let (w, h) = (self.width, self.height);
        [
            (p.x > 0).then(|| Point::new(p.x - 1, p.y)),
            (p.x + 1 < w).then(|| Point::new(p.x + 1, p.y)),
            (p.y > 0).then(|| Point::new(p.x, p.y - 1)),
            (p.y + 1 < h).then(|| Point::new(p.x, p.y + 1)),
        ]
        .into_iter()
        .flatten()
    }

    /// Whether the group at `p` has at least one liberty.
    pub fn has_liberties(&self, p: Point) -> bool {
        let mut touched = vec![false; self.cells.len()];
        self.liberties_reachable(p, &mut touched)
    }

    /// Flood-fill the group at `p`, stopping at the first liberty.
    ///
    /// Points already marked in `touched` count neither as group members
    /// nor as liberties, which lets a caller pre-mark a candidate point to
    /// ask "would this group still breathe if that point were filled".
    fn liberties_reachable(&self, p: Point, touched: &mut [bool]) -> bool {
        let Some(color) = self.get(p) else {
            return false;
        };
        let mut stack = vec![p];
        touched[self.idx(p)] = true;
        while let Some(cur) = stack.pop() {
            for n in self.neighbors(cur) {
                let ni = self.idx(n);
                if touched[ni] {
                    continue;
                }
                match self.cells[ni] {
                    None => return true,
                    Some(c) if c == color => {
                        touched[ni] = true;
                        stack.push(n);
                    }
                    _ => {}
                }
            }
        }
        false
    }

    /// Check whether `color` may play at `p`.
    pub fn legality(&self, p: Point, color: Color) -> Result<(), MoveError> {
        if !self.in_bounds(p) {
            return Err(MoveError::OffBoard);
        }
        if self.get(p).is_some() {
            return Err(MoveError::Occupied);
        }
        if self.ko == Some(p) {
            return Err(MoveError::Ko);
        }
        if self.neighbors(p).any(|n| self.get(n).is_none()) {
            return Ok(());
        }
        for n in self.neighbors(p) {
            let mut touched = vec![false; self.cells.len()];
            touched[self.idx(p)] = true;
            let breathes = self.liberties_reachable(n, &mut touched);
            match self.get(n) {
                Some(c) if c == color && breathes => return Ok(()),
                Some(c) if c != color && !breathes => return Ok(()),
                _ => {}
            }
        }
        Err(MoveError::Suicide)
    }

    pub fn is_legal(&self, p: Point, color: Color) -> bool {
        self.legality(p, color).is_ok()
    }

    /// Put a stone down without any legality check.
    ///
    /// Opposing groups left without liberties are removed, then the played
    /// group itself if it has none. A ko point is recorded when exactly one
    /// stone was captured by a lone stone that now has a single liberty.
    /// Off-board points behave like a pass.
    pub fn place(&mut self, p: Point, color: Color) {
        if !self.in_bounds(p) {
            self.pass(color);
            return;
        }
        let i = self.idx(p);
        self.cells[i] = Some(color);
        self.ko = None;

        let mut captured = 0;
        let mut last_captured = None;
        for n in self.neighbors(p) {
            if self.get(n) == Some(color.opponent()) && !self.has_liberties(n) {
                captured += self.remove_group(n);
                last_captured = Some(n);
            }
        }
        self.add_captures(color, captured);

        if !self.has_liberties(p) {
            let lost = self.remove_group(p);
            self.add_captures(color.opponent(), lost);
        } else if captured == 1 {
            let lone = self.neighbors(p).all(|n| self.get(n) != Some(color));
            let liberties = self.neighbors(p).filter(|&n| self.get(n).is_none()).count();
            if lone && liberties == 1 {
                self.ko = last_captured;
            }
        }

        self.active = color.opponent();
    }

    /// A pass by `color`: clears the ko and hands the move to the opponent.
    pub fn pass(&mut self, color: Color) {
        self.ko = None;
        self.active = color.opponent();
    }

    /// Apply a move without legality checks.
    pub fn play(&mut self, mv: Move, color: Color) {
        match mv {
            Move::Play(p) => self.place(p, color),
            Move::Pass => self.pass(color),
        }
    }

    fn add_captures(&mut self, color: Color, n: u32) {
        match color {
            Color::Black => self.black_captures += n,
            Color::White => self.white_captures += n,
        }
    }

    fn remove_group(&mut self, p: Point) -> u32 {
        let Some(color) = self.get(p) else {
            return 0;
        };
        let mut stack = vec![p];
        let mut count = 0;
        let i = self.idx(p);
        self.cells[i] = None;
        while let Some(cur) = stack.pop() {
            count += 1;
            for n in self.neighbors(cur) {
                if self.get(n) == Some(color) {
                    let ni = self.idx(n);
                    self.cells[ni] = None;
                    stack.push(n);
                }
            }
        }
        count
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for y in 0..self.height {
            for x in 0..self.width {
                let p = Point::new(x, y);
                let ch = match self.get(p) {
                    Some(Color::Black) => 'X',
                    Some(Color::White) => 'O',
                    None if self.ko == Some(p) => '*',
                    None => '.',
                };
                write!(f, "{ch} ")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
