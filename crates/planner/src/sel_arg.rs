//! Interval trees over one key part.
//!
//! Every usable index gets a tree of disjoint, ascending intervals for its
//! first constrained key part. A node may point at a further tree for the
//! next key part (`next_key_part`), so `a IN (1,2) AND b > 5` on index
//! `(a, b)` becomes two `a` points that both lead to one `b > 5` tree.
//!
//! Nodes live in a [`SelArgArena`] and refer to each other by [`NodeId`].
//! Trees are never edited after they are built: AND/OR produce fresh trees
//! and may share subtrees with their inputs. The arena is dropped as a
//! whole once planning is over.

use std::{cmp::Ordering, fmt, ops};

use common::{ColumnId, DbError, DbResult};
use types::Value;

/// Endpoint and range flags.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RangeFlags(u8);

impl RangeFlags {
    pub const NONE: Self = Self(0);
    /// No lower bound.
    pub const NO_MIN_RANGE: Self = Self(1);
    /// No upper bound.
    pub const NO_MAX_RANGE: Self = Self(1 << 1);
    /// Lower bound is exclusive.
    pub const NEAR_MIN: Self = Self(1 << 2);
    /// Upper bound is exclusive.
    pub const NEAR_MAX: Self = Self(1 << 3);
    /// Full-key equality on a unique index: at most one row.
    pub const UNIQUE_RANGE: Self = Self(1 << 4);
    /// Single-point range.
    pub const EQ_RANGE: Self = Self(1 << 5);
    /// Point range that contains a NULL key part.
    pub const NULL_RANGE: Self = Self(1 << 6);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl ops::BitOr for RangeFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl ops::BitOrAssign for RangeFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for RangeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(RangeFlags, &str); 7] = [
            (RangeFlags::NO_MIN_RANGE, "NO_MIN_RANGE"),
            (RangeFlags::NO_MAX_RANGE, "NO_MAX_RANGE"),
            (RangeFlags::NEAR_MIN, "NEAR_MIN"),
            (RangeFlags::NEAR_MAX, "NEAR_MAX"),
            (RangeFlags::UNIQUE_RANGE, "UNIQUE_RANGE"),
            (RangeFlags::EQ_RANGE, "EQ_RANGE"),
            (RangeFlags::NULL_RANGE, "NULL_RANGE"),
        ];
        let set: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if set.is_empty() {
            f.write_str("NONE")
        } else {
            f.write_str(&set.join("|"))
        }
    }
}

/// Position between two key values; intervals are spans between cuts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Cut<'a> {
    NegInf,
    Before(&'a Value),
    After(&'a Value),
    PosInf,
}

impl Ord for Cut<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        use Cut::*;
        match (self, other) {
            (NegInf, NegInf) | (PosInf, PosInf) => Ordering::Equal,
            (NegInf, _) | (_, PosInf) => Ordering::Less,
            (_, NegInf) | (PosInf, _) => Ordering::Greater,
            (Before(a), Before(b)) | (After(a), After(b)) => a.cmp(b),
            (Before(a), After(b)) => a.cmp(b).then(Ordering::Less),
            (After(a), Before(b)) => a.cmp(b).then(Ordering::Greater),
        }
    }
}

impl PartialOrd for Cut<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A span of one key part's values.
///
/// NULL is the smallest key value: `IS NULL` is the point `[NULL, NULL]`,
/// while `a < 5` starts just above NULL, `(NULL, 5)`.
#[derive(Clone, PartialEq, Eq)]
pub struct Interval {
    pub min: Value,
    pub max: Value,
    pub min_flag: RangeFlags,
    pub max_flag: RangeFlags,
}

impl Interval {
    pub fn new(min: Value, min_flag: RangeFlags, max: Value, max_flag: RangeFlags) -> Self {
        Self {
            min,
            max,
            min_flag,
            max_flag,
        }
    }

    /// `[v, v]`
    pub fn point(v: Value) -> Self {
        Self::new(v.clone(), RangeFlags::NONE, v, RangeFlags::NONE)
    }

    /// Every value, NULL included.
    pub fn full() -> Self {
        Self::new(
            Value::Null,
            RangeFlags::NO_MIN_RANGE,
            Value::Null,
            RangeFlags::NO_MAX_RANGE,
        )
    }

    /// Every non-NULL value `>= v` (or `> v` when `strict`).
    pub fn above(v: Value, strict: bool) -> Self {
        let flag = if strict {
            RangeFlags::NEAR_MIN
        } else {
            RangeFlags::NONE
        };
        Self::new(v, flag, Value::Null, RangeFlags::NO_MAX_RANGE)
    }

    /// Every non-NULL value `<= v` (or `< v` when `strict`).
    pub fn below(v: Value, strict: bool) -> Self {
        let flag = if strict {
            RangeFlags::NEAR_MAX
        } else {
            RangeFlags::NONE
        };
        Self::new(Value::Null, RangeFlags::NEAR_MIN, v, flag)
    }

    /// Every non-NULL value.
    pub fn not_null() -> Self {
        Self::new(
            Value::Null,
            RangeFlags::NEAR_MIN,
            Value::Null,
            RangeFlags::NO_MAX_RANGE,
        )
    }

    fn lower(&self) -> Cut<'_> {
        if self.min_flag.contains(RangeFlags::NO_MIN_RANGE) {
            Cut::NegInf
        } else if self.min_flag.contains(RangeFlags::NEAR_MIN) {
            Cut::After(&self.min)
        } else {
            Cut::Before(&self.min)
        }
    }

    fn upper(&self) -> Cut<'_> {
        if self.max_flag.contains(RangeFlags::NO_MAX_RANGE) {
            Cut::PosInf
        } else if self.max_flag.contains(RangeFlags::NEAR_MAX) {
            Cut::Before(&self.max)
        } else {
            Cut::After(&self.max)
        }
    }

    fn from_cuts(lower: Cut<'_>, upper: Cut<'_>) -> Self {
        let (min, min_flag) = match lower {
            Cut::NegInf | Cut::PosInf => (Value::Null, RangeFlags::NO_MIN_RANGE),
            Cut::Before(v) => (v.clone(), RangeFlags::NONE),
            Cut::After(v) => (v.clone(), RangeFlags::NEAR_MIN),
        };
        let (max, max_flag) = match upper {
            Cut::NegInf | Cut::PosInf => (Value::Null, RangeFlags::NO_MAX_RANGE),
            Cut::After(v) => (v.clone(), RangeFlags::NONE),
            Cut::Before(v) => (v.clone(), RangeFlags::NEAR_MAX),
        };
        Self::new(min, min_flag, max, max_flag)
    }

    /// True when no value lies inside.
    pub fn is_empty(&self) -> bool {
        self.lower() >= self.upper()
    }

    /// Exact overlap of two intervals, `None` when disjoint.
    pub fn intersect(&self, other: &Interval) -> Option<Interval> {
        let lower = self.lower().max(other.lower());
        let upper = self.upper().min(other.upper());
        (lower < upper).then(|| Self::from_cuts(lower, upper))
    }

    /// One interval covering both, when they overlap or touch.
    pub fn merge_if_adjacent(&self, other: &Interval) -> Option<Interval> {
        if self.lower() > other.upper() || other.lower() > self.upper() {
            return None;
        }
        Some(Self::from_cuts(
            self.lower().min(other.lower()),
            self.upper().max(other.upper()),
        ))
    }

    pub fn contains(&self, v: &Value) -> bool {
        self.lower() <= Cut::Before(v) && Cut::After(v) <= self.upper()
    }

    pub fn cmp_min_to_min(&self, other: &Interval) -> Ordering {
        self.lower().cmp(&other.lower())
    }

    pub fn cmp_max_to_max(&self, other: &Interval) -> Ordering {
        self.upper().cmp(&other.upper())
    }

    /// `Less` when this interval ends before `other` starts.
    pub fn cmp_max_to_min(&self, other: &Interval) -> Ordering {
        if self.upper() <= other.lower() {
            Ordering::Less
        } else {
            Ordering::Greater
        }
    }

    /// `Greater` when this interval starts after `other` ends.
    pub fn cmp_min_to_max(&self, other: &Interval) -> Ordering {
        if self.lower() >= other.upper() {
            Ordering::Greater
        } else {
            Ordering::Less
        }
    }

    /// Closed single-value interval.
    pub fn is_point(&self) -> bool {
        self.min_flag.is_empty() && self.max_flag.is_empty() && self.min == self.max
    }

    /// Covers every value including NULL.
    pub fn is_full(&self) -> bool {
        self.lower() <= Cut::Before(&Value::Null) && self.upper() == Cut::PosInf
    }

    /// True when the interval has a lower bound.
    pub fn has_min(&self) -> bool {
        !self.min_flag.contains(RangeFlags::NO_MIN_RANGE)
    }

    pub fn has_max(&self) -> bool {
        !self.max_flag.contains(RangeFlags::NO_MAX_RANGE)
    }
}

impl fmt::Debug for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.lower() {
            Cut::NegInf | Cut::PosInf => f.write_str("(-inf")?,
            Cut::Before(v) => write!(f, "[{v}")?,
            Cut::After(v) => write!(f, "({v}")?,
        }
        f.write_str(", ")?;
        match self.upper() {
            Cut::NegInf | Cut::PosInf => f.write_str("+inf)"),
            Cut::After(v) => write!(f, "{v}]"),
            Cut::Before(v) => write!(f, "{v})"),
        }
    }
}

/// Index of a node inside a [`SelArgArena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelArgKind {
    /// The key part can never match.
    Impossible,
    /// Constraint exists but could not be turned into an interval.
    MaybeKey,
    KeyRange,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Color {
    Red,
    Black,
}

/// One interval of one key part.
#[derive(Clone, Debug)]
pub struct SelArg {
    pub kind: SelArgKind,
    pub part: u16,
    pub field: ColumnId,
    pub interval: Interval,
    /// Set on a root when the tree may select more rows than the predicate.
    pub maybe_flag: bool,
    pub next_key_part: Option<NodeId>,
    left: Option<NodeId>,
    right: Option<NodeId>,
    parent: Option<NodeId>,
    next: Option<NodeId>,
    prev: Option<NodeId>,
    color: Color,
    /// Node count of the tree; kept on the root.
    elements: u32,
}

impl SelArg {
    fn new(kind: SelArgKind, part: u16, field: ColumnId, interval: Interval) -> Self {
        Self {
            kind,
            part,
            field,
            interval,
            maybe_flag: false,
            next_key_part: None,
            left: None,
            right: None,
            parent: None,
            next: None,
            prev: None,
            color: Color::Black,
            elements: 1,
        }
    }
}

/// Interval of a tree level together with the subtree that follows it.
pub type Element = (Interval, Option<NodeId>);

/// Bump allocator for interval nodes.
///
/// Node 0 is the shared impossible marker.
#[derive(Debug)]
pub struct SelArgArena {
    nodes: Vec<SelArg>,
    limit: usize,
}

impl SelArgArena {
    pub fn new(limit: usize) -> Self {
        let mut null = SelArg::new(SelArgKind::Impossible, 0, 0, Interval::full());
        null.elements = 0;
        Self {
            nodes: vec![null],
            limit: limit.max(1),
        }
    }

    /// Nodes allocated so far.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn node(&self, id: NodeId) -> &SelArg {
        &self.nodes[id.0 as usize]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut SelArg {
        &mut self.nodes[id.0 as usize]
    }

    fn alloc(&mut self, node: SelArg) -> DbResult<NodeId> {
        if self.nodes.len() >= self.limit {
            return Err(DbError::Planner(format!(
                "range analysis exceeded {} interval nodes",
                self.limit
            )));
        }
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        Ok(id)
    }

    /// The shared "never matches" marker.
    pub fn impossible(&self) -> NodeId {
        NodeId(0)
    }

    pub fn is_impossible(&self, id: NodeId) -> bool {
        self.node(id).kind == SelArgKind::Impossible
    }

    pub fn kind(&self, id: NodeId) -> SelArgKind {
        self.node(id).kind
    }

    /// Single-interval tree.
    pub fn leaf(&mut self, part: u16, field: ColumnId, interval: Interval) -> DbResult<NodeId> {
        if interval.is_empty() {
            return Ok(self.impossible());
        }
        self.alloc(SelArg::new(SelArgKind::KeyRange, part, field, interval))
    }

    /// Placeholder for a constraint that is not an interval.
    pub fn maybe_key(
        &mut self,
        part: u16,
        field: ColumnId,
        next_key_part: Option<NodeId>,
    ) -> DbResult<NodeId> {
        let mut node = SelArg::new(SelArgKind::MaybeKey, part, field, Interval::full());
        node.maybe_flag = true;
        node.next_key_part = next_key_part;
        self.alloc(node)
    }

    /// Build a tree from disjoint intervals given in ascending order.
    ///
    /// Returns the impossible marker for an empty list.
    pub fn build(
        &mut self,
        part: u16,
        field: ColumnId,
        elements: Vec<Element>,
        maybe_flag: bool,
    ) -> DbResult<NodeId> {
        let mut root: Option<NodeId> = None;
        let count = elements.len() as u32;
        for (interval, next_key_part) in elements {
            let mut node = SelArg::new(SelArgKind::KeyRange, part, field, interval);
            node.next_key_part = next_key_part;
            let id = self.alloc(node)?;
            root = Some(match root {
                None => id,
                Some(r) => self.insert(r, id),
            });
        }
        match root {
            None => Ok(self.impossible()),
            Some(r) => {
                let node = self.node_mut(r);
                node.elements = count;
                node.maybe_flag = maybe_flag;
                Ok(r)
            }
        }
    }

    pub fn elements(&self, root: NodeId) -> u32 {
        self.node(root).elements
    }

    /// Leftmost node of the tree rooted at `root`.
    pub fn first(&self, root: NodeId) -> NodeId {
        let mut id = root;
        while let Some(left) = self.node(id).left {
            id = left;
        }
        id
    }

    pub fn last(&self, root: NodeId) -> NodeId {
        let mut id = root;
        while let Some(right) = self.node(id).right {
            id = right;
        }
        id
    }

    pub fn next(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).next
    }

    pub fn prev(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).prev
    }

    /// Nodes of the tree in key order.
    pub fn iter(&self, root: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let start = (!self.is_impossible(root)).then(|| self.first(root));
        std::iter::successors(start, move |id| self.next(*id))
    }

    /// The tree's elements in key order.
    pub fn elements_of(&self, root: NodeId) -> Vec<Element> {
        self.iter(root)
            .map(|id| {
                let node = self.node(id);
                (node.interval.clone(), node.next_key_part)
            })
            .collect()
    }

    /// Last node whose interval starts at or before `key`'s start, or the
    /// first node when every interval starts after it.
    pub fn find_range(&self, root: NodeId, key: &Interval) -> NodeId {
        let mut element = Some(root);
        let mut found = None;
        while let Some(id) = element {
            let node = self.node(id);
            match node.interval.cmp_min_to_min(key) {
                Ordering::Equal => return id,
                Ordering::Less => {
                    found = Some(id);
                    element = node.right;
                }
                Ordering::Greater => element = node.left,
            }
        }
        found.unwrap_or_else(|| self.first(root))
    }

    /// Structural equality of two (optional) trees, next key parts included.
    pub fn eq_tree(&self, a: Option<NodeId>, b: Option<NodeId>) -> bool {
        match (a, b) {
            (None, None) => true,
            (Some(a), Some(b)) if a == b => true,
            (Some(a), Some(b)) => {
                let (na, nb) = (self.node(a), self.node(b));
                if na.kind != nb.kind || na.part != nb.part {
                    return false;
                }
                if na.kind != SelArgKind::KeyRange {
                    return self.eq_tree(na.next_key_part, nb.next_key_part);
                }
                let mut left = self.iter(a);
                let mut right = self.iter(b);
                loop {
                    match (left.next(), right.next()) {
                        (None, None) => return true,
                        (Some(x), Some(y)) => {
                            let (nx, ny) = (self.node(x), self.node(y));
                            if nx.interval != ny.interval
                                || !self.eq_tree(nx.next_key_part, ny.next_key_part)
                            {
                                return false;
                            }
                        }
                        _ => return false,
                    }
                }
            }
            _ => false,
        }
    }

    fn color(&self, id: Option<NodeId>) -> Color {
        id.map_or(Color::Black, |id| self.node(id).color)
    }

    /// Insert `key` into the tree rooted at `root`; returns the new root.
    ///
    /// The key must not overlap any interval already in the tree.
    fn insert(&mut self, root: NodeId, key: NodeId) -> NodeId {
        let mut element = Some(root);
        let mut last = root;
        let mut went_left = false;
        while let Some(id) = element {
            last = id;
            let node = self.node(id);
            if self.node(key).interval.cmp_min_to_min(&node.interval) == Ordering::Greater {
                went_left = false;
                element = node.right;
            } else {
                went_left = true;
                element = node.left;
            }
        }

        self.node_mut(key).parent = Some(last);
        if went_left {
            self.node_mut(last).left = Some(key);
            let prev = self.node(last).prev;
            self.node_mut(key).next = Some(last);
            self.node_mut(key).prev = prev;
            if let Some(prev) = prev {
                self.node_mut(prev).next = Some(key);
            }
            self.node_mut(last).prev = Some(key);
        } else {
            self.node_mut(last).right = Some(key);
            let next = self.node(last).next;
            self.node_mut(key).next = next;
            if let Some(next) = next {
                self.node_mut(next).prev = Some(key);
            }
            self.node_mut(key).prev = Some(last);
            self.node_mut(last).next = Some(key);
        }
        self.node_mut(key).left = None;
        self.node_mut(key).right = None;
        self.rb_insert(root, key)
    }

    fn rb_insert(&mut self, root: NodeId, leaf: NodeId) -> NodeId {
        let mut root = root;
        let mut leaf = leaf;
        self.node_mut(root).parent = None;
        self.node_mut(leaf).color = Color::Red;

        while leaf != root {
            let Some(mut par) = self.node(leaf).parent else {
                break;
            };
            if self.node(par).color != Color::Red {
                break;
            }
            let Some(par2) = self.node(par).parent else {
                break;
            };
            if self.node(par2).left == Some(par) {
                let y = self.node(par2).right;
                if self.color(y) == Color::Red {
                    self.node_mut(par).color = Color::Black;
                    if let Some(y) = y {
                        self.node_mut(y).color = Color::Black;
                    }
                    leaf = par2;
                    self.node_mut(leaf).color = Color::Red;
                } else {
                    if self.node(par).right == Some(leaf) {
                        self.left_rotate(&mut root, par);
                        par = leaf;
                    }
                    self.node_mut(par).color = Color::Black;
                    self.node_mut(par2).color = Color::Red;
                    self.right_rotate(&mut root, par2);
                    break;
                }
            } else {
                let y = self.node(par2).left;
                if self.color(y) == Color::Red {
                    self.node_mut(par).color = Color::Black;
                    if let Some(y) = y {
                        self.node_mut(y).color = Color::Black;
                    }
                    leaf = par2;
                    self.node_mut(leaf).color = Color::Red;
                } else {
                    if self.node(par).left == Some(leaf) {
                        self.right_rotate(&mut root, par);
                        par = leaf;
                    }
                    self.node_mut(par).color = Color::Black;
                    self.node_mut(par2).color = Color::Red;
                    self.left_rotate(&mut root, par2);
                    break;
                }
            }
        }
        self.node_mut(root).color = Color::Black;
        root
    }

    fn replace_child(&mut self, root: &mut NodeId, old: NodeId, new: NodeId) {
        let parent = self.node(old).parent;
        self.node_mut(new).parent = parent;
        match parent {
            None => *root = new,
            Some(p) => {
                if self.node(p).left == Some(old) {
                    self.node_mut(p).left = Some(new);
                } else {
                    self.node_mut(p).right = Some(new);
                }
            }
        }
    }

    fn left_rotate(&mut self, root: &mut NodeId, leaf: NodeId) {
        let Some(y) = self.node(leaf).right else {
            return;
        };
        let y_left = self.node(y).left;
        self.node_mut(leaf).right = y_left;
        if let Some(yl) = y_left {
            self.node_mut(yl).parent = Some(leaf);
        }
        self.replace_child(root, leaf, y);
        self.node_mut(y).left = Some(leaf);
        self.node_mut(leaf).parent = Some(y);
    }

    fn right_rotate(&mut self, root: &mut NodeId, leaf: NodeId) {
        let Some(y) = self.node(leaf).left else {
            return;
        };
        let y_right = self.node(y).right;
        self.node_mut(leaf).left = y_right;
        if let Some(yr) = y_right {
            self.node_mut(yr).parent = Some(leaf);
        }
        self.replace_child(root, leaf, y);
        self.node_mut(y).right = Some(leaf);
        self.node_mut(leaf).parent = Some(y);
    }

    /// Verify ordering, colouring and threading of a tree; returns its black height.
    #[cfg(test)]
    pub(crate) fn check_tree(&self, root: NodeId) -> Result<u32, String> {
        if self.node(root).color != Color::Black {
            return Err("root is red".into());
        }
        let height = self.check_subtree(Some(root))?;
        let in_order: Vec<NodeId> = self.iter(root).collect();
        let mut walked = Vec::new();
        self.walk(Some(root), &mut walked);
        if in_order != walked {
            return Err("next links disagree with in-order walk".into());
        }
        for pair in walked.windows(2) {
            let (a, b) = (&self.node(pair[0]).interval, &self.node(pair[1]).interval);
            if a.cmp_max_to_min(b) != Ordering::Less {
                return Err(format!("{a} overlaps or follows {b}"));
            }
        }
        if walked.len() as u32 != self.elements(root) {
            return Err("element count mismatch".into());
        }
        Ok(height)
    }

    #[cfg(test)]
    fn walk(&self, id: Option<NodeId>, out: &mut Vec<NodeId>) {
        if let Some(id) = id {
            self.walk(self.node(id).left, out);
            out.push(id);
            self.walk(self.node(id).right, out);
        }
    }

    #[cfg(test)]
    fn check_subtree(&self, id: Option<NodeId>) -> Result<u32, String> {
        let Some(id) = id else {
            return Ok(1);
        };
        let node = self.node(id);
        for child in [node.left, node.right].into_iter().flatten() {
            if self.node(child).parent != Some(id) {
                return Err("broken parent link".into());
            }
            if node.color == Color::Red && self.node(child).color == Color::Red {
                return Err("red node with red child".into());
            }
        }
        let lh = self.check_subtree(node.left)?;
        let rh = self.check_subtree(node.right)?;
        if lh != rh {
            return Err("unequal black height".into());
        }
        Ok(lh + u32::from(node.color == Color::Black))
    }
}

/// Stretch of the union of two element lists over which membership is constant.
#[derive(Debug)]
pub(crate) struct Segment {
    pub interval: Interval,
    /// Element of the first list covering the stretch.
    pub left: Option<usize>,
    pub right: Option<usize>,
    /// The stretch starts where the previous returned one ended.
    pub joins_previous: bool,
}

/// Split the union of two ascending, disjoint element lists at every endpoint.
pub(crate) fn union_segments(a: &[Element], b: &[Element]) -> Vec<Segment> {
    let mut cuts: Vec<Cut<'_>> = a
        .iter()
        .chain(b)
        .flat_map(|(interval, _)| [interval.lower(), interval.upper()])
        .collect();
    cuts.sort();
    cuts.dedup();

    let mut out = Vec::new();
    let mut last_upper: Option<Cut<'_>> = None;
    let (mut ia, mut ib) = (0, 0);
    for w in cuts.windows(2) {
        let (lo, hi) = (w[0], w[1]);
        while ia < a.len() && a[ia].0.upper() <= lo {
            ia += 1;
        }
        while ib < b.len() && b[ib].0.upper() <= lo {
            ib += 1;
        }
        let left = (ia < a.len() && a[ia].0.lower() <= lo).then_some(ia);
        let right = (ib < b.len() && b[ib].0.lower() <= lo).then_some(ib);
        if left.is_none() && right.is_none() {
            continue;
        }
        out.push(Segment {
            interval: Interval::from_cuts(lo, hi),
            left,
            right,
            joins_previous: last_upper == Some(lo),
        });
        last_upper = Some(hi);
    }
    out
}
