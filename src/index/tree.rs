//! Persistent AVL tree
//!
//! Nodes are immutable and shared through `Arc`. A mutation copies only the
//! path from the root to the touched node, so cloning a `Tree` is O(1) and a
//! clone is an isolated snapshot: later inserts and removes on either copy are
//! invisible to the other.

use std::cmp::Ordering;
use std::ops::{Bound, ControlFlow};
use std::sync::Arc;

use bytes::Bytes;

type Link<V> = Option<Arc<Node<V>>>;

#[derive(Debug)]
struct Node<V> {
    key: Bytes,
    value: V,
    left: Link<V>,
    right: Link<V>,
    height: u8,
    len: usize,
}

/// Ordered map from byte keys to `V` with cheap snapshots
#[derive(Debug)]
pub struct Tree<V> {
    root: Link<V>,
}

impl<V> Clone for Tree<V> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
        }
    }
}

impl<V> Default for Tree<V> {
    fn default() -> Self {
        Self { root: None }
    }
}

impl<V: Clone> Tree<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        len(&self.root)
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn get(&self, key: &[u8]) -> Option<&V> {
        let mut link = &self.root;
        while let Some(node) = link {
            match key.cmp(&node.key[..]) {
                Ordering::Less => link = &node.left,
                Ordering::Greater => link = &node.right,
                Ordering::Equal => return Some(&node.value),
            }
        }
        None
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// Insert or replace, returning the previous value
    pub fn insert(&mut self, key: Bytes, value: V) -> Option<V> {
        let (root, old) = insert(&self.root, key, value);
        self.root = Some(root);
        old
    }

    /// Remove a key, returning its value; a miss leaves the tree untouched
    pub fn remove(&mut self, key: &[u8]) -> Option<V> {
        let (root, old) = remove(&self.root, key)?;
        self.root = root;
        Some(old)
    }

    /// In-order walk of the keys within `(lower, upper)`
    pub fn walk_range<F>(&self, lower: Bound<&[u8]>, upper: Bound<&[u8]>, f: &mut F) -> ControlFlow<()>
    where
        F: FnMut(&Bytes, &V) -> ControlFlow<()>,
    {
        walk(&self.root, lower, upper, f)
    }

    /// In-order walk of every key starting with `prefix`
    pub fn walk_prefix<F>(&self, prefix: &[u8], f: &mut F) -> ControlFlow<()>
    where
        F: FnMut(&Bytes, &V) -> ControlFlow<()>,
    {
        match prefix_successor(prefix) {
            Some(end) => self.walk_range(Bound::Included(prefix), Bound::Excluded(&end), f),
            None => self.walk_range(Bound::Included(prefix), Bound::Unbounded, f),
        }
    }

    /// Owning, double-ended iterator over a snapshot of the tree
    pub fn iter(&self) -> Iter<V> {
        let mut iter = Iter {
            front: Vec::new(),
            back: Vec::new(),
            remaining: self.len(),
        };
        push_left(&mut iter.front, &self.root);
        push_right(&mut iter.back, &self.root);
        iter
    }

    /// Owning, double-ended iterator over the keys within `(lower, upper)`
    pub fn range(&self, lower: Bound<&[u8]>, upper: Bound<&[u8]>) -> Iter<V> {
        let first = match lower {
            Bound::Unbounded => 0,
            Bound::Included(k) => rank(&self.root, k, false),
            Bound::Excluded(k) => rank(&self.root, k, true),
        };
        let end = match upper {
            Bound::Unbounded => self.len(),
            Bound::Included(k) => rank(&self.root, k, true),
            Bound::Excluded(k) => rank(&self.root, k, false),
        };

        let mut iter = Iter {
            front: Vec::new(),
            back: Vec::new(),
            remaining: end.saturating_sub(first),
        };
        seek_front(&mut iter.front, &self.root, lower);
        seek_back(&mut iter.back, &self.root, upper);
        iter
    }

    /// Owning iterator over every key starting with `prefix`
    pub fn prefix(&self, prefix: &[u8]) -> Iter<V> {
        match prefix_successor(prefix) {
            Some(end) => self.range(Bound::Included(prefix), Bound::Excluded(&end)),
            None => self.range(Bound::Included(prefix), Bound::Unbounded),
        }
    }
}

/// Smallest key greater than every key with this prefix, if one exists
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

// =============================================================================
// Node construction and rebalancing
// =============================================================================

fn height<V>(link: &Link<V>) -> u8 {
    link.as_ref().map_or(0, |n| n.height)
}

fn len<V>(link: &Link<V>) -> usize {
    link.as_ref().map_or(0, |n| n.len)
}

fn node<V>(key: Bytes, value: V, left: Link<V>, right: Link<V>) -> Arc<Node<V>> {
    Arc::new(Node {
        height: 1 + height(&left).max(height(&right)),
        len: 1 + len(&left) + len(&right),
        key,
        value,
        left,
        right,
    })
}

/// Build a node whose subtrees differ in height by at most 2, restoring the
/// AVL invariant with one single or double rotation
fn balance<V: Clone>(key: Bytes, value: V, left: Link<V>, right: Link<V>) -> Arc<Node<V>> {
    let hl = height(&left);
    let hr = height(&right);

    if hl > hr + 1 {
        if let Some(l) = &left {
            if height(&l.left) >= height(&l.right) {
                let new_right = node(key, value, l.right.clone(), right);
                return node(l.key.clone(), l.value.clone(), l.left.clone(), Some(new_right));
            }
            if let Some(lr) = &l.right {
                let new_left = node(l.key.clone(), l.value.clone(), l.left.clone(), lr.left.clone());
                let new_right = node(key, value, lr.right.clone(), right);
                return node(lr.key.clone(), lr.value.clone(), Some(new_left), Some(new_right));
            }
        }
    } else if hr > hl + 1 {
        if let Some(r) = &right {
            if height(&r.right) >= height(&r.left) {
                let new_left = node(key, value, left, r.left.clone());
                return node(r.key.clone(), r.value.clone(), Some(new_left), r.right.clone());
            }
            if let Some(rl) = &r.left {
                let new_left = node(key, value, left, rl.left.clone());
                let new_right = node(r.key.clone(), r.value.clone(), rl.right.clone(), r.right.clone());
                return node(rl.key.clone(), rl.value.clone(), Some(new_left), Some(new_right));
            }
        }
    }

    node(key, value, left, right)
}

fn insert<V: Clone>(link: &Link<V>, key: Bytes, value: V) -> (Arc<Node<V>>, Option<V>) {
    let Some(n) = link else {
        return (node(key, value, None, None), None);
    };

    match key[..].cmp(&n.key[..]) {
        Ordering::Less => {
            let (left, old) = insert(&n.left, key, value);
            let root = balance(n.key.clone(), n.value.clone(), Some(left), n.right.clone());
            (root, old)
        }
        Ordering::Greater => {
            let (right, old) = insert(&n.right, key, value);
            let root = balance(n.key.clone(), n.value.clone(), n.left.clone(), Some(right));
            (root, old)
        }
        Ordering::Equal => {
            let root = node(n.key.clone(), value, n.left.clone(), n.right.clone());
            (root, Some(n.value.clone()))
        }
    }
}

fn remove<V: Clone>(link: &Link<V>, key: &[u8]) -> Option<(Link<V>, V)> {
    let n = link.as_ref()?;

    match key.cmp(&n.key[..]) {
        Ordering::Less => {
            let (left, old) = remove(&n.left, key)?;
            let root = balance(n.key.clone(), n.value.clone(), left, n.right.clone());
            Some((Some(root), old))
        }
        Ordering::Greater => {
            let (right, old) = remove(&n.right, key)?;
            let root = balance(n.key.clone(), n.value.clone(), n.left.clone(), right);
            Some((Some(root), old))
        }
        Ordering::Equal => Some((join(n.left.clone(), n.right.clone()), n.value.clone())),
    }
}

/// Join two sibling subtrees whose keys are already ordered
fn join<V: Clone>(left: Link<V>, right: Link<V>) -> Link<V> {
    match (left, right) {
        (None, right) => right,
        (left, None) => left,
        (Some(left), Some(right)) => {
            let (rest, key, value) = remove_min(&right);
            Some(balance(key, value, Some(left), rest))
        }
    }
}

fn remove_min<V: Clone>(n: &Arc<Node<V>>) -> (Link<V>, Bytes, V) {
    match &n.left {
        None => (n.right.clone(), n.key.clone(), n.value.clone()),
        Some(left) => {
            let (rest, key, value) = remove_min(left);
            let root = balance(n.key.clone(), n.value.clone(), rest, n.right.clone());
            (Some(root), key, value)
        }
    }
}

fn walk<V, F>(link: &Link<V>, lower: Bound<&[u8]>, upper: Bound<&[u8]>, f: &mut F) -> ControlFlow<()>
where
    F: FnMut(&Bytes, &V) -> ControlFlow<()>,
{
    let Some(n) = link else {
        return ControlFlow::Continue(());
    };
    let key = &n.key[..];

    let above_lower = match lower {
        Bound::Unbounded => true,
        Bound::Included(b) => key >= b,
        Bound::Excluded(b) => key > b,
    };
    let below_upper = match upper {
        Bound::Unbounded => true,
        Bound::Included(b) => key <= b,
        Bound::Excluded(b) => key < b,
    };

    if above_lower && walk(&n.left, lower, upper, f).is_break() {
        return ControlFlow::Break(());
    }
    if above_lower && below_upper && f(&n.key, &n.value).is_break() {
        return ControlFlow::Break(());
    }
    if below_upper {
        return walk(&n.right, lower, upper, f);
    }
    ControlFlow::Continue(())
}

// =============================================================================
// Iteration
// =============================================================================

fn push_left<V>(stack: &mut Vec<Arc<Node<V>>>, mut link: &Link<V>) {
    while let Some(n) = link {
        stack.push(Arc::clone(n));
        link = &n.left;
    }
}

fn push_right<V>(stack: &mut Vec<Arc<Node<V>>>, mut link: &Link<V>) {
    while let Some(n) = link {
        stack.push(Arc::clone(n));
        link = &n.right;
    }
}

/// Number of keys below `key`, counting `key` itself when `inclusive`
fn rank<V>(mut link: &Link<V>, key: &[u8], inclusive: bool) -> usize {
    let mut count = 0;
    while let Some(n) = link {
        let below = match n.key[..].cmp(key) {
            Ordering::Less => true,
            Ordering::Equal => inclusive,
            Ordering::Greater => false,
        };
        if below {
            count += len(&n.left) + 1;
            link = &n.right;
        } else {
            link = &n.left;
        }
    }
    count
}

/// Stack the path to the first key inside `lower`
fn seek_front<V>(stack: &mut Vec<Arc<Node<V>>>, mut link: &Link<V>, lower: Bound<&[u8]>) {
    while let Some(n) = link {
        let inside = match lower {
            Bound::Unbounded => true,
            Bound::Included(k) => &n.key[..] >= k,
            Bound::Excluded(k) => &n.key[..] > k,
        };
        if inside {
            stack.push(Arc::clone(n));
            link = &n.left;
        } else {
            link = &n.right;
        }
    }
}

/// Stack the path to the last key inside `upper`
fn seek_back<V>(stack: &mut Vec<Arc<Node<V>>>, mut link: &Link<V>, upper: Bound<&[u8]>) {
    while let Some(n) = link {
        let inside = match upper {
            Bound::Unbounded => true,
            Bound::Included(k) => &n.key[..] <= k,
            Bound::Excluded(k) => &n.key[..] < k,
        };
        if inside {
            stack.push(Arc::clone(n));
            link = &n.right;
        } else {
            link = &n.left;
        }
    }
}

/// Iterator over `(key, value)` pairs in key order
///
/// Holds its own references to the nodes, so it stays valid while the tree
/// it came from keeps changing.
pub struct Iter<V> {
    front: Vec<Arc<Node<V>>>,
    back: Vec<Arc<Node<V>>>,
    remaining: usize,
}

impl<V: Clone> Iterator for Iter<V> {
    type Item = (Bytes, V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let n = self.front.pop()?;
        push_left(&mut self.front, &n.right);
        self.remaining -= 1;
        Some((n.key.clone(), n.value.clone()))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<V: Clone> DoubleEndedIterator for Iter<V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let n = self.back.pop()?;
        push_right(&mut self.back, &n.left);
        self.remaining -= 1;
        Some((n.key.clone(), n.value.clone()))
    }
}

impl<V: Clone> ExactSizeIterator for Iter<V> {}
