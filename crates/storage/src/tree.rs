//! Persistent ordered tree keyed by byte strings
//!
//! An AVL tree whose nodes are shared through `Arc` and never mutated once
//! built. Insert and remove copy only the nodes on the path from the root to
//! the change (O(log n) allocations) and share every other subtree with the
//! previous version. Cloning a tree is one `Arc` clone, which is what makes
//! snapshot capture O(1): a reader that holds an old root keeps seeing exactly
//! the tree it captured.
//!
//! Iterators own `Arc`s to the nodes they still have to visit, so they borrow
//! nothing and can outlive the transaction that created them.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

type Link<V> = Option<Arc<Node<V>>>;

struct Node<V> {
    key: Vec<u8>,
    value: V,
    height: u8,
    left: Link<V>,
    right: Link<V>,
}

/// Immutable AVL tree with structural sharing
pub struct Tree<V> {
    root: Link<V>,
    len: usize,
}

impl<V> Clone for Tree<V> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            len: self.len,
        }
    }
}

impl<V> Default for Tree<V> {
    fn default() -> Self {
        Self { root: None, len: 0 }
    }
}

impl<V> fmt::Debug for Tree<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tree").field("len", &self.len).finish()
    }
}

impl<V: Clone> Tree<V> {
    /// Empty tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the tree has no entries
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Exact lookup
    pub fn get(&self, key: &[u8]) -> Option<&V> {
        let mut cur = self.root.as_ref();
        while let Some(node) = cur {
            cur = match key.cmp(node.key.as_slice()) {
                Ordering::Less => node.left.as_ref(),
                Ordering::Greater => node.right.as_ref(),
                Ordering::Equal => return Some(&node.value),
            };
        }
        None
    }

    /// Insert or replace, returning the replaced value
    pub fn insert(&mut self, key: Vec<u8>, value: V) -> Option<V> {
        let (root, old) = insert_rec(&self.root, key, value);
        self.root = Some(root);
        if old.is_none() {
            self.len += 1;
        }
        old
    }

    /// Remove `key`, returning its value
    pub fn remove(&mut self, key: &[u8]) -> Option<V> {
        let (root, old) = remove_rec(&self.root, key)?;
        self.root = root;
        self.len -= 1;
        Some(old)
    }

    /// All entries in ascending key order
    pub fn iter(&self) -> Iter<V> {
        Iter::seek(&self.root, &[], Vec::new())
    }

    /// Entries whose key starts with `prefix`, ascending
    pub fn iter_prefix(&self, prefix: &[u8]) -> Iter<V> {
        Iter::seek(&self.root, prefix, prefix.to_vec())
    }

    /// Entries with key `>= lower`, ascending to the end of the tree
    pub fn iter_from(&self, lower: &[u8]) -> Iter<V> {
        Iter::seek(&self.root, lower, Vec::new())
    }

    /// Entries whose key starts with `prefix`, descending
    pub fn iter_prefix_rev(&self, prefix: &[u8]) -> RevIter<V> {
        RevIter::seek(&self.root, prefix)
    }

    /// Whether both trees are the very same version
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (&self.root, &other.root) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

fn height<V>(link: &Link<V>) -> u8 {
    link.as_ref().map_or(0, |n| n.height)
}

fn make<V>(key: Vec<u8>, value: V, left: Link<V>, right: Link<V>) -> Arc<Node<V>> {
    let height = 1 + height(&left).max(height(&right));
    Arc::new(Node {
        key,
        value,
        height,
        left,
        right,
    })
}

/// Build a node from two subtrees whose heights differ by at most two,
/// rotating once or twice to restore the AVL property.
fn balance<V: Clone>(key: Vec<u8>, value: V, left: Link<V>, right: Link<V>) -> Arc<Node<V>> {
    let hl = height(&left);
    let hr = height(&right);
    if hl > hr + 1 {
        if let Some(l) = &left {
            if height(&l.left) >= height(&l.right) {
                return make(
                    l.key.clone(),
                    l.value.clone(),
                    l.left.clone(),
                    Some(make(key, value, l.right.clone(), right)),
                );
            }
            if let Some(lr) = &l.right {
                return make(
                    lr.key.clone(),
                    lr.value.clone(),
                    Some(make(
                        l.key.clone(),
                        l.value.clone(),
                        l.left.clone(),
                        lr.left.clone(),
                    )),
                    Some(make(key, value, lr.right.clone(), right)),
                );
            }
        }
    } else if hr > hl + 1 {
        if let Some(r) = &right {
            if height(&r.right) >= height(&r.left) {
                return make(
                    r.key.clone(),
                    r.value.clone(),
                    Some(make(key, value, left, r.left.clone())),
                    r.right.clone(),
                );
            }
            if let Some(rl) = &r.left {
                return make(
                    rl.key.clone(),
                    rl.value.clone(),
                    Some(make(key, value, left, rl.left.clone())),
                    Some(make(
                        r.key.clone(),
                        r.value.clone(),
                        rl.right.clone(),
                        r.right.clone(),
                    )),
                );
            }
        }
    }
    make(key, value, left, right)
}

fn insert_rec<V: Clone>(link: &Link<V>, key: Vec<u8>, value: V) -> (Arc<Node<V>>, Option<V>) {
    let Some(node) = link else {
        return (make(key, value, None, None), None);
    };
    let ord = key.as_slice().cmp(node.key.as_slice());
    match ord {
        Ordering::Less => {
            let (left, old) = insert_rec(&node.left, key, value);
            (
                balance(
                    node.key.clone(),
                    node.value.clone(),
                    Some(left),
                    node.right.clone(),
                ),
                old,
            )
        }
        Ordering::Greater => {
            let (right, old) = insert_rec(&node.right, key, value);
            (
                balance(
                    node.key.clone(),
                    node.value.clone(),
                    node.left.clone(),
                    Some(right),
                ),
                old,
            )
        }
        Ordering::Equal => (
            Arc::new(Node {
                key,
                value,
                height: node.height,
                left: node.left.clone(),
                right: node.right.clone(),
            }),
            Some(node.value.clone()),
        ),
    }
}

fn remove_rec<V: Clone>(link: &Link<V>, key: &[u8]) -> Option<(Link<V>, V)> {
    let node = link.as_ref()?;
    match key.cmp(node.key.as_slice()) {
        Ordering::Less => {
            let (left, old) = remove_rec(&node.left, key)?;
            Some((
                Some(balance(
                    node.key.clone(),
                    node.value.clone(),
                    left,
                    node.right.clone(),
                )),
                old,
            ))
        }
        Ordering::Greater => {
            let (right, old) = remove_rec(&node.right, key)?;
            Some((
                Some(balance(
                    node.key.clone(),
                    node.value.clone(),
                    node.left.clone(),
                    right,
                )),
                old,
            ))
        }
        Ordering::Equal => {
            let merged = match (&node.left, &node.right) {
                (None, right) => right.clone(),
                (left, None) => left.clone(),
                (Some(_), Some(right)) => {
                    let (rest, key, value) = remove_min(right);
                    Some(balance(key, value, node.left.clone(), rest))
                }
            };
            Some((merged, node.value.clone()))
        }
    }
}

fn remove_min<V: Clone>(node: &Arc<Node<V>>) -> (Link<V>, Vec<u8>, V) {
    match &node.left {
        None => (node.right.clone(), node.key.clone(), node.value.clone()),
        Some(left) => {
            let (rest, key, value) = remove_min(left);
            (
                Some(balance(
                    node.key.clone(),
                    node.value.clone(),
                    rest,
                    node.right.clone(),
                )),
                key,
                value,
            )
        }
    }
}

/// Smallest byte string greater than every string starting with `prefix`
///
/// `None` when no such bound exists (empty prefix or all `0xFF`).
fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut bound = prefix.to_vec();
    while let Some(last) = bound.pop() {
        if last < u8::MAX {
            bound.push(last + 1);
            return Some(bound);
        }
    }
    None
}

/// A tree entry yielded by the iterators
pub struct Entry<V>(Arc<Node<V>>);

impl<V: Clone> Entry<V> {
    /// Entry key
    pub fn key(&self) -> &[u8] {
        &self.0.key
    }

    /// Entry value
    pub fn value(&self) -> &V {
        &self.0.value
    }

    /// Clone the value out of the entry
    pub fn into_value(self) -> V {
        self.0.value.clone()
    }
}

/// Ascending iterator, optionally bounded to a key prefix
pub struct Iter<V> {
    stack: Vec<Arc<Node<V>>>,
    prefix: Vec<u8>,
}

impl<V> Iter<V> {
    fn seek(root: &Link<V>, lower: &[u8], prefix: Vec<u8>) -> Self {
        let mut stack = Vec::new();
        let mut cur = root.clone();
        while let Some(node) = cur {
            if node.key.as_slice() >= lower {
                cur = node.left.clone();
                stack.push(node);
            } else {
                cur = node.right.clone();
            }
        }
        Self { stack, prefix }
    }
}

impl<V: Clone> Iterator for Iter<V> {
    type Item = Entry<V>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        if !node.key.starts_with(&self.prefix) {
            self.stack.clear();
            return None;
        }
        let mut cur = node.right.clone();
        while let Some(n) = cur {
            cur = n.left.clone();
            self.stack.push(n);
        }
        Some(Entry(node))
    }
}

/// Descending iterator bounded to a key prefix
pub struct RevIter<V> {
    stack: Vec<Arc<Node<V>>>,
    prefix: Vec<u8>,
}

impl<V> RevIter<V> {
    fn seek(root: &Link<V>, prefix: &[u8]) -> Self {
        let upper = prefix_successor(prefix);
        let mut stack = Vec::new();
        let mut cur = root.clone();
        while let Some(node) = cur {
            let below = upper
                .as_deref()
                .map_or(true, |upper| node.key.as_slice() < upper);
            if below {
                cur = node.right.clone();
                stack.push(node);
            } else {
                cur = node.left.clone();
            }
        }
        Self {
            stack,
            prefix: prefix.to_vec(),
        }
    }
}

impl<V: Clone> Iterator for RevIter<V> {
    type Item = Entry<V>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        if !node.key.starts_with(&self.prefix) {
            self.stack.clear();
            return None;
        }
        let mut cur = node.left.clone();
        while let Some(n) = cur {
            cur = n.right.clone();
            self.stack.push(n);
        }
        Some(Entry(node))
    }
}
