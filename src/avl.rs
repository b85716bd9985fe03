// Copyright 2024 Cloudflare, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A persistent (immutable) AVL tree
//!
//! Every mutation returns a new [AvlMap] and leaves the old one intact. Only the nodes along the
//! path from the root to the modified key are copied, all the other subtrees are shared between
//! the old and the new map through reference counting. Because nothing reachable from a root is
//! ever mutated, any number of threads can read any version of the map without locking.

use std::borrow::Borrow;
use std::cmp::{max, Ordering};
use std::fmt;
use std::sync::Arc;

type Link<K, V> = Option<Arc<Node<K, V>>>;

struct Node<K, V> {
    key: K,
    value: V,
    left: Link<K, V>,
    right: Link<K, V>,
    height: u32,
}

#[inline]
fn height<K, V>(link: &Link<K, V>) -> u32 {
    link.as_ref().map_or(0, |n| n.height)
}

fn make_node<K, V>(key: K, value: V, left: Link<K, V>, right: Link<K, V>) -> Link<K, V> {
    let height = 1 + max(height(&left), height(&right));
    Some(Arc::new(Node {
        key,
        value,
        left,
        right,
        height,
    }))
}

/// An immutable ordered map with structural sharing between versions
pub struct AvlMap<K, V> {
    root: Link<K, V>,
}

// cloning a map is just a reference count bump on the root, no bound on K or V needed
impl<K, V> Clone for AvlMap<K, V> {
    fn clone(&self) -> Self {
        AvlMap {
            root: self.root.clone(),
        }
    }
}

impl<K, V> Default for AvlMap<K, V> {
    fn default() -> Self {
        AvlMap { root: None }
    }
}

impl<K, V> AvlMap<K, V> {
    /// Create an empty [AvlMap]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// The number of entries. This walks the whole tree.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// The height of the tree, 0 for an empty map
    pub fn height(&self) -> u32 {
        height(&self.root)
    }

    /// Whether both maps are the very same version
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (&self.root, &other.root) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    /// Iterate over the entries in key order
    pub fn iter(&self) -> Iter<'_, K, V> {
        let mut iter = Iter { stack: Vec::new() };
        iter.push_left(&self.root);
        iter
    }
}

impl<K: Ord + Clone, V: Clone> AvlMap<K, V> {
    /// Look up the value of the given key
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut link = &self.root;
        while let Some(node) = link {
            match key.cmp(node.key.borrow()) {
                Ordering::Less => link = &node.left,
                Ordering::Greater => link = &node.right,
                Ordering::Equal => return Some(&node.value),
            }
        }
        None
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.get(key).is_some()
    }

    /// Return a new map with `key` set to `value`, replacing any existing value.
    pub fn insert(&self, key: K, value: V) -> Self {
        AvlMap {
            root: insert_link(&self.root, key, value),
        }
    }

    /// Return a new map with `key` set to `value` unless `key` is already present, in which case
    /// the returned map is this same version.
    pub fn insert_if_absent(&self, key: K, value: V) -> Self {
        if self.contains_key(&key) {
            return self.clone();
        }
        self.insert(key, value)
    }

    /// Return a new map without `key`.
    ///
    /// Removing an absent key still returns a new version, equal in content to this one.
    pub fn remove<Q>(&self, key: &Q) -> Self
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        AvlMap {
            root: remove_link(&self.root, key),
        }
    }
}

fn insert_link<K: Ord + Clone, V: Clone>(link: &Link<K, V>, key: K, value: V) -> Link<K, V> {
    let Some(node) = link else {
        return make_node(key, value, None, None);
    };
    match key.cmp(&node.key) {
        Ordering::Less => rebalance(
            node.key.clone(),
            node.value.clone(),
            insert_link(&node.left, key, value),
            node.right.clone(),
        ),
        Ordering::Greater => rebalance(
            node.key.clone(),
            node.value.clone(),
            node.left.clone(),
            insert_link(&node.right, key, value),
        ),
        Ordering::Equal => make_node(key, value, node.left.clone(), node.right.clone()),
    }
}

fn remove_link<K, V, Q>(link: &Link<K, V>, key: &Q) -> Link<K, V>
where
    K: Ord + Clone + Borrow<Q>,
    V: Clone,
    Q: Ord + ?Sized,
{
    let node = link.as_ref()?;
    match key.cmp(node.key.borrow()) {
        Ordering::Less => rebalance(
            node.key.clone(),
            node.value.clone(),
            remove_link(&node.left, key),
            node.right.clone(),
        ),
        Ordering::Greater => rebalance(
            node.key.clone(),
            node.value.clone(),
            node.left.clone(),
            remove_link(&node.right, key),
        ),
        Ordering::Equal => match (&node.left, &node.right) {
            (None, _) => node.right.clone(),
            (_, None) => node.left.clone(),
            (Some(_), Some(right)) => {
                // replace the removed node with its in-order successor
                let successor = leftmost(right);
                rebalance(
                    successor.key.clone(),
                    successor.value.clone(),
                    node.left.clone(),
                    remove_min(&node.right),
                )
            }
        },
    }
}

fn leftmost<K, V>(mut node: &Arc<Node<K, V>>) -> &Arc<Node<K, V>> {
    while let Some(left) = &node.left {
        node = left;
    }
    node
}

fn remove_min<K: Clone, V: Clone>(link: &Link<K, V>) -> Link<K, V> {
    let node = link.as_ref()?;
    match &node.left {
        None => node.right.clone(),
        Some(_) => rebalance(
            node.key.clone(),
            node.value.clone(),
            remove_min(&node.left),
            node.right.clone(),
        ),
    }
}

/* Build a node out of the given parts, rotating when the children's heights differ by 2.
 * The children are themselves balanced, so one single or double rotation is enough. */
fn rebalance<K: Clone, V: Clone>(
    key: K,
    value: V,
    left: Link<K, V>,
    right: Link<K, V>,
) -> Link<K, V> {
    let (lh, rh) = (height(&left), height(&right));
    if lh > rh + 1 {
        if let Some(l) = &left {
            return match &l.right {
                // left-right case
                Some(lr) if height(&l.left) < lr.height => make_node(
                    lr.key.clone(),
                    lr.value.clone(),
                    make_node(l.key.clone(), l.value.clone(), l.left.clone(), lr.left.clone()),
                    make_node(key, value, lr.right.clone(), right),
                ),
                // left-left case
                _ => make_node(
                    l.key.clone(),
                    l.value.clone(),
                    l.left.clone(),
                    make_node(key, value, l.right.clone(), right),
                ),
            };
        }
    } else if rh > lh + 1 {
        if let Some(r) = &right {
            return match &r.left {
                // right-left case
                Some(rl) if height(&r.right) < rl.height => make_node(
                    rl.key.clone(),
                    rl.value.clone(),
                    make_node(key, value, left, rl.left.clone()),
                    make_node(r.key.clone(), r.value.clone(), rl.right.clone(), r.right.clone()),
                ),
                // right-right case
                _ => make_node(
                    r.key.clone(),
                    r.value.clone(),
                    make_node(key, value, left, r.left.clone()),
                    r.right.clone(),
                ),
            };
        }
    }
    make_node(key, value, left, right)
}

/// In-order iterator over an [AvlMap]
pub struct Iter<'a, K, V> {
    stack: Vec<&'a Arc<Node<K, V>>>,
}

impl<'a, K, V> Iter<'a, K, V> {
    fn push_left(&mut self, mut link: &'a Link<K, V>) {
        while let Some(node) = link {
            self.stack.push(node);
            link = &node.left;
        }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.push_left(&node.right);
        Some((&node.key, &node.value))
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for AvlMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}
