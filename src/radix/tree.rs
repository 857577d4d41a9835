//! # Radix Tree
//!
//! This module implements [`Radix`], the in-memory index mapping arbitrary
//! byte keys to record locations in the data table. The tree is 256-way with
//! compressed edge prefixes, rebuilt from the data file on every open and
//! never persisted.
//!
//! ## Descent
//!
//! Lookup and insert share one descent: starting at the root, follow the
//! edge labelled by the next key byte, then consume the child's prefix. The
//! descent ends in one of three states:
//!
//! - the key is fully consumed at a node (match if the node is a leaf)
//! - no edge exists for the next byte (key absent; insert chains new nodes)
//! - the key diverges inside a node's prefix (insert splits the node)
//!
//! ## Splits
//!
//! A split carves a node's prefix at the divergence point `dv`:
//!
//! ```text
//!            before                     after (three-way)
//!    parent ──x──> N("abcdef")    parent ──x──> I("ab")
//!                                           'c'──> N("def")   (existing)
//!                                           'q'──> L("...")   (new key)
//! ```
//!
//! The new intermediate takes a fresh arena id and the parent edge is
//! repointed at it; the existing node keeps its id with a trimmed prefix.
//! Ids handed out for a key therefore stay valid across later splits, which
//! the commit protocol's per-node locks rely on. When the new key ends
//! exactly at the divergence point the intermediate itself becomes its leaf
//! (two-way split).
//!
//! Key remainders longer than `MAX_PREFIX` are chained across several nodes,
//! each holding one edge byte plus at most `MAX_PREFIX - 1` prefix bytes.
//!
//! ## Concurrency
//!
//! The arena sits behind a `RwLock`: lookups share it, structural inserts
//! and entry updates take it exclusively. Per-key commit ordering is *not*
//! this lock's job — the transaction layer holds exclusive page locks on
//! node ids across its conflict window.

use parking_lot::RwLock;

use super::node::{Entry, Node, NO_NODE};
use crate::config::MAX_PREFIX;

const ROOT: u32 = 0;

/// Outcome of a descent: the node where it stopped, how it is attached, how
/// much of the key was consumed, and how far into the node's prefix the key
/// agreed.
struct Descent {
    node: u32,
    parent: u32,
    edge: u8,
    consumed: usize,
    divergence: usize,
}

#[derive(Debug)]
pub struct Radix {
    nodes: RwLock<Vec<Node>>,
}

impl Default for Radix {
    fn default() -> Self {
        Self::new()
    }
}

impl Radix {
    /// Creates a tree holding only the root.
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(vec![Node::new()]),
        }
    }

    /// Returns the record location for `key`, if present.
    pub fn lookup(&self, key: &[u8]) -> Option<Entry> {
        let nodes = self.nodes.read();
        let d = descend(&nodes, key);

        let node = &nodes[d.node as usize];
        if d.consumed == key.len() && d.divergence == node.prefix().len() && node.is_leaf() {
            return Some(node.entry());
        }

        None
    }

    /// Finds or creates the node for `key` and returns its arena id. The id
    /// is stable for the life of the tree; a node created here carries no
    /// entry until [`Radix::set_entry`] publishes one.
    pub fn ensure(&self, key: &[u8]) -> u32 {
        let mut nodes = self.nodes.write();
        ensure_node(&mut nodes, key)
    }

    /// Inserts `key` pointing at `entry` in one step. Reload uses this while
    /// rebuilding the index from the data file.
    pub fn insert(&self, key: &[u8], entry: Entry) {
        let mut nodes = self.nodes.write();
        let id = ensure_node(&mut nodes, key);
        nodes[id as usize].set_entry(entry);
    }

    /// Current record location stored on a node.
    pub fn entry_of(&self, id: u32) -> Entry {
        self.nodes.read()[id as usize].entry()
    }

    /// Points a node at a new record. Commit calls this after patching
    /// headers, making the new version visible to subsequent lookups.
    pub fn set_entry(&self, id: u32, entry: Entry) {
        self.nodes.write()[id as usize].set_entry(entry);
    }

    /// Number of nodes beneath the root.
    pub fn len(&self) -> usize {
        self.nodes.read().len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Walks the tree as far as `key` allows.
fn descend(nodes: &[Node], key: &[u8]) -> Descent {
    let mut node = ROOT;
    let mut parent = ROOT;
    let mut edge = 0u8;
    let mut consumed = 0usize;

    while consumed < key.len() {
        let next = nodes[node as usize].edge(key[consumed]);
        if next == NO_NODE {
            break;
        }

        parent = node;
        edge = key[consumed];
        node = next;
        consumed += 1;

        let prefix = nodes[node as usize].prefix();
        if !prefix.is_empty() {
            let dv = common_prefix_len(prefix, &key[consumed..]);
            if dv < prefix.len() {
                // Key diverges (or ends) inside this node's prefix.
                return Descent {
                    node,
                    parent,
                    edge,
                    consumed,
                    divergence: dv,
                };
            }
            consumed += dv;
        }
    }

    let divergence = nodes[node as usize].prefix().len();
    Descent {
        node,
        parent,
        edge,
        consumed,
        divergence,
    }
}

fn ensure_node(nodes: &mut Vec<Node>, key: &[u8]) -> u32 {
    let d = descend(nodes, key);

    if d.divergence < nodes[d.node as usize].prefix().len() {
        split(nodes, &d, key)
    } else if d.consumed == key.len() {
        d.node
    } else {
        chain(nodes, d.node, &key[d.consumed..])
    }
}

/// Attaches `remainder` beneath `parent` as a chain of nodes, one edge byte
/// plus up to `MAX_PREFIX - 1` prefix bytes per link, and returns the final
/// node's id.
fn chain(nodes: &mut Vec<Node>, parent: u32, remainder: &[u8]) -> u32 {
    debug_assert!(!remainder.is_empty());

    let mut parent = parent;
    let mut node = parent;

    for segment in remainder.chunks(MAX_PREFIX) {
        node = alloc(nodes, Node::with_prefix(&segment[1..]));
        nodes[parent as usize].set_edge(segment[0], node);
        parent = node;
    }

    node
}

/// Splits `d.node`'s prefix at the divergence point and attaches the key's
/// remainder. Returns the id of the key's node.
fn split(nodes: &mut Vec<Node>, d: &Descent, key: &[u8]) -> u32 {
    let existing = d.node;
    let prefix: Vec<u8> = nodes[existing as usize].prefix().to_vec();
    let dv = d.divergence;

    // The intermediate adopts the shared head of the prefix; the existing
    // node stays at its id with the tail (the byte at dv becomes its edge).
    let intermediate = alloc(nodes, Node::with_prefix(&prefix[..dv]));
    nodes[intermediate as usize].set_edge(prefix[dv], existing);
    nodes[d.parent as usize].set_edge(d.edge, intermediate);
    nodes[existing as usize].set_prefix(&prefix[dv + 1..]);

    let remainder = &key[d.consumed..];
    if remainder.len() == dv {
        // The key ends at the divergence point: the intermediate is its node.
        intermediate
    } else {
        chain(nodes, intermediate, &remainder[dv..])
    }
}

fn alloc(nodes: &mut Vec<Node>, node: Node) -> u32 {
    let id = nodes.len() as u32;
    nodes.push(node);
    id
}

/// Length of the shared head of `prefix` and `key`.
fn common_prefix_len(prefix: &[u8], key: &[u8]) -> usize {
    prefix
        .iter()
        .zip(key)
        .take_while(|(a, b)| a == b)
        .count()
}
