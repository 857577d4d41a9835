//! # Radix Index
//!
//! The in-memory index of RaxDB: a 256-way radix tree with compressed edge
//! prefixes mapping byte keys to `{size, offset}` record locations in the
//! data table.
//!
//! The index is never persisted. Opening a database walks the data file and
//! rebuilds the tree from the records it finds; every mutation after that
//! happens at transaction commit, which publishes new record locations onto
//! existing (or freshly created) nodes.
//!
//! Node ids are arena indices and remain stable for the life of the tree, so
//! the transaction layer can use them as page-lock keys across its commit
//! window.
//!
//! - `node`: node layout (edges, prefix, entry)
//! - `tree`: descent, insertion, splits, entry publication

mod node;
mod tree;

pub use node::Entry;
pub use tree::Radix;
