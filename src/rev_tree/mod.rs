//! Revision trees
//!
//! This module provides:
//! - `RevTree`: an index arena of revisions linked to their parents
//! - `RevFlags` and `Rev`, one node of the tree
//! - The binary tree encoding stored in a record's `extra` field
//! - `RevTreeRecord`, which loads and saves a tree through a transaction
//!
//! # Invariants
//!
//! - Revision IDs are unique within a tree
//! - A child's generation is its parent's plus one
//! - The current revision sorts first: leaves, then live, then
//!   non-conflicting, then the higher revision ID

pub mod codec;
mod record;
mod rev;
mod tree;

pub use record::{RevTreeRecord, SaveResult};
pub use rev::{Rev, RevFlags, RevIndex};
pub use tree::{RevTree, HISTORY_CONFLICT, HISTORY_MALFORMED};
