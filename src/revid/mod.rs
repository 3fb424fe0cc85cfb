//! Revision identifiers
//!
//! This module provides:
//! - `SourceId`, the 16-byte identity of a writer (all-zero means "me")
//! - `Version`, one writer's timestamp
//! - `TreeRevId`, a `generation-digest` revision-tree identifier
//! - `RevId`, either form, with ASCII and binary codecs
//! - `RemoteId`, the replication counterpart a revision came from
//!
//! # Textual forms
//!
//! | Form | Example |
//! |------|---------|
//! | tree | `3-1f2e3d4c` |
//! | version | `AAECAwQFBgcICQoLDA0ODw@17a3f0000` |
//! | local version | `*@17a3f0000` |

mod remote_id;
mod rev_id;
mod source_id;
mod tree_rev_id;
mod varint;
mod version;

pub use remote_id::RemoteId;
pub use rev_id::RevId;
pub use source_id::SourceId;
pub use tree_rev_id::TreeRevId;
pub use version::Version;
