//! Version-vector documents
//!
//! A vector document keeps one revision per remote instead of a tree:
//! the local revision (remote 0) and the latest revision received from
//! each peer. The local vector and body live in the record's `version` and
//! `body` fields; the remote revisions are JSON in `extra`.

mod record;
mod revision;

pub use record::VectorRecord;
pub use revision::Revision;
