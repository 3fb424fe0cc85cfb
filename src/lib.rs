//! aerorev - document revision core
//!
//! Revision trees, version vectors, conflict handling and change tracking
//! for an embedded document store.

pub mod clock;
pub mod config;
pub mod document;
pub mod errors;
pub mod observability;
pub mod rev_tree;
pub mod revid;
pub mod sequence;
pub mod storage;
pub mod vector_record;
pub mod version_vector;
