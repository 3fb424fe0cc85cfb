//! Per-factory document context
//!
//! Config, clock, tracker and data file shared by every document one factory
//! hands out. The local peer identity is read through the data file.

use std::sync::Arc;

use crate::clock::HybridClock;
use crate::config::VersioningConfig;
use crate::observability::MetricsRegistry;
use crate::revid::SourceId;
use crate::sequence::SharedTracker;
use crate::storage::DataFile;

/// State shared by every document a factory hands out
pub struct DocumentContext {
    data_file: Arc<DataFile>,
    config: VersioningConfig,
    clock: HybridClock,
    tracker: Arc<SharedTracker>,
}

impl DocumentContext {
    pub(crate) fn new(
        data_file: Arc<DataFile>,
        config: VersioningConfig,
        clock: HybridClock,
        tracker: Arc<SharedTracker>,
    ) -> Self {
        Self {
            data_file,
            config,
            clock,
            tracker,
        }
    }

    #[inline]
    pub fn data_file(&self) -> &Arc<DataFile> {
        &self.data_file
    }

    #[inline]
    pub fn config(&self) -> &VersioningConfig {
        &self.config
    }

    #[inline]
    pub fn clock(&self) -> &HybridClock {
        &self.clock
    }

    #[inline]
    pub fn tracker(&self) -> &Arc<SharedTracker> {
        &self.tracker
    }

    #[inline]
    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        self.data_file.metrics()
    }

    /// The local peer's ID, if it has been resolved on this file
    pub fn local_source(&self) -> Option<SourceId> {
        self.data_file.local_source()
    }

    pub(crate) fn resolve_local_source(&self) -> SourceId {
        self.data_file.resolve_local_source()
    }
}
