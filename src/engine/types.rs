//! Engine configuration and run statistics

/// How chunk streams from a split query are reassembled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeStrategy {
    /// Row-by-row merge requiring identical stream ordering; flat memory
    #[default]
    Lockstep,
    /// Drain-and-join on key; tolerates ordering skew, buffers the window
    Buffered,
}

/// Tunables for the sync engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Chunk-stream merge strategy
    pub merge_strategy: MergeStrategy,
    /// Window restarts allowed after a primary-key mismatch
    pub max_merge_retries: u32,
    /// First denominator tried when shrinking a too-expensive window
    pub initial_shrink_factor: u32,
    /// Optional LIMIT clause applied to every query
    pub record_limit: Option<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            merge_strategy: MergeStrategy::Lockstep,
            max_merge_retries: 5,
            initial_shrink_factor: 2,
            record_limit: None,
        }
    }
}

/// Counters accumulated over one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Tables fully extracted
    pub tables_synced: u64,
    /// Tables skipped (no fields discovered)
    pub tables_skipped: u64,
    /// Tables that failed without aborting the run
    pub tables_failed: u64,
    /// Records emitted
    pub records_emitted: u64,
}
