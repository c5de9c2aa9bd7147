//! Open-time configuration for the whole store.

use rocksdb::Options;

/// Tunables accepted when opening a store.
///
/// `rocksdb::Options` is not cloneable, so the pass-through section is
/// modeled as the handful of knobs the engines actually set; every
/// sub-engine builds a fresh `Options` from these values.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Memtable size per column family, in bytes.
    pub write_buffer_size: usize,
    pub max_write_buffer_number: i32,
    pub target_file_size_base: u64,
    pub max_background_jobs: i32,
    /// Block cache capacity in bytes; 0 disables the explicit cache.
    pub block_cache_size: usize,
    /// When false every engine gets its own block cache.
    pub share_block_cache: bool,
    /// Capacity of the per-key write-statistics LRU on each engine.
    pub statistics_max_size: usize,
    /// Accumulated per-key write count that schedules a data-range
    /// compaction for that key; 0 disables the heuristic.
    pub small_compaction_threshold: u64,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            write_buffer_size: 64 * 1024 * 1024,
            max_write_buffer_number: 4,
            target_file_size_base: 64 * 1024 * 1024,
            max_background_jobs: 4,
            block_cache_size: 8 * 1024 * 1024,
            share_block_cache: false,
            statistics_max_size: 0,
            small_compaction_threshold: 5000,
        }
    }
}

impl StoreOptions {
    /// Build the DB-level options every sub-engine opens with.
    pub(crate) fn db_options(&self) -> Options {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_write_buffer_size(self.write_buffer_size);
        opts.set_max_write_buffer_number(self.max_write_buffer_number);
        opts.set_target_file_size_base(self.target_file_size_base);
        opts.set_max_background_jobs(self.max_background_jobs);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }
}
