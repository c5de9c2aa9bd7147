//! One step of the stitched keyspace SCAN, as produced by each engine.

/// Result of scanning one engine's meta keyspace with a visit budget.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    /// Live keys that matched the pattern.
    pub keys: Vec<Vec<u8>>,
    /// Unused visit budget; 0 means the step stopped on the budget.
    pub leftover: i64,
    /// Key to resume from when `finished` is false.
    pub next_key: Vec<u8>,
    /// True when the engine's keyspace is exhausted for this pattern.
    pub finished: bool,
}

impl ScanOutcome {
    pub fn new(budget: i64) -> Self {
        Self {
            keys: Vec::new(),
            leftover: budget,
            next_key: Vec::new(),
            finished: true,
        }
    }
}
