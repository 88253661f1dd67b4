//! Batching primitives (§4.2, §4.9): the bounded timestamps queue that feeds Queue A, and the
//! simpler size+timeout batcher the event unit uses for Queue B.

mod generic;
mod timestamps_batcher;

pub use generic::GenericBatcher;
pub use timestamps_batcher::{TimestampsBatcher, TimestampsBatcherConfig};

/// Lower bound on the timestamps batcher's accumulation delay and the live scheduling
/// watcher's poll period (`poll = MIN_BATCH_DELAY / 2`), per §4.2/§4.3/§8.
pub const MIN_BATCH_DELAY: std::time::Duration = std::time::Duration::from_millis(100);
