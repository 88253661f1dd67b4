//! Relative-time parsing, time-boundary resolution, and sorted-array utilities shared by the
//! timestamp producers and the batcher.

mod bounds;
mod relative;
mod util;

pub use bounds::{resolve_end, resolve_start, Bounds, Mode};
pub use relative::parse_relative;
pub use util::{chunk, count_past, merge_sorted, partition_past};
