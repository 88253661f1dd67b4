//! Array/time utilities: binary-search past/future slices, chunking, and k-way merge of
//! already-sorted timestamp arrays (§2: "Array/time utilities").

use crate::model::{ProducerId, Timestamp};

/// Returns the number of leading elements of `sorted` that are `<= at` (i.e. already past
/// relative to `at`), found via binary search (`std::partition_point`, per §9).
pub fn count_past(sorted: &[Timestamp], at: Timestamp) -> usize {
    sorted.partition_point(|t| *t <= at)
}

/// Splits `sorted` into `(past, future)` relative to `at`, where `past` contains every
/// timestamp `<= at`.
pub fn partition_past(sorted: &[Timestamp], at: Timestamp) -> (&[Timestamp], &[Timestamp]) {
    let idx = count_past(sorted, at);
    sorted.split_at(idx)
}

/// Splits a slice into chunks of at most `size` elements. `size == 0` yields the whole slice
/// as a single chunk.
pub fn chunk<T>(items: &[T], size: usize) -> Vec<&[T]> {
    if size == 0 || items.is_empty() {
        return if items.is_empty() {
            Vec::new()
        } else {
            vec![items]
        };
    }
    items.chunks(size).collect()
}

/// K-way merge of already ascending-sorted `(timestamp, producer_id)` streams into a single
/// ascending stream. Used by the sample-mode time-patterns pool (§4.1) and by the live merger's
/// per-cycle flush (§4.3).
pub fn merge_sorted(streams: Vec<Vec<(Timestamp, ProducerId)>>) -> Vec<(Timestamp, ProducerId)> {
    let total: usize = streams.iter().map(|s| s.len()).sum();
    let mut heads: Vec<usize> = vec![0; streams.len()];
    let mut out = Vec::with_capacity(total);

    loop {
        let mut best: Option<usize> = None;
        for (i, s) in streams.iter().enumerate() {
            if heads[i] >= s.len() {
                continue;
            }
            match best {
                None => best = Some(i),
                Some(b) => {
                    if s[heads[i]].0 < streams[b][heads[b]].0 {
                        best = Some(i);
                    }
                }
            }
        }
        match best {
            None => break,
            Some(i) => {
                out.push(streams[i][heads[i]]);
                heads[i] += 1;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(v: i64) -> Timestamp {
        Timestamp(v)
    }

    #[test]
    fn count_past_finds_boundary() {
        let data = vec![ts(1), ts(2), ts(2), ts(5), ts(10)];
        assert_eq!(count_past(&data, ts(2)), 3);
        assert_eq!(count_past(&data, ts(0)), 0);
        assert_eq!(count_past(&data, ts(100)), 5);
    }

    #[test]
    fn partition_past_splits_correctly() {
        let data = vec![ts(1), ts(2), ts(5), ts(10)];
        let (past, future) = partition_past(&data, ts(4));
        assert_eq!(past, &[ts(1), ts(2)]);
        assert_eq!(future, &[ts(5), ts(10)]);
    }

    #[test]
    fn chunk_splits_into_bounded_pieces() {
        let data = vec![1, 2, 3, 4, 5];
        let chunks = chunk(&data, 2);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], &[1, 2]);
        assert_eq!(chunks[2], &[5]);
    }

    #[test]
    fn merge_sorted_is_ascending() {
        let a = vec![(ts(1), 0), (ts(3), 0), (ts(5), 0)];
        let b = vec![(ts(2), 1), (ts(4), 1)];
        let merged = merge_sorted(vec![a, b]);
        let ts_only: Vec<i64> = merged.iter().map(|(t, _)| t.as_micros()).collect();
        assert_eq!(ts_only, vec![1, 2, 3, 4, 5]);
    }
}
