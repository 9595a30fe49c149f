//! Batch partitioning.
//!
//! A batch of `L` items is split across `W` workers by bucketing item `i`
//! into chunk `floor(i / (L / W))`, where `L / W` is computed as a real
//! number. When `W` does not divide `L` the chunk sizes alternate rather
//! than front-loading the remainder, e.g. `L = 10, W = 4` yields chunks of
//! 3, 2, 3 and 2 items. When `L < W` every item gets its own chunk.

use serde::{Deserialize, Serialize};

/// Contiguous slice of a batch assigned to one worker for one dispatch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Chunk<T> {
    /// Position of the chunk in the batch, and index of the worker it goes to.
    pub index: usize,
    pub items: Vec<T>,
}

impl<T> Chunk<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Split `batch` into at most `worker_count` ordered chunks.
pub fn partition<T>(batch: Vec<T>, worker_count: usize) -> Vec<Chunk<T>> {
    let len = batch.len();
    if len == 0 || worker_count == 0 {
        return Vec::new();
    }

    let chunk_size = if len < worker_count {
        1.0
    } else {
        len as f64 / worker_count as f64
    };
    let max_chunks = len.min(worker_count);

    let mut chunks: Vec<Chunk<T>> = Vec::with_capacity(max_chunks);
    for (i, item) in batch.into_iter().enumerate() {
        // Float error must never open a chunk past the worker count.
        let bucket = ((i as f64 / chunk_size).floor() as usize).min(max_chunks - 1);
        match chunks.last_mut() {
            Some(chunk) if chunk.index == bucket => chunk.items.push(item),
            _ => chunks.push(Chunk {
                index: bucket,
                items: vec![item],
            }),
        }
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizes<T>(chunks: &[Chunk<T>]) -> Vec<usize> {
        chunks.iter().map(Chunk::len).collect()
    }

    #[test]
    fn test_even_split() {
        let chunks = partition((0..100).collect(), 4);
        assert_eq!(sizes(&chunks), vec![25, 25, 25, 25]);
        assert_eq!(chunks[1].items.first(), Some(&25));
        assert_eq!(chunks[3].items.last(), Some(&99));
    }

    #[test]
    fn test_uneven_split_uses_floor_bucketing() {
        let chunks = partition((0..10).collect(), 4);
        assert_eq!(sizes(&chunks), vec![3, 2, 3, 2]);
        assert_eq!(chunks[0].items, vec![0, 1, 2]);
        assert_eq!(chunks[1].items, vec![3, 4]);
        assert_eq!(chunks[2].items, vec![5, 6, 7]);
        assert_eq!(chunks[3].items, vec![8, 9]);
    }

    #[test]
    fn test_fewer_items_than_workers_gives_singletons() {
        let chunks = partition(vec!['a', 'b', 'c'], 4);
        assert_eq!(sizes(&chunks), vec![1, 1, 1]);
        let indices: Vec<usize> = chunks.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_empty_batch_has_no_chunks() {
        assert!(partition(Vec::<u8>::new(), 4).is_empty());
    }

    #[test]
    fn test_zero_workers_has_no_chunks() {
        assert!(partition(vec![1, 2, 3], 0).is_empty());
    }

    #[test]
    fn test_single_worker_takes_everything() {
        let chunks = partition((0..7).collect(), 1);
        assert_eq!(sizes(&chunks), vec![7]);
    }

    #[test]
    fn test_chunk_count_never_exceeds_workers() {
        for len in 1..200usize {
            for workers in 1..17usize {
                let chunks = partition((0..len).collect(), workers);
                assert_eq!(chunks.len(), len.min(workers), "len={len} workers={workers}");
                let flattened: Vec<usize> =
                    chunks.into_iter().flat_map(|c| c.items).collect();
                assert_eq!(flattened, (0..len).collect::<Vec<_>>());
            }
        }
    }
}
