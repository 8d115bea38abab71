//! Two-level partitioning: caller-sized pages, payload-sized micro-batches

use serde::Serialize;

use crate::config::MicroBatchSettings;
use crate::models::FileDescriptor;

/// One page of the ordered file list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub batch_index: usize,
    /// Inclusive start into the full list
    pub start: usize,
    /// Exclusive end into the full list
    pub end: usize,
    pub total: usize,
    pub has_more: bool,
    pub next_batch_index: Option<usize>,
}

impl Page {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn slice<'a, T>(&self, items: &'a [T]) -> &'a [T] {
        &items[self.start..self.end]
    }
}

/// Compute page `batch_index` of `total` files.
///
/// A page past the end is empty with `has_more = false`. `batch_size` of
/// zero is treated as one.
pub fn partition(total: usize, batch_index: usize, batch_size: usize) -> Page {
    let batch_size = batch_size.max(1);
    let start = batch_index.saturating_mul(batch_size).min(total);
    let end = start.saturating_add(batch_size).min(total);
    let has_more = end < total;
    Page {
        batch_index,
        start,
        end,
        total,
        has_more,
        next_batch_index: has_more.then_some(batch_index + 1),
    }
}

/// Number of files per micro-batch for this page.
///
/// Large payloads go one per call, medium two, small three.
pub fn micro_batch_width(files: &[FileDescriptor], thresholds: &MicroBatchSettings) -> usize {
    if files.is_empty() {
        return 1;
    }
    let max = files.iter().map(|f| f.size).max().unwrap_or(0);
    let avg = files.iter().map(|f| f.size).sum::<u64>() / files.len() as u64;

    if max > thresholds.large_max_bytes || avg > thresholds.large_avg_bytes {
        1
    } else if max > thresholds.medium_max_bytes || avg > thresholds.medium_avg_bytes {
        2
    } else {
        3
    }
}

/// Split a page into micro-batches, preserving order
pub fn micro_batches<'a>(
    files: &'a [FileDescriptor],
    thresholds: &MicroBatchSettings,
) -> Vec<&'a [FileDescriptor]> {
    let width = micro_batch_width(files, thresholds);
    files.chunks(width).collect()
}
