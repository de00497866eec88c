//! 🧺 The SizeGrouper: carves an ordered listing into bounded groups.
//!
//! One pass, no backtracking, no reordering. Records go in the order the
//! listing produced them and come out in the same order, just with walls
//! between them.
//!
//! ```text
//!   threshold = 10
//!   sizes:   4  4  3 | 12 | 6  5 | 2
//!                    ^    ^      ^   ^
//!            sum > 10  alone  sum>10  leftovers
//! ```
//!
//! ⚠️ The boundary is strict: a running sum of exactly `threshold` keeps the
//! group open. Only "greater than" closes it. Changing this moves every group
//! boundary downstream, so don't.

use crate::common::{Group, SourceRecord};

/// 🧺 Partition `records` into groups whose running size just exceeds `threshold`.
///
/// - `None`: everything lands in one group (and zero records give zero groups).
/// - A record that alone exceeds the threshold flushes the current group and
///   travels solo.
/// - The trailing group may be under threshold. That's fine. Not every group
///   gets to be big.
pub fn group(records: &[SourceRecord], threshold: Option<u64>) -> Vec<Group> {
    let mut groups: Vec<Group> = Vec::new();
    let mut emit = |members: Vec<SourceRecord>| {
        let index = groups.len() as u32 + 1;
        groups.push(Group { index, members });
    };

    let Some(threshold) = threshold else {
        if !records.is_empty() {
            emit(records.to_vec());
        }
        return groups;
    };

    let mut current: Vec<SourceRecord> = Vec::new();
    let mut current_size: u64 = 0;

    for record in records {
        if record.size > threshold {
            // 🚪 Too big to share a group. Close whatever we had, then fly solo.
            if !current.is_empty() {
                emit(std::mem::take(&mut current));
                current_size = 0;
            }
            emit(vec![record.clone()]);
            continue;
        }

        current_size = current_size.saturating_add(record.size);
        current.push(record.clone());
        if current_size > threshold {
            emit(std::mem::take(&mut current));
            current_size = 0;
        }
    }

    if !current.is_empty() {
        emit(current);
    }

    groups
}
