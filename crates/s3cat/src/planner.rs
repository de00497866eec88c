//! 🗺️ The PartPlanner: decides which members get copied server-side and which
//! have to take the scenic route through our RAM.
//!
//! S3 refuses multipart parts under 5 MiB (except the last one). So:
//! - big members (> `server_copy_min`) become `copy_part` calls. Zero egress. Chef's kiss.
//! - small members get downloaded, glued together into sub-chunks of roughly
//!   `sub_threshold` bytes, and re-uploaded as regular parts.
//!
//! Both partitions keep group order. Part numbers are handed out from that
//! order, so a sort here would quietly scramble the output.

use crate::common::{Group, SourceRecord};
use crate::grouping;
use crate::units::MIB;

/// 📏 Smallest part S3 accepts for anything but the final part.
pub const SERVER_COPY_MIN: u64 = 5 * MIB;

/// 📏 Default sub-chunk size for buffered members: twice the copy minimum.
pub const DEFAULT_SUB_CHUNK_THRESHOLD: u64 = 2 * SERVER_COPY_MIN;

/// 🗺️ The two piles a group splits into.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartPlan {
    pub copy_eligible: Vec<SourceRecord>,
    pub buffer_eligible: Vec<SourceRecord>,
}

/// 🔀 Stable filter: `size > server_copy_min` copies, everything else buffers.
pub fn plan(group: &Group, server_copy_min: u64) -> PartPlan {
    let (copy_eligible, buffer_eligible) = group
        .members
        .iter()
        .cloned()
        .partition(|record| record.size > server_copy_min);
    PartPlan {
        copy_eligible,
        buffer_eligible,
    }
}

/// 🧺 Sub-chunk the buffered members. Just the SizeGrouper wearing a different hat.
///
/// Each sub-chunk becomes one `upload_part`, so this is what bounds how many
/// small-object bytes a worker holds at once.
pub fn subchunk(buffer_eligible: &[SourceRecord], sub_threshold: u64) -> Vec<Vec<SourceRecord>> {
    grouping::group(buffer_eligible, Some(sub_threshold))
        .into_iter()
        .map(|group| group.members)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_big_fish_and_small_fish_swim_in_separate_tanks() {
        let the_group = Group {
            index: 1,
            members: vec![
                SourceRecord::new("a", 3 * MIB),
                SourceRecord::new("big-1", 7 * MIB),
                SourceRecord::new("b", 3 * MIB),
                SourceRecord::new("edge", SERVER_COPY_MIN),
                SourceRecord::new("big-2", 9 * MIB),
            ],
        };

        let the_plan = plan(&the_group, SERVER_COPY_MIN);
        let copy_keys: Vec<&str> = the_plan.copy_eligible.iter().map(|r| r.key.as_str()).collect();
        let buffer_keys: Vec<&str> = the_plan.buffer_eligible.iter().map(|r| r.key.as_str()).collect();

        assert_eq!(copy_keys, vec!["big-1", "big-2"]);
        // 🎯 exactly 5 MiB is not > 5 MiB, so "edge" takes the buffered route
        assert_eq!(buffer_keys, vec!["a", "b", "edge"]);
    }

    #[test]
    fn the_one_where_small_fish_get_packed_into_ten_mib_crates() {
        let the_smalls: Vec<SourceRecord> = (0..7)
            .map(|i| SourceRecord::new(format!("s{i}"), 4 * MIB))
            .collect();

        let the_crates = subchunk(&the_smalls, DEFAULT_SUB_CHUNK_THRESHOLD);
        let the_shapes: Vec<usize> = the_crates.iter().map(Vec::len).collect();
        // 4+4+4 = 12 > 10 closes a crate; 7 records → 3, 3, 1
        assert_eq!(the_shapes, vec![3, 3, 1]);
        let the_flattened: Vec<SourceRecord> = the_crates.into_iter().flatten().collect();
        assert_eq!(the_flattened, the_smalls);
    }

    #[test]
    fn the_one_where_an_empty_pile_plans_nothing() {
        let the_group = Group {
            index: 3,
            members: vec![],
        };
        assert_eq!(plan(&the_group, SERVER_COPY_MIN), PartPlan::default());
        assert!(subchunk(&[], DEFAULT_SUB_CHUNK_THRESHOLD).is_empty());
    }
}
