//! Dense ordering of posts that share a meta key.
//!
//! A group is every post of one type carrying a numeric value for one meta key
//! (for example the featured list). Positions in a compact group are `1..=N`.
//! [`plan_move`] computes the row updates for one insert, move or removal;
//! applying them is the storage layer's job.

use serde::{Deserialize, Serialize};

/// Where the caller wants the post to end up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestedPosition {
    /// A 1-based position; values past the end of the group append.
    At(u64),
    /// The end of the group.
    End,
    /// Take the post out of the group.
    Remove,
}

/// One member of a group as read from the meta table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupEntry {
    pub meta_id: u64,
    pub owner_id: u64,
    pub position: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionShift {
    pub meta_id: u64,
    pub owner_id: u64,
    pub from: u64,
    pub to: u64,
}

/// What happens to the moved post's own position record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnPosition {
    Keep,
    Set(u64),
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RerankPlan {
    pub shifts: Vec<PositionShift>,
    pub own: OwnPosition,
}

impl RerankPlan {
    pub fn noop() -> Self {
        Self {
            shifts: Vec::new(),
            own: OwnPosition::Keep,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.shifts.is_empty() && self.own == OwnPosition::Keep
    }
}

/// Build a group from raw `(meta_id, owner_id, meta_value)` records.
///
/// Only an owner's first record (lowest `meta_id`) counts, and only when its
/// value is a positive integer. Members come back in position order.
pub fn collect_group<'a, I>(records: I) -> Vec<GroupEntry>
where
    I: IntoIterator<Item = (u64, u64, Option<&'a str>)>,
{
    let mut records: Vec<(u64, u64, Option<&str>)> = records.into_iter().collect();
    records.sort_by_key(|(meta_id, _, _)| *meta_id);

    let mut seen = std::collections::HashSet::new();
    let mut entries: Vec<GroupEntry> = records
        .into_iter()
        .filter(|(_, owner_id, _)| seen.insert(*owner_id))
        .filter_map(|(meta_id, owner_id, value)| {
            let position = value?.trim().parse::<u64>().ok().filter(|position| *position > 0)?;
            Some(GroupEntry {
                meta_id,
                owner_id,
                position,
            })
        })
        .collect();
    entries.sort_by_key(|entry| (entry.position, entry.meta_id));
    entries
}

/// Stands in for "not in the group" on the old side and "out of the group" on
/// the new side, so inserts and removals reuse the up/down shift rules.
const OUTSIDE: u64 = u64::MAX;

/// Plan moving `owner_id` within `group` to `requested`.
pub fn plan_move(group: &[GroupEntry], owner_id: u64, requested: RequestedPosition) -> RerankPlan {
    let current = group
        .iter()
        .find(|entry| entry.owner_id == owner_id)
        .map(|entry| entry.position);
    let old = current.unwrap_or(OUTSIDE);

    let max = group.iter().map(|entry| entry.position).max().unwrap_or(0);
    // A member can move up to the last slot; a newcomer can take one past it.
    let last_slot = if current.is_some() { max } else { max + 1 };

    let target = match requested {
        RequestedPosition::Remove => OUTSIDE,
        RequestedPosition::End => last_slot,
        RequestedPosition::At(position) => position.clamp(1, last_slot),
    };

    if target == old {
        return RerankPlan::noop();
    }

    let mut affected: Vec<&GroupEntry> = group
        .iter()
        .filter(|entry| entry.owner_id != owner_id)
        .filter(|entry| {
            if target < old {
                entry.position >= target && entry.position < old
            } else {
                entry.position > old && entry.position <= target
            }
        })
        .collect();
    affected.sort_by_key(|entry| (entry.position, entry.meta_id));

    let shifts = affected
        .into_iter()
        .map(|entry| PositionShift {
            meta_id: entry.meta_id,
            owner_id: entry.owner_id,
            from: entry.position,
            to: if target < old {
                entry.position + 1
            } else {
                entry.position - 1
            },
        })
        .collect();

    let own = if target == OUTSIDE {
        OwnPosition::Delete
    } else {
        OwnPosition::Set(target)
    };

    RerankPlan { shifts, own }
}

/// Apply a plan to an in-memory snapshot; used by the memory store and tests.
pub fn apply_to_snapshot(
    group: &[GroupEntry],
    owner_id: u64,
    plan: &RerankPlan,
    next_meta_id: u64,
) -> Vec<GroupEntry> {
    let mut entries: Vec<GroupEntry> = group
        .iter()
        .map(|entry| {
            let shifted = plan
                .shifts
                .iter()
                .find(|shift| shift.meta_id == entry.meta_id)
                .map(|shift| shift.to)
                .unwrap_or(entry.position);
            GroupEntry {
                position: shifted,
                ..*entry
            }
        })
        .collect();

    match plan.own {
        OwnPosition::Keep => {}
        OwnPosition::Delete => entries.retain(|entry| entry.owner_id != owner_id),
        OwnPosition::Set(position) => {
            match entries.iter_mut().find(|entry| entry.owner_id == owner_id) {
                Some(entry) => entry.position = position,
                None => entries.push(GroupEntry {
                    meta_id: next_meta_id,
                    owner_id,
                    position,
                }),
            }
        }
    }
    entries.sort_by_key(|entry| entry.position);
    entries
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const A: u64 = 10;
    const B: u64 = 20;
    const C: u64 = 30;
    const D: u64 = 40;

    fn group(members: &[(u64, u64)]) -> Vec<GroupEntry> {
        members
            .iter()
            .enumerate()
            .map(|(index, (owner_id, position))| GroupEntry {
                meta_id: index as u64 + 1,
                owner_id: *owner_id,
                position: *position,
            })
            .collect()
    }

    fn positions(entries: &[GroupEntry]) -> Vec<(u64, u64)> {
        entries
            .iter()
            .map(|entry| (entry.owner_id, entry.position))
            .collect()
    }

    fn run(members: &[(u64, u64)], owner: u64, requested: RequestedPosition) -> Vec<(u64, u64)> {
        let group = group(members);
        let plan = plan_move(&group, owner, requested);
        positions(&apply_to_snapshot(&group, owner, &plan, 99))
    }

    #[test]
    fn moving_last_item_to_front_shifts_others_down_the_list() {
        assert_eq!(
            run(&[(A, 1), (B, 2), (C, 3)], C, RequestedPosition::At(1)),
            vec![(C, 1), (A, 2), (B, 3)]
        );
    }

    #[test]
    fn removing_an_item_closes_the_gap() {
        let members = group(&[(A, 1), (B, 2), (C, 3)]);
        let plan = plan_move(&members, B, RequestedPosition::Remove);
        assert_eq!(plan.own, OwnPosition::Delete);
        assert_eq!(
            plan.shifts,
            vec![PositionShift {
                meta_id: 3,
                owner_id: C,
                from: 3,
                to: 2
            }]
        );
        assert_eq!(
            positions(&apply_to_snapshot(&members, B, &plan, 99)),
            vec![(A, 1), (C, 2)]
        );
    }

    #[test]
    fn inserting_at_end_appends() {
        assert_eq!(
            run(&[(A, 1), (B, 2)], D, RequestedPosition::End),
            vec![(A, 1), (B, 2), (D, 3)]
        );
    }

    #[test]
    fn inserting_into_empty_group_starts_at_one() {
        assert_eq!(run(&[], D, RequestedPosition::End), vec![(D, 1)]);
        assert_eq!(run(&[], D, RequestedPosition::At(5)), vec![(D, 1)]);
    }

    #[test]
    fn inserting_in_the_middle_pushes_the_tail() {
        assert_eq!(
            run(&[(A, 1), (B, 2), (C, 3)], D, RequestedPosition::At(2)),
            vec![(A, 1), (D, 2), (B, 3), (C, 4)]
        );
    }

    #[test]
    fn moving_down_pulls_the_range_up() {
        assert_eq!(
            run(&[(A, 1), (B, 2), (C, 3), (D, 4)], A, RequestedPosition::At(3)),
            vec![(B, 1), (C, 2), (A, 3), (D, 4)]
        );
    }

    #[test]
    fn member_moved_to_end_takes_last_slot() {
        assert_eq!(
            run(&[(A, 1), (B, 2), (C, 3)], A, RequestedPosition::End),
            vec![(B, 1), (C, 2), (A, 3)]
        );
        assert_eq!(
            run(&[(A, 1), (B, 2), (C, 3)], A, RequestedPosition::At(40)),
            vec![(B, 1), (C, 2), (A, 3)]
        );
    }

    #[test]
    fn same_position_and_absent_removal_are_noops() {
        let members = group(&[(A, 1), (B, 2)]);
        assert!(plan_move(&members, B, RequestedPosition::At(2)).is_noop());
        assert!(plan_move(&members, D, RequestedPosition::Remove).is_noop());
    }

    #[test]
    fn shifts_are_in_ascending_position_order() {
        let members = group(&[(D, 4), (C, 3), (B, 2), (A, 1)]);
        let plan = plan_move(&members, D, RequestedPosition::At(1));
        let order: Vec<u64> = plan.shifts.iter().map(|shift| shift.from).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn collect_group_keeps_first_positive_record_per_owner() {
        let records = vec![
            (5, B, Some("2")),
            (1, A, Some("1")),
            (7, B, Some("9")),
            (3, C, Some("not a number")),
            (4, D, Some("0")),
        ];
        let group = collect_group(records);
        assert_eq!(positions(&group), vec![(A, 1), (B, 2)]);
        assert_eq!(group[1].meta_id, 5);
    }

    fn requested_strategy() -> impl Strategy<Value = RequestedPosition> {
        prop_oneof![
            Just(RequestedPosition::Remove),
            Just(RequestedPosition::End),
            (0u64..15).prop_map(RequestedPosition::At),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn any_move_sequence_keeps_positions_dense(
            moves in prop::collection::vec((1u64..=12, requested_strategy()), 1..120)
        ) {
            let mut entries: Vec<GroupEntry> = Vec::new();
            for (step, (owner, requested)) in moves.into_iter().enumerate() {
                let plan = plan_move(&entries, owner, requested);
                entries = apply_to_snapshot(&entries, owner, &plan, step as u64 + 1);

                let mut seen: Vec<u64> = entries.iter().map(|entry| entry.position).collect();
                seen.sort_unstable();
                let expected: Vec<u64> = (1..=entries.len() as u64).collect();
                prop_assert_eq!(seen, expected, "gap after {:?}", requested);

                let mut owners: Vec<u64> = entries.iter().map(|entry| entry.owner_id).collect();
                owners.sort_unstable();
                owners.dedup();
                prop_assert_eq!(owners.len(), entries.len());
            }
        }

        #[test]
        fn moved_owner_lands_where_requested(
            size in 0usize..10,
            owner in 1u64..=12,
            requested in requested_strategy(),
        ) {
            let members: Vec<(u64, u64)> = (1..=size as u64).map(|n| (n, n)).collect();
            let after = run(&members, owner, requested);
            let landed = after
                .iter()
                .find(|(id, _)| *id == owner)
                .map(|(_, position)| *position);
            match requested {
                RequestedPosition::Remove => prop_assert_eq!(landed, None),
                RequestedPosition::End => prop_assert_eq!(landed, Some(after.len() as u64)),
                RequestedPosition::At(at) => {
                    let expected = at.clamp(1, after.len() as u64);
                    prop_assert_eq!(landed, Some(expected));
                }
            }
        }
    }
}
