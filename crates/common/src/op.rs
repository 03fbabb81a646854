// Replicated-edit operations and their total order.
//
// Every item in the replicated text carries a dense position key (a path of
// digits). The global order over items is `(position, originId, siteCounter)`,
// compared lexicographically: concurrent inserts that allocate the same
// position path are tie-broken by origin id ascending, which is what makes
// placement deterministic and commutative across replicas.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Globally unique, causally ordered identifier of a single operation.
///
/// `origin_id` is the editing site (one per client replica), `site_counter`
/// is that site's monotonic operation counter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct OpId {
    pub origin_id: Uuid,
    pub site_counter: u64,
}

/// A dense position path. Lexicographic comparison; a path sorts before all
/// of its extensions, so `[1] < [1, 0] < [1, 5] < [2]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct PositionKey(Vec<u32>);

impl PositionKey {
    pub fn digits(&self) -> &[u32] {
        &self.0
    }

    /// Allocate a key strictly between `left` and `right` (`None` means the
    /// virtual document boundary on that side).
    ///
    /// Walks both paths digit by digit; at the first level with room it takes
    /// the midpoint, otherwise it copies the left digit and descends. Once the
    /// walk branches strictly below the right path the right bound no longer
    /// constrains deeper levels. Midpoints are always >= 1, so no allocated
    /// key ends in a zero digit, which keeps the descent well-founded.
    pub fn between(left: Option<&PositionKey>, right: Option<&PositionKey>) -> PositionKey {
        debug_assert!(
            match (left, right) {
                (Some(l), Some(r)) => l < r,
                _ => true,
            },
            "position allocation requires left < right"
        );

        let left_digits = left.map(|key| key.0.as_slice()).unwrap_or(&[]);
        let right_digits = right.map(|key| key.0.as_slice()).unwrap_or(&[]);

        let mut path = Vec::new();
        let mut right_bounded = true;
        for depth in 0.. {
            let low = left_digits.get(depth).copied().unwrap_or(0);
            let high = if right_bounded {
                right_digits.get(depth).copied().unwrap_or(u32::MAX)
            } else {
                u32::MAX
            };

            if high > low && high - low > 1 {
                path.push(low + (high - low) / 2);
                return PositionKey(path);
            }

            path.push(low);
            if low < high {
                right_bounded = false;
            }
        }
        unreachable!("digit walk always terminates at a level with room")
    }
}

/// An atomic, immutable edit to the replicated text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub origin_id: Uuid,
    pub site_counter: u64,
    #[serde(flatten)]
    pub kind: OpKind,
}

/// Insert places one character at a self-contained position key; delete
/// tombstones the item created by `target` (its only causal dependency).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum OpKind {
    Insert { position: PositionKey, payload: char },
    Delete { target: OpId },
}

impl Operation {
    pub fn id(&self) -> OpId {
        OpId { origin_id: self.origin_id, site_counter: self.site_counter }
    }

    pub fn insert(id: OpId, position: PositionKey, payload: char) -> Self {
        Self {
            origin_id: id.origin_id,
            site_counter: id.site_counter,
            kind: OpKind::Insert { position, payload },
        }
    }

    pub fn delete(id: OpId, target: OpId) -> Self {
        Self {
            origin_id: id.origin_id,
            site_counter: id.site_counter,
            kind: OpKind::Delete { target },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{OpId, OpKind, Operation, PositionKey};
    use uuid::Uuid;

    fn key(digits: &[u32]) -> PositionKey {
        PositionKey(digits.to_vec())
    }

    // ── Position ordering ──────────────────────────────────────────

    #[test]
    fn prefix_sorts_before_extension() {
        assert!(key(&[1]) < key(&[1, 0]));
        assert!(key(&[1, 0]) < key(&[1, 5]));
        assert!(key(&[1, 5]) < key(&[2]));
    }

    #[test]
    fn between_boundaries_yields_interior_key() {
        let mid = PositionKey::between(None, None);
        assert!(!mid.digits().is_empty());
    }

    #[test]
    fn between_is_strictly_ordered() {
        let cases: &[(&[u32], &[u32])] = &[
            (&[1], &[2]),
            (&[1], &[1, 5]),
            (&[3, 7], &[4]),
            (&[1, 9], &[2, 0]),
            (&[1], &[1, 0, 5]),
            (&[2_147_483_647], &[2_147_483_648]),
        ];
        for (left, right) in cases {
            let left = key(left);
            let right = key(right);
            let mid = PositionKey::between(Some(&left), Some(&right));
            assert!(left < mid, "{left:?} < {mid:?} failed");
            assert!(mid < right, "{mid:?} < {right:?} failed");
        }
    }

    #[test]
    fn repeated_allocation_between_neighbors_stays_ordered() {
        let left = PositionKey::between(None, None);
        let right = PositionKey::between(Some(&left), None);
        // Repeatedly insert just before `right`; every key must stay between.
        let mut previous = left.clone();
        for _ in 0..64 {
            let mid = PositionKey::between(Some(&previous), Some(&right));
            assert!(previous < mid && mid < right);
            previous = mid;
        }
        // And just after `left`.
        let mut upper = right;
        for _ in 0..64 {
            let mid = PositionKey::between(Some(&left), Some(&upper));
            assert!(left < mid && mid < upper);
            upper = mid;
        }
    }

    // ── Operation wire shape ───────────────────────────────────────

    #[test]
    fn insert_serializes_with_flat_kind_tag() {
        let id = OpId { origin_id: Uuid::nil(), site_counter: 3 };
        let op = Operation::insert(id, key(&[5]), 'h');
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["kind"], "insert");
        assert_eq!(json["siteCounter"], 3);
        assert_eq!(json["position"], serde_json::json!([5]));
        assert_eq!(json["payload"], "h");

        let back: Operation = serde_json::from_value(json).unwrap();
        assert_eq!(back, op);
    }

    #[test]
    fn delete_serializes_with_target_id() {
        let origin = Uuid::new_v4();
        let id = OpId { origin_id: origin, site_counter: 8 };
        let target = OpId { origin_id: origin, site_counter: 2 };
        let op = Operation::delete(id, target);
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["kind"], "delete");
        assert_eq!(json["target"]["siteCounter"], 2);

        let back: Operation = serde_json::from_value(json).unwrap();
        assert_eq!(back.id(), id);
        assert!(matches!(back.kind, OpKind::Delete { target: t } if t == target));
    }

    #[test]
    fn op_id_orders_by_origin_then_counter() {
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        assert!(OpId { origin_id: a, site_counter: 9 } < OpId { origin_id: b, site_counter: 1 });
        assert!(
            OpId { origin_id: a, site_counter: 1 } < OpId { origin_id: a, site_counter: 2 }
        );
    }
}
