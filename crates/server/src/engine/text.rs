// Replicated text store.
//
// The document is an ordered sequence of character items, each tagged with
// the id of the operation that created it and a tombstone flag. Items are
// kept sorted by `(position, op id)`; applying a set of operations is set
// union plus ordered insertion, so replicas converge for every causally
// consistent delivery order.
//
// Deletes tombstone their target instead of removing it, which keeps
// positions stable for concurrently in-flight operations over the same
// region. A delete whose target insert has not arrived yet is buffered and
// retried; if the dependency never shows up within the orphan TTL the delete
// is dropped and reported, never applied destructively.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use uuid::Uuid;

use coedit_common::op::{OpId, OpKind, Operation, PositionKey};

/// How long a buffered operation may wait for its causal dependency.
pub const DEFAULT_ORPHAN_TTL_SECS: i64 = 10;

#[derive(Debug, Clone)]
struct Item {
    id: OpId,
    position: PositionKey,
    payload: char,
    deleted: bool,
}

#[derive(Debug, Clone)]
struct PendingOp {
    op: Operation,
    buffered_at: DateTime<Utc>,
}

/// Outcome of a single `apply` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The operation changed state and must be broadcast.
    Applied,
    /// The operation id was already present; no-op.
    Duplicate,
    /// The operation's causal dependency is missing; it was buffered.
    Buffered,
}

/// Result of merging one remote operation.
#[derive(Debug)]
pub struct MergeResult {
    pub outcome: MergeOutcome,
    /// Previously buffered operations that became applicable as a
    /// consequence. Each of these needs a broadcast of its own.
    pub flushed: Vec<Operation>,
}

impl MergeResult {
    pub fn applied(&self) -> bool {
        self.outcome == MergeOutcome::Applied
    }
}

/// One file's convergent text state.
pub struct TextCrdt {
    site: Uuid,
    next_counter: u64,
    items: Vec<Item>,
    seen: HashSet<OpId>,
    /// Applied operations in local arrival order. Arrival order is causally
    /// consistent by construction (a delete is only applied after its
    /// insert), so replaying the log brings a fresh replica up to date.
    log: Vec<Operation>,
    pending: Vec<PendingOp>,
    orphan_ttl: Duration,
}

impl TextCrdt {
    pub fn new(site: Uuid) -> Self {
        Self::with_orphan_ttl(site, Duration::seconds(DEFAULT_ORPHAN_TTL_SECS))
    }

    pub fn with_orphan_ttl(site: Uuid, orphan_ttl: Duration) -> Self {
        Self {
            site,
            next_counter: 0,
            items: Vec::new(),
            seen: HashSet::new(),
            log: Vec::new(),
            pending: Vec::new(),
            orphan_ttl,
        }
    }

    /// Seed a fresh document with existing persisted content. The seeding
    /// inserts originate from this replica's own site id and become part of
    /// the replay log like any other edit.
    pub fn with_content(site: Uuid, content: &str) -> Self {
        let mut crdt = Self::new(site);
        crdt.local_insert(0, content);
        crdt
    }

    /// Merge one operation into the document. Commutative, associative, and
    /// idempotent: re-applying a known op id is a no-op.
    pub fn apply(&mut self, op: Operation, now: DateTime<Utc>) -> MergeResult {
        match self.apply_once(&op) {
            ApplyStep::Applied => {
                let flushed = self.retry_pending();
                MergeResult { outcome: MergeOutcome::Applied, flushed }
            }
            ApplyStep::Duplicate => {
                MergeResult { outcome: MergeOutcome::Duplicate, flushed: Vec::new() }
            }
            ApplyStep::MissingDependency => {
                self.pending.push(PendingOp { op, buffered_at: now });
                MergeResult { outcome: MergeOutcome::Buffered, flushed: Vec::new() }
            }
        }
    }

    /// Drop buffered operations whose causal dependency has not arrived
    /// within the orphan TTL. Returns the dropped orphans for diagnostics.
    pub fn expire_orphans(&mut self, now: DateTime<Utc>) -> Vec<Operation> {
        let ttl = self.orphan_ttl;
        let mut dropped = Vec::new();
        self.pending.retain(|pending| {
            if now - pending.buffered_at > ttl {
                dropped.push(pending.op.clone());
                false
            } else {
                true
            }
        });
        dropped
    }

    /// Tombstone-filtered materialization of the current state.
    pub fn text(&self) -> String {
        self.items.iter().filter(|item| !item.deleted).map(|item| item.payload).collect()
    }

    /// Number of visible (non-tombstoned) characters.
    pub fn visible_len(&self) -> usize {
        self.items.iter().filter(|item| !item.deleted).count()
    }

    /// All applied operations in arrival order, for replaying to a late
    /// joiner.
    pub fn operation_log(&self) -> Vec<Operation> {
        self.log.clone()
    }

    pub fn buffered_len(&self) -> usize {
        self.pending.len()
    }

    /// Generate and apply insert operations for `text` at the given visible
    /// index. Returns the operations for broadcast.
    pub fn local_insert(&mut self, index: usize, text: &str) -> Vec<Operation> {
        let mut index = index.min(self.visible_len());
        let mut ops = Vec::with_capacity(text.chars().count());
        for ch in text.chars() {
            let (left, right) = self.visible_neighbors(index);
            let position = PositionKey::between(left.as_ref(), right.as_ref());
            let op = Operation::insert(self.next_id(), position, ch);
            let result = self.apply(op.clone(), Utc::now());
            debug_assert!(result.applied());
            ops.push(op);
            index += 1;
        }
        ops
    }

    /// Generate and apply delete operations tombstoning `len` visible
    /// characters starting at `index`. Returns the operations for broadcast.
    pub fn local_delete(&mut self, index: usize, len: usize) -> Vec<Operation> {
        let targets: Vec<OpId> = self
            .items
            .iter()
            .filter(|item| !item.deleted)
            .skip(index)
            .take(len)
            .map(|item| item.id)
            .collect();

        let mut ops = Vec::with_capacity(targets.len());
        for target in targets {
            let op = Operation::delete(self.next_id(), target);
            let result = self.apply(op.clone(), Utc::now());
            debug_assert!(result.applied());
            ops.push(op);
        }
        ops
    }

    fn next_id(&mut self) -> OpId {
        self.next_counter += 1;
        OpId { origin_id: self.site, site_counter: self.next_counter }
    }

    fn visible_neighbors(&self, index: usize) -> (Option<PositionKey>, Option<PositionKey>) {
        let mut left = None;
        let mut seen_visible = 0usize;
        for item in &self.items {
            if item.deleted {
                continue;
            }
            if seen_visible == index {
                return (left, Some(item.position.clone()));
            }
            left = Some(item.position.clone());
            seen_visible += 1;
        }
        (left, None)
    }

    fn apply_once(&mut self, op: &Operation) -> ApplyStep {
        if self.seen.contains(&op.id()) {
            return ApplyStep::Duplicate;
        }

        match &op.kind {
            OpKind::Insert { position, payload } => {
                let id = op.id();
                let at = self
                    .items
                    .partition_point(|item| (&item.position, &item.id) < (position, &id));
                self.items.insert(
                    at,
                    Item { id, position: position.clone(), payload: *payload, deleted: false },
                );
            }
            OpKind::Delete { target } => {
                let Some(item) = self.items.iter_mut().find(|item| item.id == *target) else {
                    return ApplyStep::MissingDependency;
                };
                item.deleted = true;
            }
        }

        self.seen.insert(op.id());
        self.log.push(op.clone());
        ApplyStep::Applied
    }

    // Deletes cannot unblock other deletes, so one pass over the buffer is
    // enough after any successful apply.
    fn retry_pending(&mut self) -> Vec<Operation> {
        let mut flushed = Vec::new();
        let mut index = 0;
        while index < self.pending.len() {
            let op = self.pending[index].op.clone();
            match self.apply_once(&op) {
                ApplyStep::Applied => {
                    self.pending.remove(index);
                    flushed.push(op);
                }
                ApplyStep::Duplicate => {
                    self.pending.remove(index);
                }
                ApplyStep::MissingDependency => {
                    index += 1;
                }
            }
        }
        flushed
    }
}

enum ApplyStep {
    Applied,
    Duplicate,
    MissingDependency,
}

#[cfg(test)]
mod tests {
    use super::{MergeOutcome, TextCrdt};
    use chrono::{Duration, Utc};
    use coedit_common::op::Operation;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use uuid::Uuid;

    fn site(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn apply_all(crdt: &mut TextCrdt, ops: &[Operation]) {
        let now = Utc::now();
        for op in ops {
            crdt.apply(op.clone(), now);
        }
    }

    // ── Convergence ────────────────────────────────────────────────

    #[test]
    fn all_permutations_of_concurrent_edits_converge() {
        // Site A types a base text; B and C edit concurrently on top of it.
        let mut a = TextCrdt::new(site(1));
        let base = a.local_insert(0, "hello world");

        let mut b = TextCrdt::new(site(2));
        apply_all(&mut b, &base);
        let mut c = TextCrdt::new(site(3));
        apply_all(&mut c, &base);

        let b_ops = {
            let mut ops = b.local_insert(5, "!");
            ops.extend(b.local_delete(0, 2));
            ops
        };
        let c_ops = {
            let mut ops = c.local_insert(11, "?");
            ops.extend(c.local_insert(0, "> "));
            ops
        };

        let mut all_ops = base;
        all_ops.extend(b_ops);
        all_ops.extend(c_ops);

        let reference = {
            let mut replica = TextCrdt::new(site(99));
            apply_all(&mut replica, &all_ops);
            replica.text()
        };

        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        for _ in 0..100 {
            let mut shuffled = all_ops.clone();
            shuffled.shuffle(&mut rng);
            let mut replica = TextCrdt::new(site(100));
            apply_all(&mut replica, &shuffled);
            assert_eq!(replica.text(), reference);
            assert_eq!(replica.buffered_len(), 0);
        }
    }

    #[test]
    fn concurrent_inserts_commute() {
        let a_op = TextCrdt::new(site(1)).local_insert(0, "a").remove(0);
        let b_op = TextCrdt::new(site(2)).local_insert(0, "b").remove(0);

        let mut first = TextCrdt::new(site(10));
        apply_all(&mut first, &[a_op.clone(), b_op.clone()]);
        let mut second = TextCrdt::new(site(11));
        apply_all(&mut second, &[b_op, a_op]);

        assert_eq!(first.text(), second.text());
    }

    #[test]
    fn ties_at_equal_positions_break_by_origin_id_ascending() {
        // Both sites allocate the same position key for index 0 in an empty
        // document, so the origin id decides placement.
        let low = TextCrdt::new(site(1)).local_insert(0, "L").remove(0);
        let high = TextCrdt::new(site(2)).local_insert(0, "H").remove(0);

        let mut replica = TextCrdt::new(site(10));
        apply_all(&mut replica, &[high.clone(), low.clone()]);
        assert_eq!(replica.text(), "LH");

        let mut replica = TextCrdt::new(site(11));
        apply_all(&mut replica, &[low, high]);
        assert_eq!(replica.text(), "LH");
    }

    #[test]
    fn scenario_three_origins_editing_around_hello() {
        // Origin A inserts "hello"; B concurrently inserts "X" at 0 and C,
        // having seen "hello", inserts "Y" at the end. Every arrival order
        // must produce the same text.
        let mut a = TextCrdt::new(site(1));
        let hello = a.local_insert(0, "hello");

        let mut b = TextCrdt::new(site(2));
        apply_all(&mut b, &hello);
        let x = b.local_insert(0, "X");

        let mut c = TextCrdt::new(site(3));
        apply_all(&mut c, &hello);
        let y = c.local_insert(5, "Y");

        let mut all_ops = hello;
        all_ops.extend(x);
        all_ops.extend(y);

        let reference = {
            let mut replica = TextCrdt::new(site(50));
            apply_all(&mut replica, &all_ops);
            replica.text()
        };
        assert_eq!(reference.len(), 7);
        assert!(reference.contains("hello"));
        assert!(reference.contains('X'));
        assert!(reference.contains('Y'));

        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let mut shuffled = all_ops.clone();
            shuffled.shuffle(&mut rng);
            let mut replica = TextCrdt::new(site(51));
            apply_all(&mut replica, &shuffled);
            assert_eq!(replica.text(), reference);
        }
    }

    // ── Idempotence ────────────────────────────────────────────────

    #[test]
    fn reapplying_a_known_op_is_a_no_op() {
        let mut a = TextCrdt::new(site(1));
        let ops = a.local_insert(0, "hi");

        let mut replica = TextCrdt::new(site(2));
        let now = Utc::now();
        assert_eq!(replica.apply(ops[0].clone(), now).outcome, MergeOutcome::Applied);
        assert_eq!(replica.apply(ops[0].clone(), now).outcome, MergeOutcome::Duplicate);
        let before = replica.text();
        replica.apply(ops[0].clone(), now);
        assert_eq!(replica.text(), before);
        assert_eq!(replica.operation_log().len(), 1);
    }

    // ── Tombstones ─────────────────────────────────────────────────

    #[test]
    fn delete_tombstones_without_shifting_concurrent_inserts() {
        let mut a = TextCrdt::new(site(1));
        let base = a.local_insert(0, "abc");

        // B deletes 'b' while C inserts after 'b'; both saw "abc".
        let mut b = TextCrdt::new(site(2));
        apply_all(&mut b, &base);
        let del = b.local_delete(1, 1);

        let mut c = TextCrdt::new(site(3));
        apply_all(&mut c, &base);
        let ins = c.local_insert(2, "Z");

        let mut one = TextCrdt::new(site(10));
        apply_all(&mut one, &base);
        apply_all(&mut one, &del);
        apply_all(&mut one, &ins);

        let mut two = TextCrdt::new(site(11));
        apply_all(&mut two, &base);
        apply_all(&mut two, &ins);
        apply_all(&mut two, &del);

        assert_eq!(one.text(), two.text());
        assert_eq!(one.text(), "aZc");
    }

    #[test]
    fn materialization_skips_tombstoned_items() {
        let mut a = TextCrdt::new(site(1));
        a.local_insert(0, "abcd");
        a.local_delete(1, 2);
        assert_eq!(a.text(), "ad");
        assert_eq!(a.visible_len(), 2);
        // Tombstoned items remain in the log for replay.
        assert_eq!(a.operation_log().len(), 6);
    }

    // ── Orphan buffering ───────────────────────────────────────────

    #[test]
    fn delete_before_its_insert_is_buffered_then_applied() {
        let mut a = TextCrdt::new(site(1));
        let insert = a.local_insert(0, "x").remove(0);
        let delete = a.local_delete(0, 1).remove(0);

        let mut replica = TextCrdt::new(site(2));
        let now = Utc::now();
        let result = replica.apply(delete.clone(), now);
        assert_eq!(result.outcome, MergeOutcome::Buffered);
        assert_eq!(replica.buffered_len(), 1);

        let result = replica.apply(insert, now);
        assert_eq!(result.outcome, MergeOutcome::Applied);
        assert_eq!(result.flushed, vec![delete]);
        assert_eq!(replica.buffered_len(), 0);
        assert_eq!(replica.text(), "");
    }

    #[test]
    fn expired_orphans_are_dropped_and_never_applied() {
        let mut a = TextCrdt::new(site(1));
        let insert = a.local_insert(0, "x").remove(0);
        let delete = a.local_delete(0, 1).remove(0);

        let mut replica = TextCrdt::with_orphan_ttl(site(2), Duration::seconds(5));
        let t0 = Utc::now();
        replica.apply(delete.clone(), t0);

        let dropped = replica.expire_orphans(t0 + Duration::seconds(6));
        assert_eq!(dropped, vec![delete]);
        assert_eq!(replica.buffered_len(), 0);

        // The insert still applies; the dropped delete never resurfaces.
        replica.apply(insert, t0 + Duration::seconds(7));
        assert_eq!(replica.text(), "x");
    }

    #[test]
    fn unexpired_orphans_survive_a_sweep() {
        let mut a = TextCrdt::new(site(1));
        a.local_insert(0, "x");
        let delete = a.local_delete(0, 1).remove(0);

        let mut replica = TextCrdt::with_orphan_ttl(site(2), Duration::seconds(5));
        let t0 = Utc::now();
        replica.apply(delete, t0);
        assert!(replica.expire_orphans(t0 + Duration::seconds(2)).is_empty());
        assert_eq!(replica.buffered_len(), 1);
    }

    // ── Local editing and replay ───────────────────────────────────

    #[test]
    fn local_edits_materialize_in_order() {
        let mut a = TextCrdt::new(site(1));
        a.local_insert(0, "hello");
        a.local_insert(5, " world");
        a.local_insert(0, "> ");
        assert_eq!(a.text(), "> hello world");
        a.local_delete(0, 2);
        assert_eq!(a.text(), "hello world");
    }

    #[test]
    fn replaying_the_log_reproduces_the_text() {
        let mut a = TextCrdt::new(site(1));
        a.local_insert(0, "draft one");
        a.local_delete(0, 6);
        a.local_insert(0, "final ");

        let mut replica = TextCrdt::new(site(2));
        apply_all(&mut replica, &a.operation_log());
        assert_eq!(replica.text(), a.text());
    }

    #[test]
    fn seeding_with_content_populates_the_log() {
        let crdt = TextCrdt::with_content(site(1), "persisted");
        assert_eq!(crdt.text(), "persisted");
        assert_eq!(crdt.operation_log().len(), "persisted".len());
    }

    #[test]
    fn out_of_range_local_insert_clamps_to_end() {
        let mut a = TextCrdt::new(site(1));
        a.local_insert(0, "ab");
        a.local_insert(100, "c");
        assert_eq!(a.text(), "abc");
    }
}
