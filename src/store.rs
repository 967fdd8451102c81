//! The Identity Index and Relay Record Store: owns every [`RelayRecord`],
//! keyed by identity digest, with an ordered sequence supporting O(1)
//! index-based removal.

use std::collections::HashMap;

use crate::ids::RelayId;
use crate::record::RelayRecord;

/// Owns every relay record and the identity-to-position index over
/// them.
///
/// Mirrors the "arena-like vector of records + map id→position"
/// strategy: the sequence is a plain `Vec`, deletion moves the last
/// element into the freed slot and fixes up its `sequence_index`
/// rather than shifting the tail, so both insertion and removal stay
/// O(1).
#[derive(Debug, Default)]
pub struct Store {
    records: Vec<RelayRecord>,
    by_id: HashMap<RelayId, usize>,
}

impl Store {
    /// An empty store.
    pub fn new() -> Self {
        Store {
            records: Vec::new(),
            by_id: HashMap::new(),
        }
    }

    /// How many records the store currently holds.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Look up a record by identity digest.
    pub fn get_by_id(&self, id: &RelayId) -> Option<&RelayRecord> {
        self.by_id.get(id).map(|&idx| &self.records[idx])
    }

    /// Look up a record by identity digest, mutably.
    pub fn get_by_id_mut(&mut self, id: &RelayId) -> Option<&mut RelayRecord> {
        self.by_id.get(id).map(|&idx| &mut self.records[idx])
    }

    /// Look up a record by nickname, case-insensitively.
    ///
    /// Nicknames are not unique (unlike identity digests): this returns
    /// the first matching record in sequence order, mirroring
    /// `node_get_by_nickname`'s behavior over the original's insertion-
    /// ordered nodelist. This is a convenience scan over the existing
    /// records, not a second maintained index, since keeping a
    /// nickname-keyed multimap in sync with every descriptor/consensus
    /// update that can change a record's nickname would cost more than
    /// the lookup itself saves.
    pub fn get_by_nickname(&self, nickname: &str) -> Option<&RelayRecord> {
        self.records
            .iter()
            .find(|r| crate::accessors::nickname(r).is_some_and(|n| crate::ids::nicknames_eq(n, nickname)))
    }

    /// Find the record for `id`, creating a fresh, sourceless one (with
    /// `country = -1`) if none exists yet.
    pub fn get_or_create(&mut self, id: RelayId) -> &mut RelayRecord {
        let idx = *self.by_id.entry(id).or_insert_with(|| {
            let idx = self.records.len();
            let mut record = RelayRecord::new(id);
            record.set_sequence_index(idx as isize);
            self.records.push(record);
            idx
        });
        &mut self.records[idx]
    }

    /// Remove the record identified by `id` from both the map and the
    /// sequence. Must be called exactly once per logical removal; a
    /// second call for the same identity is a programming error (I1
    /// would already have been violated by the caller holding a stale
    /// reference).
    pub fn drop_by_id(&mut self, id: &RelayId) {
        let idx = self
            .by_id
            .remove(id)
            .unwrap_or_else(|| panic!("drop() of identity not present in the store: {id}"));

        let last = self.records.len() - 1;
        if idx != last {
            self.records.swap(idx, last);
            let moved_id = self.records[idx].identity();
            self.records[idx].set_sequence_index(idx as isize);
            self.by_id.insert(moved_id, idx);
        }
        let mut removed = self.records.pop().expect("records nonempty: just indexed it");
        removed.set_sequence_index(-1);
    }

    /// Borrow-only iteration over every record in sequence order.
    ///
    /// Safe to call between mutations of individual records' own
    /// fields (e.g. flag writes); must not be interleaved with
    /// insertion or removal, which is enforced here by the borrow
    /// checker (iteration borrows `self` immutably for its whole
    /// lifetime).
    pub fn iterate(&self) -> impl Iterator<Item = &RelayRecord> {
        self.records.iter()
    }

    /// Mutable borrow-only iteration, for bulk field updates (e.g.
    /// `install_consensus`'s flag-clearing step) that do not change
    /// membership.
    pub fn iterate_mut(&mut self) -> impl Iterator<Item = &mut RelayRecord> {
        self.records.iter_mut()
    }

    /// A full-registry consistency audit, analogous to
    /// `nodelist_assert_ok`: checks invariants I1, I3, I4 across every
    /// record. I2 is checked implicitly by the Reconciler (a record
    /// violating it is dropped before this would ever see it); I5 and
    /// I6 require external context and are checked by the Reconciler's
    /// own audit helper instead.
    ///
    /// Panics with a diagnostic on the first violation found; intended
    /// for debug/test use; see the Reconciler's `audit` for the
    /// complete check including I2, I5 and I6.
    pub fn assert_sequence_consistent(&self) {
        assert_eq!(
            self.records.len(),
            self.by_id.len(),
            "I1/I4: sequence and identity map sizes diverge"
        );
        for (idx, record) in self.records.iter().enumerate() {
            assert_eq!(
                record.sequence_index(),
                idx as isize,
                "I4: record {} has stale sequence_index",
                record.identity()
            );
            assert_eq!(
                self.by_id.get(&record.identity()),
                Some(&idx),
                "I1: identity map disagrees with sequence position for {}",
                record.identity()
            );
            assert!(
                record.satisfies_i3(),
                "I3: record {} holds a microdesc without a consensus entry",
                record.identity()
            );
        }
    }
}
