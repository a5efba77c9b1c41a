//! Ordered-sequence diffing of registered member keys.
//!
//! The edit script is derived from a longest common subsequence, so the number
//! of changes is always the true edit distance under insert/remove edits.
//! Removal offsets index the old sequence; insertion offsets index the new one.

use crate::types::MemberId;
use serde::{Deserialize, Serialize};
use std::cmp::max;

/// One step of a registration delta.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Change {
    /// Drop `id`, found at `offset` in the previous sequence.
    Remove { offset: usize, id: MemberId },
    /// Add `id`, landing at `offset` in the requested sequence.
    Insert { offset: usize, id: MemberId },
}

impl Change {
    pub fn id(&self) -> &MemberId {
        match self {
            Change::Remove { id, .. } | Change::Insert { id, .. } => id,
        }
    }

    pub fn offset(&self) -> usize {
        match self {
            Change::Remove { offset, .. } | Change::Insert { offset, .. } => *offset,
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, Change::Insert { .. })
    }

    pub fn is_remove(&self) -> bool {
        matches!(self, Change::Remove { .. })
    }
}

/// Insertions and removals moving one key sequence to another.
///
/// Removals come first in ascending offset order, then insertions in
/// ascending offset order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationDelta {
    changes: Vec<Change>,
}

impl RegistrationDelta {
    /// Delta with no changes.
    pub fn empty() -> Self {
        Self::default()
    }

    fn from_parts(removals: Vec<Change>, insertions: Vec<Change>) -> Self {
        let mut changes = removals;
        changes.extend(insertions);
        Self { changes }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Number of insert + remove operations.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn removals(&self) -> impl Iterator<Item = &Change> + '_ {
        self.changes.iter().filter(|c| c.is_remove())
    }

    pub fn insertions(&self) -> impl Iterator<Item = &Change> + '_ {
        self.changes.iter().filter(|c| c.is_insert())
    }

    /// Identifiers that gain a listener.
    pub fn inserted_ids(&self) -> impl Iterator<Item = &MemberId> + '_ {
        self.insertions().map(Change::id)
    }

    /// Identifiers whose listener goes away.
    pub fn removed_ids(&self) -> impl Iterator<Item = &MemberId> + '_ {
        self.removals().map(Change::id)
    }

    /// The delta that undoes this one.
    pub fn inverse(&self) -> Self {
        let removals = self
            .insertions()
            .map(|c| Change::Remove {
                offset: c.offset(),
                id: c.id().clone(),
            })
            .collect();
        let insertions = self
            .removals()
            .map(|c| Change::Insert {
                offset: c.offset(),
                id: c.id().clone(),
            })
            .collect();
        Self::from_parts(removals, insertions)
    }
}

impl IntoIterator for RegistrationDelta {
    type Item = Change;
    type IntoIter = std::vec::IntoIter<Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.into_iter()
    }
}

/// Outcome of one reconciliation cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reconciliation {
    /// Changes to hand to the provider.
    pub delta: RegistrationDelta,
    /// The registered sequence after the delta.
    pub next: Vec<MemberId>,
}

/// Compute the delta from `current` to `requested` and the resulting buffer.
///
/// `next` always equals `requested`; when the delta is empty it also equals
/// `current`. Duplicate keys in either input are diffed positionally.
pub fn reconcile(current: &[MemberId], requested: &[MemberId]) -> Reconciliation {
    let delta = diff(current, requested);
    let next = if delta.is_empty() {
        current.to_vec()
    } else {
        apply(current, &delta).unwrap_or_else(|| requested.to_vec())
    };
    Reconciliation { delta, next }
}

/// Compute the minimal ordered delta turning `old` into `new`.
pub fn diff(old: &[MemberId], new: &[MemberId]) -> RegistrationDelta {
    let prefix = old
        .iter()
        .zip(new.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let old_rest = &old[prefix..];
    let new_rest = &new[prefix..];
    let suffix = old_rest
        .iter()
        .rev()
        .zip(new_rest.iter().rev())
        .take_while(|(a, b)| a == b)
        .count();
    let a = &old_rest[..old_rest.len() - suffix];
    let b = &new_rest[..new_rest.len() - suffix];

    let mut script = EditScript::default();
    if (a.len() + 1).saturating_mul(b.len() + 1) <= TABLE_CELL_LIMIT {
        script.walk_table(a, b);
    } else {
        script.split(a, b, 0, 0);
    }

    let removals = script
        .removed
        .into_iter()
        .map(|k| Change::Remove {
            offset: prefix + k,
            id: a[k].clone(),
        })
        .collect();
    let insertions = script
        .inserted
        .into_iter()
        .map(|k| Change::Insert {
            offset: prefix + k,
            id: b[k].clone(),
        })
        .collect();

    RegistrationDelta::from_parts(removals, insertions)
}

/// Apply a delta to a sequence.
///
/// Returns `None` if a removal does not match the element at its offset or an
/// insertion lands past the end, i.e. the delta was not computed from `base`.
pub fn apply(base: &[MemberId], delta: &RegistrationDelta) -> Option<Vec<MemberId>> {
    let mut result = base.to_vec();

    for change in delta.removals().collect::<Vec<_>>().into_iter().rev() {
        let offset = change.offset();
        if result.get(offset) != Some(change.id()) {
            return None;
        }
        result.remove(offset);
    }

    for change in delta.insertions() {
        let offset = change.offset();
        if offset > result.len() {
            return None;
        }
        result.insert(offset, change.id().clone());
    }

    Some(result)
}

/// Number of insert/remove edits separating `a` from `b`.
pub fn edit_distance(a: &[MemberId], b: &[MemberId]) -> usize {
    let lcs = lcs_lengths(a.iter(), b.iter())[b.len()];
    a.len() + b.len() - 2 * lcs
}

/// Last row of the LCS table: entry `j` is the LCS of `a` and the first `j`
/// items of `b`. Two rows of memory.
fn lcs_lengths<'a, A, B>(a: A, b: B) -> Vec<usize>
where
    A: Iterator<Item = &'a MemberId>,
    B: Iterator<Item = &'a MemberId> + Clone,
{
    let width = b.clone().count() + 1;
    let mut prev = vec![0usize; width];
    let mut row = vec![0usize; width];
    for x in a {
        for (j, y) in b.clone().enumerate() {
            row[j + 1] = if x == y {
                prev[j] + 1
            } else {
                max(prev[j + 1], row[j])
            };
        }
        std::mem::swap(&mut prev, &mut row);
    }
    prev
}

/// Largest quadratic table built before switching to divide and conquer
/// (16 MiB of cells).
const TABLE_CELL_LIMIT: usize = 1 << 22;

/// Indices removed from `a` and inserted from `b`, both ascending.
#[derive(Debug, Default)]
struct EditScript {
    removed: Vec<usize>,
    inserted: Vec<usize>,
}

impl EditScript {
    /// Walk a full suffix table, preferring removal on ties.
    fn walk_table(&mut self, a: &[MemberId], b: &[MemberId]) {
        let table = LcsTable::build(a, b);
        let (mut i, mut j) = (0, 0);

        while i < a.len() && j < b.len() {
            if a[i] == b[j] {
                i += 1;
                j += 1;
            } else if table.get(i + 1, j) >= table.get(i, j + 1) {
                self.removed.push(i);
                i += 1;
            } else {
                self.inserted.push(j);
                j += 1;
            }
        }
        self.removed.extend(i..a.len());
        self.inserted.extend(j..b.len());
    }

    /// Hirschberg's linear-space recursion. `a_base`/`b_base` are the
    /// offsets of the slices within the trimmed inputs.
    fn split(&mut self, a: &[MemberId], b: &[MemberId], a_base: usize, b_base: usize) {
        if a.is_empty() {
            self.inserted.extend(b_base..b_base + b.len());
            return;
        }
        if b.is_empty() {
            self.removed.extend(a_base..a_base + a.len());
            return;
        }
        if a.len() == 1 {
            match b.iter().position(|id| id == &a[0]) {
                Some(kept) => {
                    self.inserted.extend(b_base..b_base + kept);
                    self.inserted.extend(b_base + kept + 1..b_base + b.len());
                }
                None => {
                    self.removed.push(a_base);
                    self.inserted.extend(b_base..b_base + b.len());
                }
            }
            return;
        }

        let mid = a.len() / 2;
        let head = lcs_lengths(a[..mid].iter(), b.iter());
        let tail = lcs_lengths(a[mid..].iter().rev(), b.iter().rev());
        let cut = (0..=b.len())
            .max_by_key(|&k| (head[k] + tail[b.len() - k], std::cmp::Reverse(k)))
            .unwrap_or(0);

        self.split(&a[..mid], &b[..cut], a_base, b_base);
        self.split(&a[mid..], &b[cut..], a_base + mid, b_base + cut);
    }
}

/// Suffix LCS lengths: `get(i, j)` is the LCS of `a[i..]` and `b[j..]`.
struct LcsTable {
    width: usize,
    cells: Vec<u32>,
}

impl LcsTable {
    fn build(a: &[MemberId], b: &[MemberId]) -> Self {
        let width = b.len() + 1;
        let mut cells = vec![0u32; (a.len() + 1) * width];
        for i in (0..a.len()).rev() {
            for j in (0..b.len()).rev() {
                cells[i * width + j] = if a[i] == b[j] {
                    cells[(i + 1) * width + j + 1] + 1
                } else {
                    max(cells[(i + 1) * width + j], cells[i * width + j + 1])
                };
            }
        }
        Self { width, cells }
    }

    fn get(&self, i: usize, j: usize) -> u32 {
        self.cells[i * self.width + j]
    }
}
