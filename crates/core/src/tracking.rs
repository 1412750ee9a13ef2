//! Change tracking for entities loaded inside a unit of work.
//!
//! An [`EntityCollection`] remembers, per business key, the state an entity had when it
//! was registered (an immutable [`Snapshot`]) together with a [`Tracked`] handle to the
//! live entity the caller keeps mutating. At flush time the collection compares both and
//! hands back only the entities that actually changed.
//!
//! ```text
//! load/insert ──► add(handle) ──► (snapshot, handle)
//!                                      │
//! caller mutates handle ...            │
//!                                      ▼
//! save ──────────► changed() ──► handles where has_changed(snapshot, current)
//! ```
//!
//! Collections are owned by a single unit of work and are never shared across tasks.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::entity::Entity;

/// Decides whether an entity changed between its snapshot (`initial`) and its current state.
///
/// Must be a pure comparison.
pub type ChangePredicate<E> = fn(initial: &E, current: &E) -> bool;

/// Immutable value copy of an entity, taken at registration time.
///
/// The snapshot owns its copy, so later mutations of the live entity can never
/// alter the comparison basis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot<E>(E);

impl<E: Clone> Snapshot<E> {
    pub fn capture(entity: &E) -> Self {
        Self(entity.clone())
    }
}

impl<E> Snapshot<E> {
    pub fn get(&self) -> &E {
        &self.0
    }
}

/// Shared handle to a live entity.
///
/// Clones point at the same entity: the caller mutates through its handle and the
/// change tracker observes the result through its own clone. Guards returned by
/// [`Tracked::lock`] must not be held across an `.await`.
pub struct Tracked<E> {
    inner: Arc<Mutex<E>>,
}

impl<E> Tracked<E> {
    pub fn new(entity: E) -> Self {
        Self {
            inner: Arc::new(Mutex::new(entity)),
        }
    }

    /// Lock the entity for reading or in-place mutation.
    pub fn lock(&self) -> MutexGuard<'_, E> {
        // A panic while mutating leaves the entity as it was left; the tracker
        // still compares whatever state is there.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the live entity.
    pub fn modify<R>(&self, f: impl FnOnce(&mut E) -> R) -> R {
        f(&mut self.lock())
    }

    /// Whether both handles point at the same live entity.
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<E: Clone> Tracked<E> {
    /// Copy of the entity's current state.
    pub fn get(&self) -> E {
        self.lock().clone()
    }

    pub fn snapshot(&self) -> Snapshot<E> {
        Snapshot::capture(&*self.lock())
    }
}

impl<E> Clone for Tracked<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: fmt::Debug> fmt::Debug for Tracked<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Tracked").field(&*self.lock()).finish()
    }
}

#[derive(Debug)]
struct Entry<E> {
    initial: Snapshot<E>,
    current: Tracked<E>,
}

/// Per-entity-type registry of `(snapshot, live handle)` pairs keyed by business key.
pub struct EntityCollection<E: Entity> {
    entries: HashMap<E::Id, Entry<E>>,
    has_changed: ChangePredicate<E>,
}

/// Structural comparison: any field that differs marks the entity as changed.
fn differs<E: PartialEq>(initial: &E, current: &E) -> bool {
    initial != current
}

impl<E> EntityCollection<E>
where
    E: Entity + Clone + PartialEq,
{
    /// Collection that detects changes by comparing the whole entity value.
    pub fn new() -> Self {
        Self::with_predicate(differs::<E>)
    }
}

impl<E> Default for EntityCollection<E>
where
    E: Entity + Clone + PartialEq,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EntityCollection<E>
where
    E: Entity + Clone,
{
    /// Collection with a custom change predicate (e.g. "version marker differs").
    pub fn with_predicate(has_changed: ChangePredicate<E>) -> Self {
        Self {
            entries: HashMap::new(),
            has_changed,
        }
    }

    /// Register `entity` under its business key, snapshotting its current state.
    ///
    /// An existing entry for the same key is replaced (last registration wins).
    pub fn add(&mut self, entity: &Tracked<E>) {
        let (key, initial) = {
            let current = entity.lock();
            (current.id().clone(), Snapshot::capture(&*current))
        };

        self.entries.insert(
            key,
            Entry {
                initial,
                current: entity.clone(),
            },
        );
    }

    /// Stop tracking `entity`. Returns whether an entry was removed.
    pub fn remove(&mut self, entity: &Tracked<E>) -> bool {
        let key = entity.lock().id().clone();
        self.entries.remove(&key).is_some()
    }

    /// Live handles whose state differs from their snapshot.
    ///
    /// Order is unspecified.
    pub fn changed(&self) -> Vec<Tracked<E>> {
        self.entries
            .values()
            .filter(|entry| (self.has_changed)(entry.initial.get(), &*entry.current.lock()))
            .map(|entry| entry.current.clone())
            .collect()
    }

    /// Tracked handle for `key`, if any.
    pub fn get(&self, key: &E::Id) -> Option<Tracked<E>> {
        self.entries.get(key).map(|entry| entry.current.clone())
    }

    pub fn contains(&self, key: &E::Id) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<E> fmt::Debug for EntityCollection<E>
where
    E: Entity + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityCollection")
            .field("entries", &self.entries)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Note {
        id: u32,
        body: String,
        revision: u64,
    }

    impl Note {
        fn new(id: u32, body: &str) -> Self {
            Self {
                id,
                body: body.to_string(),
                revision: 1,
            }
        }

        fn edit(&mut self, body: &str) {
            self.body = body.to_string();
            self.revision += 1;
        }
    }

    impl Entity for Note {
        type Id = u32;

        fn id(&self) -> &u32 {
            &self.id
        }
    }

    fn revision_differs(initial: &Note, current: &Note) -> bool {
        initial.revision != current.revision
    }

    #[test]
    fn untouched_entities_are_not_reported() {
        let mut notes = EntityCollection::new();
        notes.add(&Tracked::new(Note::new(1, "a")));
        notes.add(&Tracked::new(Note::new(2, "b")));

        assert!(notes.changed().is_empty());
        assert_eq!(notes.len(), 2);
    }

    #[test]
    fn mutated_entity_is_reported_once_after_several_edits() {
        let mut notes = EntityCollection::new();
        let note = Tracked::new(Note::new(1, "a"));
        notes.add(&note);
        notes.add(&Tracked::new(Note::new(2, "b")));

        note.modify(|n| n.edit("b"));
        note.modify(|n| n.edit("c"));

        let changed = notes.changed();
        assert_eq!(changed.len(), 1);
        assert!(changed[0].same_as(&note));
        assert_eq!(changed[0].get().body, "c");
    }

    #[test]
    fn removed_entity_is_never_reported() {
        let mut notes = EntityCollection::new();
        let note = Tracked::new(Note::new(1, "a"));
        notes.add(&note);

        note.modify(|n| n.edit("b"));
        assert!(notes.remove(&note));

        assert!(notes.changed().is_empty());
        assert!(!notes.contains(&1));
        assert!(!notes.remove(&note));
    }

    #[test]
    fn re_adding_a_key_replaces_the_snapshot() {
        let mut notes = EntityCollection::new();
        let note = Tracked::new(Note::new(1, "a"));
        notes.add(&note);
        note.modify(|n| n.edit("b"));

        notes.add(&note);

        assert!(notes.changed().is_empty());
        assert_eq!(notes.len(), 1);
    }

    #[test]
    fn snapshot_is_independent_of_the_live_entity() {
        let note = Tracked::new(Note::new(1, "a"));
        let snapshot = note.snapshot();

        note.modify(|n| n.edit("b"));

        assert_eq!(snapshot.get().body, "a");
        assert_eq!(note.get().body, "b");
    }

    #[test]
    fn custom_predicate_only_sees_the_version_marker() {
        let mut notes = EntityCollection::with_predicate(revision_differs);
        let note = Tracked::new(Note::new(1, "a"));
        notes.add(&note);

        // A mutation that skips the marker is invisible to a marker-based predicate.
        note.modify(|n| n.body = "sneaky".to_string());
        assert!(notes.changed().is_empty());

        note.modify(|n| n.edit("b"));
        assert_eq!(notes.changed().len(), 1);
    }

    #[test]
    fn structural_predicate_catches_unversioned_mutations() {
        let mut notes = EntityCollection::new();
        let note = Tracked::new(Note::new(1, "a"));
        notes.add(&note);

        note.modify(|n| n.body = "sneaky".to_string());

        assert_eq!(notes.changed().len(), 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: exactly the edited, still-tracked entities are reported, each once.
        #[test]
        fn changed_reports_exactly_the_edited_entities(
            plan in prop::collection::vec((0u8..4, any::<bool>()), 1..24)
        ) {
            let mut notes = EntityCollection::new();
            let handles: Vec<Tracked<Note>> = (0..plan.len() as u32)
                .map(|id| Tracked::new(Note::new(id, "initial")))
                .collect();
            for handle in &handles {
                notes.add(handle);
            }

            let mut expected = Vec::new();
            for (idx, (edits, removed)) in plan.iter().enumerate() {
                for round in 0..*edits {
                    handles[idx].modify(|n| n.edit(&format!("edit {round}")));
                }
                if *removed {
                    notes.remove(&handles[idx]);
                } else if *edits > 0 {
                    expected.push(idx as u32);
                }
            }

            let mut reported: Vec<u32> = notes.changed().iter().map(|n| n.get().id).collect();
            reported.sort_unstable();
            prop_assert_eq!(reported, expected);
        }
    }
}
