//! World - entity arena and primary-key index
//!
//! Every entity that exists in a container has a record here, registered or
//! not. Deleted entities keep their record until the log can no longer undo
//! the deletion; only then is the record freed.

use std::any::{Any, TypeId};
use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use canon_core::{Key, Pattern, ReplicaError, ReplicaResult, Value};
use tracing::trace;

use crate::{Dispatch, Entity, EntityRef, FieldId, ImpulseTable, Role, Slot, UndoRecord};

/// Default limit on nested entity-valued key fields
pub const DEFAULT_MAX_KEY_DEPTH: usize = 32;

/// Registered entities in key order with their fields rendered as values
pub type Snapshot = Vec<(Key, Vec<(&'static str, Value)>)>;

pub(crate) struct EntityRecord {
    pub(crate) kind: &'static str,
    pub(crate) type_id: TypeId,
    pub(crate) view: Arc<dyn Any + Send + Sync>,
    pub(crate) table: Arc<dyn Dispatch>,
    pub(crate) slots: Vec<Slot>,
    /// Key the entity is indexed under, if registered
    pub(crate) registered: Option<Key>,
}

/// Entity arena plus the index of registered entities by primary key
pub struct World {
    records: BTreeMap<EntityRef, EntityRecord>,
    index: BTreeMap<Key, EntityRef>,
    tables: HashMap<TypeId, Arc<dyn Dispatch>>,
    next_id: u64,
    max_key_depth: usize,
    key_depth: Cell<usize>,
}

impl World {
    pub fn new() -> Self {
        Self::with_max_key_depth(DEFAULT_MAX_KEY_DEPTH)
    }

    pub fn with_max_key_depth(max_key_depth: usize) -> Self {
        World {
            records: BTreeMap::new(),
            index: BTreeMap::new(),
            tables: HashMap::new(),
            next_id: 1,
            max_key_depth,
            key_depth: Cell::new(0),
        }
    }

    /// Entity registered under `key`
    pub fn find(&self, key: &Key) -> Option<EntityRef> {
        self.index.get(key).copied()
    }

    /// Registered entities whose key matches `pattern`, in key order
    pub fn match_pattern(&self, pattern: &Pattern) -> Vec<EntityRef> {
        self.index
            .iter()
            .filter(|(key, _)| pattern.matches(key))
            .map(|(_, entity)| *entity)
            .collect()
    }

    /// Registered entities of type `E` whose key fields match `pattern`
    ///
    /// The kind component is prefixed automatically, so `pattern` covers the
    /// declared key fields only.
    pub fn match_kind<E: Entity>(&self, pattern: &Pattern) -> Vec<E> {
        let pattern = pattern.prefixed(E::KIND);
        self.match_pattern(&pattern)
            .into_iter()
            .filter_map(|entity| self.entity::<E>(entity).ok())
            .collect()
    }

    /// Typed view of an entity
    pub fn entity<E: Entity>(&self, entity: EntityRef) -> ReplicaResult<E> {
        let mismatch = ReplicaError::TypeMismatch {
            expected: std::any::type_name::<E>(),
        };
        let record = self.record(entity)?;
        if record.type_id != TypeId::of::<E>() {
            return Err(mismatch);
        }
        record.view.downcast_ref::<E>().cloned().ok_or(mismatch)
    }

    /// Typed view of the entity registered under `key`
    pub fn find_entity<E: Entity>(&self, key: &Key) -> Option<E> {
        self.find(key).and_then(|entity| self.entity::<E>(entity).ok())
    }

    pub fn kind_of(&self, entity: EntityRef) -> Option<&'static str> {
        self.records.get(&entity).map(|r| r.kind)
    }

    pub fn is_registered(&self, entity: EntityRef) -> bool {
        self.records
            .get(&entity)
            .map_or(false, |r| r.registered.is_some())
    }

    /// Whether the entity still has a record, registered or not
    pub fn is_live(&self, entity: EntityRef) -> bool {
        self.records.contains_key(&entity)
    }

    pub fn registered_key(&self, entity: EntityRef) -> Option<&Key> {
        self.records.get(&entity).and_then(|r| r.registered.as_ref())
    }

    /// Compute the primary key from the entity's current key fields
    ///
    /// Entity-valued key fields contribute the referenced entity's key,
    /// recursively, up to the configured depth.
    pub fn primary_key(&self, entity: EntityRef) -> ReplicaResult<Key> {
        let depth = self.key_depth.get();
        if depth >= self.max_key_depth {
            return Err(ReplicaError::KeyCycle(entity.id()));
        }
        self.key_depth.set(depth + 1);
        let key = self.compute_key(entity);
        self.key_depth.set(depth);
        key
    }

    fn compute_key(&self, entity: EntityRef) -> ReplicaResult<Key> {
        let record = self.record(entity)?;
        let mut key = Key::of_kind(record.kind);
        for slot in record.slots.iter().filter(|s| s.role == Role::Key) {
            key.push(slot.value.value_of(self)?);
        }
        Ok(key)
    }

    /// Number of registered entities
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Number of entity records, including deleted ones not yet released
    pub fn records(&self) -> usize {
        self.records.len()
    }

    /// Registered entities in key order
    pub fn iter(&self) -> impl Iterator<Item = (&Key, EntityRef)> {
        self.index.iter().map(|(key, entity)| (key, *entity))
    }

    /// Field names and rendered values of one entity, in declaration order
    pub fn fields(&self, entity: EntityRef) -> ReplicaResult<Vec<(&'static str, Value)>> {
        self.record(entity)?
            .slots
            .iter()
            .map(|slot| Ok((slot.name, slot.value.value_of(self)?)))
            .collect()
    }

    pub fn snapshot(&self) -> ReplicaResult<Snapshot> {
        self.index
            .iter()
            .map(|(key, entity)| Ok((key.clone(), self.fields(*entity)?)))
            .collect()
    }

    fn record(&self, entity: EntityRef) -> ReplicaResult<&EntityRecord> {
        self.records
            .get(&entity)
            .ok_or(ReplicaError::EntityNotFound(entity.id()))
    }

    fn record_mut(&mut self, entity: EntityRef) -> ReplicaResult<&mut EntityRecord> {
        self.records
            .get_mut(&entity)
            .ok_or(ReplicaError::EntityNotFound(entity.id()))
    }

    pub(crate) fn allocate(&mut self) -> EntityRef {
        let entity = EntityRef(self.next_id);
        self.next_id += 1;
        entity
    }

    pub(crate) fn insert_record(&mut self, entity: EntityRef, record: EntityRecord) {
        self.records.insert(entity, record);
    }

    pub(crate) fn free(&mut self, entity: EntityRef) {
        if let Some(record) = self.records.remove(&entity) {
            if let Some(key) = record.registered {
                self.index.remove(&key);
            }
            trace!(?entity, kind = record.kind, "freed entity");
        }
    }

    /// Index the entity under its current primary key
    pub(crate) fn register(&mut self, entity: EntityRef) -> ReplicaResult<()> {
        let key = self.primary_key(entity)?;
        if self.index.contains_key(&key) {
            return Err(ReplicaError::OverlappingKey(key));
        }
        let record = self.record_mut(entity)?;
        record.registered = Some(key.clone());
        self.index.insert(key, entity);
        Ok(())
    }

    /// Remove the entity from the index under the key it was registered with
    pub(crate) fn unregister(&mut self, entity: EntityRef) -> ReplicaResult<()> {
        let key = self
            .record_mut(entity)?
            .registered
            .take()
            .ok_or(ReplicaError::NotRegistered(entity.id()))?;
        if self.index.get(&key) != Some(&entity) {
            return Err(ReplicaError::KeyDesync {
                entity: entity.id(),
                key,
            });
        }
        self.index.remove(&key);
        Ok(())
    }

    pub(crate) fn slot(&self, field: FieldId) -> ReplicaResult<&Slot> {
        self.record(field.entity)?
            .slots
            .get(field.slot as usize)
            .ok_or(ReplicaError::EntityNotFound(field.entity.id()))
    }

    pub(crate) fn slot_mut(&mut self, field: FieldId) -> ReplicaResult<&mut Slot> {
        self.record_mut(field.entity)?
            .slots
            .get_mut(field.slot as usize)
            .ok_or(ReplicaError::EntityNotFound(field.entity.id()))
    }

    /// Dispatch table for `E`, built on first use
    ///
    /// Impulse names are checked against the field names of the entity that
    /// triggered the build.
    pub(crate) fn table_for<E: Entity>(&mut self, slots: &[Slot]) -> ReplicaResult<Arc<dyn Dispatch>> {
        let type_id = TypeId::of::<E>();
        if let Some(table) = self.tables.get(&type_id) {
            return Ok(table.clone());
        }

        let table = ImpulseTable::<E>::build()?;
        for name in table.names() {
            if slots.iter().any(|slot| slot.name == name) {
                return Err(ReplicaError::ImpulseOnField {
                    kind: E::KIND,
                    name,
                });
            }
        }

        let table: Arc<dyn Dispatch> = Arc::new(table);
        self.tables.insert(type_id, table.clone());
        Ok(table)
    }

    /// View and dispatch table of an entity, detached from the world borrow
    pub(crate) fn dispatch_parts(
        &self,
        entity: EntityRef,
    ) -> ReplicaResult<(Arc<dyn Any + Send + Sync>, Arc<dyn Dispatch>)> {
        let record = self.record(entity)?;
        Ok((record.view.clone(), record.table.clone()))
    }

    /// Undo one call: restore captured values without running reactions,
    /// then put index membership back the way it was
    pub(crate) fn revert(&mut self, record: &UndoRecord) -> ReplicaResult<()> {
        let created: BTreeSet<EntityRef> = record.created.iter().copied().collect();

        let rekeyed: BTreeSet<EntityRef> = record
            .props
            .keys()
            .filter(|field| !created.contains(&field.entity))
            .filter(|field| {
                self.slot(**field)
                    .map_or(false, |slot| slot.role == Role::Key)
            })
            .map(|field| field.entity)
            .collect();

        for entity in &created {
            if self.is_registered(*entity) {
                self.unregister(*entity)?;
            }
        }

        let mut reindex = Vec::new();
        for entity in &rekeyed {
            if self.is_registered(*entity) {
                self.unregister(*entity)?;
                reindex.push(*entity);
            }
        }
        // Cascaded entities were all registered before the call; a failed
        // re-key can leave one out of the index
        for entity in &record.rekeyed {
            if created.contains(entity) || reindex.contains(entity) {
                continue;
            }
            if self.is_registered(*entity) {
                self.unregister(*entity)?;
            }
            reindex.push(*entity);
        }

        for (field, value) in &record.props {
            if created.contains(&field.entity) {
                continue;
            }
            match self.slot_mut(*field) {
                Ok(slot) => slot.value = value.clone_boxed(),
                Err(_) => trace!(?field, "restore skipped, entity already freed"),
            }
        }

        for entity in &record.deleted {
            if !created.contains(entity) && !reindex.contains(entity) {
                reindex.push(*entity);
            }
        }
        for entity in reindex {
            if self.is_live(entity) && !self.is_registered(entity) {
                self.register(entity)?;
            }
        }

        for entity in created {
            self.free(entity);
        }
        Ok(())
    }

    /// A call can no longer be undone: free what it deleted
    ///
    /// An entity whose handle is still part of another entity's key keeps
    /// its record, so that key stays computable.
    pub(crate) fn release(&mut self, record: UndoRecord) {
        for entity in record.deleted {
            if self.is_registered(entity) {
                continue;
            }
            if self.key_referrers(entity).next().is_some() {
                trace!(?entity, "release deferred, still part of a key");
                continue;
            }
            self.free(entity);
        }
    }

    /// Registered entities with a key field referencing `entity` directly
    pub(crate) fn key_dependents(&self, entity: EntityRef) -> Vec<EntityRef> {
        self.key_referrers(entity)
            .filter(|other| self.is_registered(*other))
            .collect()
    }

    fn key_referrers(&self, entity: EntityRef) -> impl Iterator<Item = EntityRef> + '_ {
        self.records
            .iter()
            .filter(move |(other, record)| {
                **other != entity
                    && record
                        .slots
                        .iter()
                        .filter(|slot| slot.role == Role::Key)
                        .any(|slot| slot.value.held().contains(&entity))
            })
            .map(|(other, _)| *other)
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("registered", &self.index.len())
            .field("records", &self.records.len())
            .finish()
    }
}
