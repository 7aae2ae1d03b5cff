//! The in-flight call
//!
//! An `ActionContext` exists exactly while one logged action is executing.
//! Every mutation of tracked state goes through it, which is how the undo
//! record gets filled without the entity code writing any undo logic.

use std::any::TypeId;
use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::Arc;

use canon_core::{Author, ReplicaError, ReplicaResult, Revision};
use tracing::warn;

use crate::{
    ArgList, Entity, EntityBuilder, EntityRecord, EntityRef, FieldId, Impulse, Property, Role,
    World,
};

/// Inverse of one call's mutations
#[derive(Debug, Default)]
pub struct UndoRecord {
    pub(crate) props: BTreeMap<FieldId, Box<dyn Property>>,
    pub(crate) created: Vec<EntityRef>,
    pub(crate) deleted: Vec<EntityRef>,
    /// Re-indexed because a key they embed changed
    pub(crate) rekeyed: Vec<EntityRef>,
}

impl UndoRecord {
    /// Whether the pre-call value of `field` was captured
    pub fn captured(&self, field: FieldId) -> bool {
        self.props.contains_key(&field)
    }

    pub fn prop_count(&self) -> usize {
        self.props.len()
    }

    pub fn created(&self) -> &[EntityRef] {
        &self.created
    }

    pub fn deleted(&self) -> &[EntityRef] {
        &self.deleted
    }

    pub fn rekeyed(&self) -> &[EntityRef] {
        &self.rekeyed
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
            && self.created.is_empty()
            && self.deleted.is_empty()
            && self.rekeyed.is_empty()
    }
}

/// Tracking frame of the running call
pub struct ActionContext<'w> {
    world: &'w mut World,
    record: UndoRecord,
    revision: Revision,
}

impl<'w> ActionContext<'w> {
    pub(crate) fn new(world: &'w mut World, revision: Revision) -> Self {
        ActionContext {
            world,
            record: UndoRecord::default(),
            revision,
        }
    }

    /// Revision the call is logged at
    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// Timestep of the call; the tick for periodic firings
    pub fn time(&self) -> i64 {
        self.revision.timestep
    }

    pub fn author(&self) -> Author {
        self.revision.author
    }

    pub fn world(&self) -> &World {
        &*self.world
    }

    /// Undo information captured so far
    pub fn record(&self) -> &UndoRecord {
        &self.record
    }

    /// Construct and register a new entity
    pub fn create<E, F>(&mut self, ctor: F) -> ReplicaResult<E>
    where
        E: Entity,
        F: FnOnce(&mut EntityBuilder) -> E,
    {
        let this = self.world.allocate();
        let mut builder = EntityBuilder::new(this);
        let entity = ctor(&mut builder);
        if entity.this() != this {
            return Err(ReplicaError::MisboundEntity { kind: E::KIND });
        }

        let slots = builder.into_slots();
        let table = self.world.table_for::<E>(&slots)?;
        self.world.insert_record(
            this,
            EntityRecord {
                kind: E::KIND,
                type_id: TypeId::of::<E>(),
                view: Arc::new(entity.clone()),
                table,
                slots,
                registered: None,
            },
        );
        self.record.created.push(this);
        self.world.register(this)?;
        Ok(entity)
    }

    /// Unregister an entity
    pub fn delete(&mut self, entity: EntityRef) -> ReplicaResult<()> {
        self.world.unregister(entity)?;
        self.record.deleted.push(entity);
        Ok(())
    }

    /// Run an impulse of another (or the same) entity in place
    ///
    /// Nothing is logged or dispatched: the block joins the running call.
    pub fn invoke<E, A>(&mut self, entity: &E, impulse: Impulse<E, A>, args: A) -> ReplicaResult<()>
    where
        E: Entity,
        A: ArgList,
    {
        if !self.world.is_registered(entity.this()) {
            return Err(ReplicaError::KeylessEntity(entity.this().id()));
        }
        (impulse.block)(entity, self, args)
    }

    pub(crate) fn assign(&mut self, field: FieldId, value: Box<dyn Property>) -> ReplicaResult<()> {
        let (role, reaction) = {
            let slot = self.world.slot(field)?;
            if !slot.value.same_type(&*value) {
                return Err(ReplicaError::TypeMismatch {
                    expected: "value of the declared field type",
                });
            }
            if slot.value.eq_boxed(&*value) {
                return Ok(());
            }
            (slot.role, slot.reaction.clone())
        };

        let rekey = role == Role::Key && self.world.is_registered(field.entity);
        if rekey {
            self.world.unregister(field.entity)?;
        }

        let slot = self.world.slot_mut(field)?;
        let old = std::mem::replace(&mut slot.value, value);
        let dropped: Vec<EntityRef> = if role == Role::Held {
            let kept = slot.value.held();
            old.held()
                .into_iter()
                .filter(|child| !kept.contains(child))
                .collect()
        } else {
            Vec::new()
        };

        if !self.record.props.contains_key(&field) {
            self.record.props.insert(field, old.clone_boxed());
        }

        if rekey {
            if let Err(error) = self.world.register(field.entity) {
                // Back under the old key, the failed write never happened
                self.world.slot_mut(field)?.value = old;
                self.world.register(field.entity)?;
                return Err(error);
            }
            self.rekey_dependents(field.entity)?;
        }

        for child in dropped {
            if self.world.is_registered(child) {
                self.delete(child)?;
            }
        }

        if let Some(reaction) = reaction {
            let new = self.world.slot(field)?.value.clone_boxed();
            reaction(self, &*old, &*new)?;
        }
        Ok(())
    }

    /// Move every entity whose key embeds `entity`, transitively, to its
    /// new key
    fn rekey_dependents(&mut self, entity: EntityRef) -> ReplicaResult<()> {
        let mut pending = self.world.key_dependents(entity);
        while let Some(dependent) = pending.pop() {
            let Some(registered) = self.world.registered_key(dependent).cloned() else {
                continue;
            };
            if self.world.primary_key(dependent)? == registered {
                continue;
            }

            // Recorded first: a failed register leaves it for the rollback
            if !self.record.rekeyed.contains(&dependent) {
                self.record.rekeyed.push(dependent);
            }
            self.world.unregister(dependent)?;
            self.world.register(dependent)?;
            pending.extend(self.world.key_dependents(dependent));
        }
        Ok(())
    }

    pub(crate) fn finish(self) -> UndoRecord {
        self.record
    }

    /// Undo whatever a failed call managed to do before failing
    pub(crate) fn rollback(self) {
        let ActionContext {
            world,
            record,
            revision,
        } = self;
        if let Err(error) = world.revert(&record) {
            warn!(?revision, %error, "rollback of failed call did not complete");
        }
    }
}

impl Deref for ActionContext<'_> {
    type Target = World;

    fn deref(&self) -> &World {
        &*self.world
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{Counter, Holder, Link, Nest};
    use crate::Arg;
    use canon_core::{Key, Value};

    fn world_with_counter(name: &str) -> (World, Counter) {
        let mut world = World::new();
        let mut ctx = ActionContext::new(&mut world, Revision::MIN);
        let counter = ctx.create(|b| Counter::build(b, name, 0)).unwrap();
        ctx.finish();
        (world, counter)
    }

    #[test]
    fn test_equal_assignment_is_noop() {
        let (mut world, counter) = world_with_counter("a");
        let mut ctx = ActionContext::new(&mut world, Revision::MIN);

        counter.count.set(&mut ctx, 0).unwrap();
        assert!(ctx.record().is_empty());

        // Same value again after a real change: no reaction, no second capture
        counter.count.set(&mut ctx, 2).unwrap();
        let reactions = *counter.reactions.get(&ctx).unwrap();
        counter.count.set(&mut ctx, 2).unwrap();
        assert_eq!(*counter.reactions.get(&ctx).unwrap(), reactions);
    }

    #[test]
    fn test_first_capture_wins() {
        let (mut world, counter) = world_with_counter("a");
        let mut ctx = ActionContext::new(&mut world, Revision::MIN);

        counter.count.set(&mut ctx, 1).unwrap();
        counter.count.set(&mut ctx, 2).unwrap();
        counter.count.set(&mut ctx, 3).unwrap();
        let record = ctx.finish();

        assert!(record.captured(counter.count.id()));
        world.revert(&record).unwrap();
        assert_eq!(counter.count.value(&world).unwrap(), 0);
    }

    #[test]
    fn test_reaction_runs_after_change() {
        let (mut world, counter) = world_with_counter("a");
        let mut ctx = ActionContext::new(&mut world, Revision::MIN);

        counter.count.set(&mut ctx, 5).unwrap();
        assert_eq!(counter.reactions.value(&ctx).unwrap(), 1);
        // The reaction's own write is captured too
        assert!(ctx.record().captured(counter.reactions.id()));
    }

    #[test]
    fn test_revert_does_not_run_reactions() {
        let (mut world, counter) = world_with_counter("a");
        let mut ctx = ActionContext::new(&mut world, Revision::MIN);
        counter.count.set(&mut ctx, 5).unwrap();
        let record = ctx.finish();

        world.revert(&record).unwrap();
        assert_eq!(counter.count.value(&world).unwrap(), 0);
        assert_eq!(counter.reactions.value(&world).unwrap(), 0);
    }

    #[test]
    fn test_key_change_reindexes() {
        let (mut world, counter) = world_with_counter("a");
        let mut ctx = ActionContext::new(&mut world, Revision::MIN);

        counter.name.set(&mut ctx, "b".into()).unwrap();
        assert_eq!(ctx.find(&Key::of_kind("Counter").with("a")), None);
        assert_eq!(
            ctx.find(&Key::of_kind("Counter").with("b")),
            Some(counter.this())
        );

        let record = ctx.finish();
        world.revert(&record).unwrap();
        assert_eq!(
            world.find(&Key::of_kind("Counter").with("a")),
            Some(counter.this())
        );
        assert_eq!(world.len(), 1);
    }

    #[test]
    fn test_key_change_onto_taken_key_fails() {
        let (mut world, counter) = world_with_counter("a");
        let mut ctx = ActionContext::new(&mut world, Revision::MIN);
        ctx.create(|b| Counter::build(b, "b", 0)).unwrap();

        let err = counter.name.set(&mut ctx, "b".into()).unwrap_err();
        assert!(matches!(err, ReplicaError::OverlappingKey(_)));
        ctx.rollback();

        assert_eq!(world.len(), 1);
        assert_eq!(
            world.find(&Key::of_kind("Counter").with("a")),
            Some(counter.this())
        );
    }

    #[test]
    fn test_undo_is_exact_inverse() {
        let (mut world, counter) = world_with_counter("a");
        let before = world.snapshot().unwrap();

        let mut ctx = ActionContext::new(&mut world, Revision::MIN);
        let b = ctx.create(|b| Counter::build(b, "b", 1)).unwrap();
        b.count.set(&mut ctx, 10).unwrap();
        counter.count.set(&mut ctx, 7).unwrap();
        ctx.delete(counter.this()).unwrap();
        // Reuse the deleted entity's key in the same call
        ctx.create(|b| Counter::build(b, "a", 99)).unwrap();
        let record = ctx.finish();

        assert_eq!(world.len(), 2);
        world.revert(&record).unwrap();

        assert_eq!(world.snapshot().unwrap(), before);
        assert!(world.is_registered(counter.this()));
        assert!(!world.is_live(b.this()));
        assert_eq!(world.records(), 1);
    }

    #[test]
    fn test_swapped_keys_revert() {
        let mut world = World::new();
        let mut ctx = ActionContext::new(&mut world, Revision::MIN);
        let a = ctx.create(|b| Counter::build(b, "a", 0)).unwrap();
        let b = ctx.create(|bld| Counter::build(bld, "b", 0)).unwrap();
        ctx.finish();
        let before = world.snapshot().unwrap();

        let mut ctx = ActionContext::new(&mut world, Revision::MIN);
        a.name.set(&mut ctx, "tmp".into()).unwrap();
        b.name.set(&mut ctx, "a".into()).unwrap();
        a.name.set(&mut ctx, "b".into()).unwrap();
        let record = ctx.finish();

        world.revert(&record).unwrap();
        assert_eq!(world.snapshot().unwrap(), before);
        assert_eq!(
            world.find(&Key::of_kind("Counter").with("a")),
            Some(a.this())
        );
    }

    fn counter_key(name: &str) -> Key {
        Key::of_kind("Counter").with(name)
    }

    #[test]
    fn test_key_change_rekeys_dependents() {
        let (mut world, counter) = world_with_counter("a");
        let mut ctx = ActionContext::new(&mut world, Revision::MIN);
        let link = ctx.create(|b| Link::build(b, counter.this())).unwrap();
        let chain = ctx.create(|b| Link::build(b, link.this())).unwrap();
        ctx.finish();
        let before = world.snapshot().unwrap();

        let mut ctx = ActionContext::new(&mut world, Revision::MIN);
        counter.name.set(&mut ctx, "z".into()).unwrap();
        let record = ctx.finish();

        let link_key = Key::of_kind("Link").with(counter_key("z"));
        let chain_key = Key::of_kind("Link").with(link_key.clone());
        assert_eq!(world.registered_key(link.this()), Some(&link_key));
        assert_eq!(world.primary_key(link.this()).unwrap(), link_key);
        assert_eq!(world.find(&chain_key), Some(chain.this()));
        assert_eq!(record.rekeyed().len(), 2);

        // The wire form of the link finds it again
        let value = link.this().proxy(&world).unwrap();
        assert_eq!(<EntityRef as Arg>::resolve(&value, &world), Some(link.this()));

        world.revert(&record).unwrap();
        assert_eq!(world.snapshot().unwrap(), before);
        assert_eq!(
            world.find(&Key::of_kind("Link").with(counter_key("a"))),
            Some(link.this())
        );
    }

    #[test]
    fn test_delete_after_dependency_rename_reverts_exactly() {
        let (mut world, counter) = world_with_counter("a");
        let mut ctx = ActionContext::new(&mut world, Revision::MIN);
        let link = ctx.create(|b| Link::build(b, counter.this())).unwrap();
        ctx.finish();
        let original = world.snapshot().unwrap();

        let mut ctx = ActionContext::new(&mut world, Revision::MIN);
        counter.name.set(&mut ctx, "z".into()).unwrap();
        let rename = ctx.finish();
        let renamed = world.snapshot().unwrap();

        let mut ctx = ActionContext::new(&mut world, Revision::MIN);
        ctx.delete(link.this()).unwrap();
        let delete = ctx.finish();

        world.revert(&delete).unwrap();
        assert_eq!(world.snapshot().unwrap(), renamed);
        world.revert(&rename).unwrap();
        assert_eq!(world.snapshot().unwrap(), original);
    }

    fn world_with_holder() -> (World, Holder, Counter, Counter) {
        let mut world = World::new();
        let mut ctx = ActionContext::new(&mut world, Revision::MIN);
        let main = ctx.create(|b| Counter::build(b, "main", 0)).unwrap();
        let other = ctx.create(|b| Counter::build(b, "other", 0)).unwrap();
        let holder = ctx.create(|b| Holder::build(b, "h", main.this())).unwrap();
        ctx.finish();
        (world, holder, main, other)
    }

    #[test]
    fn test_key_reaction_runs_after_reindexing() {
        let (mut world, holder, _, _) = world_with_holder();
        let mut ctx = ActionContext::new(&mut world, Revision::MIN);

        holder.name.set(&mut ctx, "k".into()).unwrap();
        assert!(holder.indexed.value(&ctx).unwrap());
        assert!(ctx.record().captured(holder.indexed.id()));
        let record = ctx.finish();

        world.revert(&record).unwrap();
        assert!(!holder.indexed.value(&world).unwrap());
        assert_eq!(
            world.find(&Key::of_kind("Holder").with("h")),
            Some(holder.this())
        );
    }

    #[test]
    fn test_hold_one_replacement_deletes_old_child() {
        let (mut world, holder, main, other) = world_with_holder();
        let mut ctx = ActionContext::new(&mut world, Revision::MIN);

        holder.main.set(&mut ctx, other.this()).unwrap();
        assert!(!ctx.is_registered(main.this()));
        assert!(ctx.is_registered(other.this()));
        assert_eq!(ctx.record().deleted(), &[main.this()]);
        let record = ctx.finish();

        world.revert(&record).unwrap();
        assert!(world.is_registered(main.this()));
        assert!(world.is_registered(other.this()));
        assert_eq!(holder.main.value(&world).unwrap(), main.this());
    }

    #[test]
    fn test_hold_optional_deletes_on_forward_clear_only() {
        let (mut world, holder, _, other) = world_with_holder();

        // Reverting an adoption clears the field without deleting the child
        let mut ctx = ActionContext::new(&mut world, Revision::MIN);
        holder.spare.set(&mut ctx, Some(other.this())).unwrap();
        let adopt = ctx.finish();
        world.revert(&adopt).unwrap();
        assert_eq!(holder.spare.value(&world).unwrap(), None);
        assert!(world.is_registered(other.this()));

        let mut ctx = ActionContext::new(&mut world, Revision::MIN);
        holder.spare.set(&mut ctx, Some(other.this())).unwrap();
        ctx.finish();

        let mut ctx = ActionContext::new(&mut world, Revision::MIN);
        holder.spare.set(&mut ctx, None).unwrap();
        assert!(!ctx.is_registered(other.this()));
        assert_eq!(ctx.record().deleted(), &[other.this()]);
        let clear = ctx.finish();

        world.revert(&clear).unwrap();
        assert!(world.is_registered(other.this()));
        assert_eq!(holder.spare.value(&world).unwrap(), Some(other.this()));
    }

    #[test]
    fn test_dropped_children_are_deleted() {
        let mut world = World::new();
        let mut ctx = ActionContext::new(&mut world, Revision::MIN);
        let first = ctx.create(|b| Counter::build(b, "first", 0)).unwrap();
        let second = ctx.create(|b| Counter::build(b, "second", 0)).unwrap();
        let nest = ctx
            .create(|b| Nest::build(b, "n", vec![first.this(), second.this()]))
            .unwrap();
        ctx.finish();

        let mut ctx = ActionContext::new(&mut world, Revision::MIN);
        nest.children.set(&mut ctx, vec![second.this()]).unwrap();
        assert!(!ctx.is_registered(first.this()));
        assert!(ctx.is_registered(second.this()));
        assert_eq!(ctx.record().deleted(), &[first.this()]);
        let record = ctx.finish();

        world.revert(&record).unwrap();
        assert!(world.is_registered(first.this()));
        assert_eq!(
            nest.children.value(&world).unwrap(),
            vec![first.this(), second.this()]
        );
    }

    #[test]
    fn test_release_frees_deleted() {
        let (mut world, counter) = world_with_counter("a");
        let mut ctx = ActionContext::new(&mut world, Revision::MIN);
        ctx.delete(counter.this()).unwrap();
        let record = ctx.finish();

        assert!(world.is_live(counter.this()));
        world.release(record);
        assert!(!world.is_live(counter.this()));
    }

    #[test]
    fn test_release_keeps_entities_still_in_a_key() {
        let (mut world, counter) = world_with_counter("a");
        let mut ctx = ActionContext::new(&mut world, Revision::MIN);
        let link = ctx.create(|b| Link::build(b, counter.this())).unwrap();
        ctx.finish();

        let mut ctx = ActionContext::new(&mut world, Revision::MIN);
        ctx.delete(counter.this()).unwrap();
        let record = ctx.finish();
        world.release(record);

        assert!(world.is_live(counter.this()));
        assert_eq!(
            world.primary_key(link.this()).unwrap(),
            world.registered_key(link.this()).cloned().unwrap()
        );
    }

    #[test]
    fn test_invoke_in_place_requires_registration() {
        let (mut world, counter) = world_with_counter("a");
        let mut ctx = ActionContext::new(&mut world, Revision::MIN);

        ctx.invoke(&counter, Counter::BUMP, ()).unwrap();
        assert_eq!(counter.count.value(&ctx).unwrap(), 1);

        ctx.delete(counter.this()).unwrap();
        let err = ctx.invoke(&counter, Counter::BUMP, ()).unwrap_err();
        assert_eq!(err, ReplicaError::KeylessEntity(counter.this().id()));
    }

    #[test]
    fn test_misbound_constructor() {
        let (mut world, counter) = world_with_counter("a");
        let mut ctx = ActionContext::new(&mut world, Revision::MIN);
        let err = ctx.create(|_| counter.clone()).unwrap_err();
        assert_eq!(err, ReplicaError::MisboundEntity { kind: "Counter" });
    }

    #[test]
    fn test_fields_render_entity_refs_as_keys() {
        let mut world = World::new();
        let mut ctx = ActionContext::new(&mut world, Revision::MIN);
        let child = ctx.create(|b| Counter::build(b, "c", 0)).unwrap();
        let nest = ctx.create(|b| Nest::build(b, "n", vec![child.this()])).unwrap();
        ctx.finish();

        let fields = world.fields(nest.this()).unwrap();
        assert_eq!(
            fields[1],
            (
                "children",
                Value::List(vec![Value::Key(Key::of_kind("Counter").with("c"))])
            )
        );
    }
}
