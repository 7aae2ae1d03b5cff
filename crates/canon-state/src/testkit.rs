//! Small entity types shared by the unit tests

use canon_core::{Key, ReplicaError, ReplicaResult};

use crate::{ActionContext, Entity, EntityBuilder, EntityRef, Impulse, ImpulseTable, TrackedField};

/// Named counter; `reactions` counts how often `count` changed
#[derive(Clone, Debug)]
pub(crate) struct Counter {
    this: EntityRef,
    pub name: TrackedField<String>,
    pub reactions: TrackedField<i64>,
    pub count: TrackedField<i64>,
}

impl Counter {
    pub const BUMP: Impulse<Counter, ()> = Impulse {
        method: 0,
        name: "bump",
        block: Counter::bump,
    };
    pub const RENAME: Impulse<Counter, (String,)> = Impulse {
        method: 1,
        name: "rename",
        block: Counter::rename,
    };
    pub const SPAWN: Impulse<Counter, (String,)> = Impulse {
        method: 2,
        name: "spawn",
        block: Counter::spawn,
    };
    pub const DROP_SELF: Impulse<Counter, ()> = Impulse {
        method: 3,
        name: "drop_self",
        block: Counter::drop_self,
    };
    pub const EXPLODE: Impulse<Counter, ()> = Impulse {
        method: 4,
        name: "explode",
        block: Counter::explode,
    };
    pub const GIVE: Impulse<Counter, (EntityRef, i64)> = Impulse {
        method: 5,
        name: "give",
        block: Counter::give,
    };
    pub const RELAY: Impulse<Counter, (EntityRef,)> = Impulse {
        method: 6,
        name: "relay",
        block: Counter::relay,
    };

    pub fn build(b: &mut EntityBuilder, name: &str, count: i64) -> Counter {
        let reactions = b.prop("reactions", 0i64);
        Counter {
            this: b.this(),
            name: b.key("name", name.to_string()),
            reactions,
            count: b.prop_with("count", count, move |ctx, _old, _new| {
                reactions.update(ctx, |n| n + 1)
            }),
        }
    }

    fn bump(&self, ctx: &mut ActionContext<'_>, _: ()) -> ReplicaResult<()> {
        self.count.update(ctx, |n| n + 1)
    }

    fn rename(&self, ctx: &mut ActionContext<'_>, (name,): (String,)) -> ReplicaResult<()> {
        self.name.set(ctx, name)
    }

    fn spawn(&self, ctx: &mut ActionContext<'_>, (name,): (String,)) -> ReplicaResult<()> {
        ctx.create(|b| Counter::build(b, &name, 0))?;
        Ok(())
    }

    fn drop_self(&self, ctx: &mut ActionContext<'_>, _: ()) -> ReplicaResult<()> {
        ctx.delete(self.this)
    }

    /// Mutates, then fails
    fn explode(&self, ctx: &mut ActionContext<'_>, _: ()) -> ReplicaResult<()> {
        self.count.set(ctx, 1_000)?;
        ctx.create(|b| Counter::build(b, "debris", 0))?;
        Err(ReplicaError::InvalidConfig("boom".into()))
    }

    fn give(&self, ctx: &mut ActionContext<'_>, (to, amount): (EntityRef, i64)) -> ReplicaResult<()> {
        let other: Counter = ctx.entity(to)?;
        self.count.update(ctx, |n| n - amount)?;
        other.count.update(ctx, |n| n + amount)
    }

    /// Bumps another counter in place
    fn relay(&self, ctx: &mut ActionContext<'_>, (to,): (EntityRef,)) -> ReplicaResult<()> {
        let other: Counter = ctx.entity(to)?;
        ctx.invoke(&other, Counter::BUMP, ())
    }
}

impl Entity for Counter {
    const KIND: &'static str = "Counter";

    fn this(&self) -> EntityRef {
        self.this
    }

    fn impulses(table: &mut ImpulseTable<Self>) -> ReplicaResult<()> {
        table.impulse0(Counter::BUMP)?;
        table.impulse1(Counter::RENAME)?;
        table.impulse1(Counter::SPAWN)?;
        table.impulse0(Counter::DROP_SELF)?;
        table.impulse0(Counter::EXPLODE)?;
        table.impulse2(Counter::GIVE)?;
        table.impulse1(Counter::RELAY)
    }
}

/// Keyed by the entity it points at
#[derive(Clone, Debug)]
pub(crate) struct Link {
    this: EntityRef,
    pub target: TrackedField<EntityRef>,
}

impl Link {
    pub fn build(b: &mut EntityBuilder, target: EntityRef) -> Link {
        Link {
            this: b.this(),
            target: b.key("target", target),
        }
    }
}

impl Entity for Link {
    const KIND: &'static str = "Link";

    fn this(&self) -> EntityRef {
        self.this
    }
}

/// Owns a list of children
#[derive(Clone, Debug)]
pub(crate) struct Nest {
    this: EntityRef,
    pub name: TrackedField<String>,
    pub children: TrackedField<Vec<EntityRef>>,
}

impl Nest {
    pub fn build(b: &mut EntityBuilder, name: &str, children: Vec<EntityRef>) -> Nest {
        Nest {
            this: b.this(),
            name: b.key("name", name.to_string()),
            children: b.hold_many("children", children),
        }
    }
}

impl Entity for Nest {
    const KIND: &'static str = "Nest";

    fn this(&self) -> EntityRef {
        self.this
    }
}

/// Owns one required and one optional child; `indexed` records whether
/// the key reaction found the holder under its new key
#[derive(Clone, Debug)]
pub(crate) struct Holder {
    this: EntityRef,
    pub name: TrackedField<String>,
    pub indexed: TrackedField<bool>,
    pub main: TrackedField<EntityRef>,
    pub spare: TrackedField<Option<EntityRef>>,
}

impl Holder {
    pub fn build(b: &mut EntityBuilder, name: &str, main: EntityRef) -> Holder {
        let this = b.this();
        let indexed = b.prop("indexed", false);
        Holder {
            this,
            name: b.key_with("name", name.to_string(), move |ctx, _old, new: &String| {
                let key = Key::of_kind(Holder::KIND).with(new.as_str());
                let found = ctx.find(&key) == Some(this);
                indexed.set(ctx, found)
            }),
            indexed,
            main: b.hold_one("main", main),
            spare: b.hold_optional("spare", None),
        }
    }
}

impl Entity for Holder {
    const KIND: &'static str = "Holder";

    fn this(&self) -> EntityRef {
        self.this
    }
}

/// Declares its first impulse with the wrong method id
#[derive(Clone, Debug)]
pub(crate) struct Misdeclared {
    this: EntityRef,
}

impl Misdeclared {
    const NOOP: Impulse<Misdeclared, ()> = Impulse {
        method: 5,
        name: "noop",
        block: |_, _, _| Ok(()),
    };
}

impl Entity for Misdeclared {
    const KIND: &'static str = "Misdeclared";

    fn this(&self) -> EntityRef {
        self.this
    }

    fn impulses(table: &mut ImpulseTable<Self>) -> ReplicaResult<()> {
        table.impulse0(Misdeclared::NOOP)
    }
}

/// Declares two impulses under one name
#[derive(Clone, Debug)]
pub(crate) struct Repeated {
    this: EntityRef,
}

impl Repeated {
    const PING: Impulse<Repeated, ()> = Impulse {
        method: 0,
        name: "ping",
        block: |_, _, _| Ok(()),
    };
    const PING_AGAIN: Impulse<Repeated, ()> = Impulse {
        method: 1,
        name: "ping",
        block: |_, _, _| Ok(()),
    };
}

impl Entity for Repeated {
    const KIND: &'static str = "Repeated";

    fn this(&self) -> EntityRef {
        self.this
    }

    fn impulses(table: &mut ImpulseTable<Self>) -> ReplicaResult<()> {
        table.impulse0(Repeated::PING)?;
        table.impulse0(Repeated::PING_AGAIN)
    }
}

/// Has an impulse named like one of its fields
#[derive(Clone, Debug)]
pub(crate) struct Shadowed {
    this: EntityRef,
    pub level: TrackedField<i64>,
}

impl Shadowed {
    const LEVEL: Impulse<Shadowed, ()> = Impulse {
        method: 0,
        name: "level",
        block: |_, _, _| Ok(()),
    };

    pub fn build(b: &mut EntityBuilder) -> Shadowed {
        Shadowed {
            this: b.this(),
            level: b.prop("level", 0),
        }
    }
}

impl Entity for Shadowed {
    const KIND: &'static str = "Shadowed";

    fn this(&self) -> EntityRef {
        self.this
    }

    fn impulses(table: &mut ImpulseTable<Self>) -> ReplicaResult<()> {
        table.impulse0(Shadowed::LEVEL)
    }
}

/// No key fields: every instance has the key `Marker[]`
#[derive(Clone, Debug)]
pub(crate) struct Marker {
    this: EntityRef,
}

impl Marker {
    pub fn build(b: &mut EntityBuilder) -> Marker {
        Marker { this: b.this() }
    }
}

impl Entity for Marker {
    const KIND: &'static str = "Marker";

    fn this(&self) -> EntityRef {
        self.this
    }
}
