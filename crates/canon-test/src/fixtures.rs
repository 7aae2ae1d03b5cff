//! Orbital demo entities
//!
//! A `Universe` owns a list of `Body` children. Bodies are keyed by their
//! universe and a name, so a body's primary key nests the universe's key.
//! Spawning under a taken name and merging with a vanished body do nothing.
//! Renaming onto a taken name fails: the local call is rejected, and a
//! delivered one waits in the log until a replay finds the name free.

use canon_core::{Key, ReplicaResult, Revision};
use canon_state::{
    ActionContext, Container, Dispatcher, Entity, EntityBuilder, EntityRef, Impulse, ImpulseTable,
    PeriodicId, TrackedField,
};

/// Key of the universe called `name`
pub fn universe_key(name: &str) -> Key {
    Key::of_kind(Universe::KIND).with(name)
}

/// A named set of bodies advanced by a periodic integrator
#[derive(Clone, Debug)]
pub struct Universe {
    this: EntityRef,
    pub name: TrackedField<String>,
    pub bodies: TrackedField<Vec<EntityRef>>,
    /// Integration steps applied so far
    pub steps: TrackedField<i64>,
}

impl Universe {
    pub const SPAWN: Impulse<Universe, (String, f64, f64, f64)> = Impulse {
        method: 0,
        name: "spawn",
        block: Universe::spawn,
    };
    pub const REMOVE: Impulse<Universe, (EntityRef,)> = Impulse {
        method: 1,
        name: "remove",
        block: Universe::remove,
    };
    pub const CLEAR: Impulse<Universe, ()> = Impulse {
        method: 2,
        name: "clear",
        block: Universe::clear,
    };

    pub fn build(b: &mut EntityBuilder, name: &str) -> Universe {
        Universe {
            this: b.this(),
            name: b.key("name", name.to_string()),
            bodies: b.hold_many("bodies", Vec::new()),
            steps: b.prop("steps", 0),
        }
    }

    /// Live body with the given name
    pub fn body_named(&self, ctx: &ActionContext<'_>, name: &str) -> ReplicaResult<Option<Body>> {
        for &body in self.bodies.get(ctx.world())? {
            let body: Body = ctx.entity(body)?;
            if body.name.get(ctx.world())? == name {
                return Ok(Some(body));
            }
        }
        Ok(None)
    }

    /// Move every body by its velocity
    pub fn integrate(&self, ctx: &mut ActionContext<'_>) -> ReplicaResult<()> {
        let bodies = self.bodies.value(ctx.world())?;
        for body in bodies {
            let body: Body = ctx.entity(body)?;
            let vx = body.vx.value(ctx.world())?;
            let vy = body.vy.value(ctx.world())?;
            body.x.update(ctx, |x| x + vx)?;
            body.y.update(ctx, |y| y + vy)?;
        }
        self.steps.update(ctx, |n| n + 1)
    }

    fn spawn(
        &self,
        ctx: &mut ActionContext<'_>,
        (name, x, y, mass): (String, f64, f64, f64),
    ) -> ReplicaResult<()> {
        if self.body_named(ctx, &name)?.is_some() {
            return Ok(());
        }
        let universe = self.this;
        let body = ctx.create(|b| Body::build(b, universe, &name, (x, y), mass))?;
        self.bodies.update(ctx, |bodies| {
            let mut bodies = bodies.clone();
            bodies.push(body.this());
            bodies
        })
    }

    fn remove(&self, ctx: &mut ActionContext<'_>, (body,): (EntityRef,)) -> ReplicaResult<()> {
        // Dropping a held child deletes it
        self.bodies.update(ctx, |bodies| {
            bodies.iter().copied().filter(|b| *b != body).collect()
        })
    }

    fn clear(&self, ctx: &mut ActionContext<'_>, _: ()) -> ReplicaResult<()> {
        self.bodies.set(ctx, Vec::new())
    }
}

impl Entity for Universe {
    const KIND: &'static str = "Universe";

    fn this(&self) -> EntityRef {
        self.this
    }

    fn impulses(table: &mut ImpulseTable<Self>) -> ReplicaResult<()> {
        table.impulse4(Universe::SPAWN)?;
        table.impulse1(Universe::REMOVE)?;
        table.impulse0(Universe::CLEAR)
    }
}

#[derive(Clone, Debug)]
pub struct Body {
    this: EntityRef,
    pub universe: TrackedField<EntityRef>,
    pub name: TrackedField<String>,
    pub x: TrackedField<f64>,
    pub y: TrackedField<f64>,
    pub vx: TrackedField<f64>,
    pub vy: TrackedField<f64>,
    pub mass: TrackedField<f64>,
}

impl Body {
    pub const PUSH: Impulse<Body, (f64, f64)> = Impulse {
        method: 0,
        name: "push",
        block: Body::push,
    };
    pub const RENAME: Impulse<Body, (String,)> = Impulse {
        method: 1,
        name: "rename",
        block: Body::rename,
    };
    pub const MERGE: Impulse<Body, (EntityRef,)> = Impulse {
        method: 2,
        name: "merge",
        block: Body::merge,
    };

    pub fn build(
        b: &mut EntityBuilder,
        universe: EntityRef,
        name: &str,
        (x, y): (f64, f64),
        mass: f64,
    ) -> Body {
        Body {
            this: b.this(),
            universe: b.key("universe", universe),
            name: b.key("name", name.to_string()),
            x: b.prop("x", x),
            y: b.prop("y", y),
            vx: b.prop("vx", 0.0),
            vy: b.prop("vy", 0.0),
            mass: b.prop("mass", mass),
        }
    }

    /// Change velocity by an impulse, scaled by mass
    fn push(&self, ctx: &mut ActionContext<'_>, (dx, dy): (f64, f64)) -> ReplicaResult<()> {
        let mass = self.mass.value(ctx.world())?;
        self.vx.update(ctx, |vx| vx + dx / mass)?;
        self.vy.update(ctx, |vy| vy + dy / mass)
    }

    fn rename(&self, ctx: &mut ActionContext<'_>, (name,): (String,)) -> ReplicaResult<()> {
        self.name.set(ctx, name)
    }

    /// Absorb another body of the same universe
    fn merge(&self, ctx: &mut ActionContext<'_>, (other,): (EntityRef,)) -> ReplicaResult<()> {
        if other == self.this {
            return Ok(());
        }
        let other: Body = ctx.entity(other)?;
        let universe = self.universe.value(ctx.world())?;
        if other.universe.value(ctx.world())? != universe {
            return Ok(());
        }

        let (m1, m2) = (self.mass.value(ctx.world())?, other.mass.value(ctx.world())?);
        let total = m1 + m2;
        let vx = (self.vx.value(ctx.world())? * m1 + other.vx.value(ctx.world())? * m2) / total;
        let vy = (self.vy.value(ctx.world())? * m1 + other.vy.value(ctx.world())? * m2) / total;
        self.mass.set(ctx, total)?;
        self.vx.set(ctx, vx)?;
        self.vy.set(ctx, vy)?;

        let universe: Universe = ctx.entity(universe)?;
        ctx.invoke(&universe, Universe::REMOVE, (other.this(),))
    }
}

impl Entity for Body {
    const KIND: &'static str = "Body";

    fn this(&self) -> EntityRef {
        self.this
    }

    fn impulses(table: &mut ImpulseTable<Self>) -> ReplicaResult<()> {
        table.impulse2(Body::PUSH)?;
        table.impulse1(Body::RENAME)?;
        table.impulse1(Body::MERGE)
    }
}

/// Create the universe `name` as a system action
pub fn seed_universe<D: Dispatcher>(container: &mut Container<D>, name: &'static str) -> ReplicaResult<Revision> {
    container.bootstrap("universe", move |ctx| {
        ctx.create(|b| Universe::build(b, name))?;
        Ok(())
    })
}

/// Integrate the universe `name` every `interval` timesteps from `origin`
pub fn install_integrator<D: Dispatcher>(
    container: &mut Container<D>,
    name: &'static str,
    origin: i64,
    interval: i64,
) -> ReplicaResult<PeriodicId> {
    container.register_periodic(origin, 0, interval, move |ctx| {
        match ctx.find_entity::<Universe>(&universe_key(name)) {
            Some(universe) => universe.integrate(ctx),
            None => Ok(()),
        }
    })
}
