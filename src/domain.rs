//! The domain: bodies, constraints and the fixed-order step driver.

use std::collections::BTreeSet;

use bitflags::bitflags;
use hashbrown::{HashMap, HashSet};
use itertools::Itertools;
use log::{debug, warn};
use vek::{Aabb, Vec3};

use crate::{
    body::{Body, BodyFlags, BodyId, BodyKind},
    collision::{
        broad::{BoxEntry, BoxIndex},
        narrow, ContactGeometry, Detect, Update,
    },
    constraint::{ConState, Constraint, ConstraintId, ConstraintKind},
    error::Result,
    locdyn::{self, LocalDynamics},
    math,
    shape::GobjKind,
    surface::SurfacePairSet,
    timer::{labels, Timers},
    tms::TimeSeries,
};

bitflags! {
    /// Domain flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DomFlags: u32 {
        /// Unphysical penetration occured.
        const DEPTH_VIOLATED = 0x02;
    }
}

/// Canonical SGP pair key of a contact.
type PairKey = (BodyId, usize, BodyId, usize);

/// Bodies and constraints advanced together in time.
#[derive(Debug)]
pub struct Domain {
    /// Bodies by id.
    pub bodies: HashMap<BodyId, Body>,
    /// Labeled bodies.
    pub labels: HashMap<String, BodyId>,
    /// Constraints by id.
    pub constraints: HashMap<ConstraintId, Constraint>,
    /// Broad phase box index.
    pub boxes: BoxIndex,
    /// Surface pair materials.
    pub sps: SurfacePairSet,
    /// Gravity components over time.
    pub gravity: [TimeSeries; 3],
    /// Scene extents.
    pub extents: Aabb<f64>,
    /// Minimal contact point area.
    pub minarea: f64,
    /// Minimal distance between contact points on the same body pair.
    pub mindist: f64,
    /// Unphysical interpenetration bound (negative).
    pub depth: f64,
    /// Dynamic or quasi-static stepping.
    pub dynamic: bool,
    /// Time step.
    pub step: f64,
    /// Current time.
    pub time: f64,
    /// Most recent constraint satisfaction merit.
    pub merit: f64,
    /// Flags.
    pub flags: DomFlags,
    /// Contacts sparsified during the last detection phase.
    pub nspa: usize,
    /// Last free body id.
    next_bid: u32,
    /// Returned body ids.
    spare_bids: BTreeSet<u32>,
    /// Last free constraint id.
    next_cid: u32,
    /// Returned constraint ids.
    spare_cids: BTreeSet<u32>,
    /// Excluded surface pairs.
    excluded_surfaces: HashSet<(i32, i32)>,
    /// Excluded body pairs.
    excluded_bodies: HashSet<(BodyId, BodyId)>,
    /// Live contacts by SGP pair.
    contacts: HashMap<PairKey, ConstraintId>,
}

impl Domain {
    /// Create a domain; `dynamic` selects dynamics over quasi-statics.
    pub fn new(dynamic: bool, step: f64) -> Self {
        Self {
            bodies: HashMap::new(),
            labels: HashMap::new(),
            constraints: HashMap::new(),
            boxes: BoxIndex::new(),
            sps: SurfacePairSet::default(),
            gravity: [
                TimeSeries::default(),
                TimeSeries::default(),
                TimeSeries::default(),
            ],
            extents: Aabb {
                min: Vec3::broadcast(-f64::MAX),
                max: Vec3::broadcast(f64::MAX),
            },
            minarea: 0.0,
            mindist: 0.0,
            depth: -f64::MAX,
            dynamic,
            step,
            time: 0.0,
            merit: 0.0,
            flags: DomFlags::empty(),
            nspa: 0,
            next_bid: 1,
            spare_bids: BTreeSet::new(),
            next_cid: 1,
            spare_cids: BTreeSet::new(),
            excluded_surfaces: HashSet::new(),
            excluded_bodies: HashSet::new(),
            contacts: HashMap::new(),
        }
    }

    /// Set the gravity series.
    pub fn set_gravity(&mut self, x: TimeSeries, y: TimeSeries, z: TimeSeries) {
        self.gravity = [x, y, z];
    }

    /// Gravity vector at a time.
    pub fn gravity_at(&self, time: f64) -> Vec3<f64> {
        Vec3::new(
            self.gravity[0].value(time),
            self.gravity[1].value(time),
            self.gravity[2].value(time),
        )
    }

    /// Exclude contact between a pair of surfaces.
    pub fn exclude_surfaces(&mut self, surf1: i32, surf2: i32) {
        let key = if surf1 <= surf2 {
            (surf1, surf2)
        } else {
            (surf2, surf1)
        };
        self.excluded_surfaces.insert(key);
    }

    /// Exclude contact between a pair of bodies.
    pub fn exclude_bodies(&mut self, a: BodyId, b: BodyId) {
        let key = if a <= b { (a, b) } else { (b, a) };
        self.excluded_bodies.insert(key);
    }

    /// Whether a surface pair is excluded.
    pub fn surfaces_excluded(&self, surf1: i32, surf2: i32) -> bool {
        let key = if surf1 <= surf2 {
            (surf1, surf2)
        } else {
            (surf2, surf1)
        };
        self.excluded_surfaces.contains(&key)
    }

    /// Allocate a body id from the pool.
    fn alloc_bid(&mut self) -> BodyId {
        match self.spare_bids.pop_first() {
            Some(id) => BodyId(id),
            None => {
                let id = self.next_bid;
                self.next_bid += 1;
                BodyId(id)
            }
        }
    }

    /// Allocate a constraint id from the pool.
    fn alloc_cid(&mut self) -> ConstraintId {
        match self.spare_cids.pop_first() {
            Some(id) => ConstraintId(id),
            None => {
                let id = self.next_cid;
                self.next_cid += 1;
                ConstraintId(id)
            }
        }
    }

    /// Insert a body, assigning its id and registering its boxes.
    pub fn insert_body(&mut self, mut body: Body) -> Result<BodyId> {
        let id = self.alloc_bid();
        body.id = id;

        if self.dynamic {
            body.dynamic_init()?;
        } else {
            body.static_init()?;
        }
        body.update_shape();

        if body.cristep < self.step {
            warn!(
                "body {:?}: time step {} exceeds the critical estimate {}",
                id, self.step, body.cristep
            );
        }

        for (index, sgp) in body.sgps.iter_mut().enumerate() {
            let surface = match sgp.kind {
                GobjKind::Sphere | GobjKind::Ellipsoid => {
                    match body.shape.sgp_ref(sgp) {
                        crate::shape::SgpRef::Sphere(s) => Some(s.surface),
                        crate::shape::SgpRef::Ellipsoid(e) => Some(e.surface),
                        _ => None,
                    }
                }
                _ => None,
            };
            let key = self.boxes.insert(BoxEntry {
                aabb: body.shape.sgp_extents(sgp),
                body: id,
                sgp: index,
                surface,
            });
            sgp.box_key = Some(key);
        }

        if let Some(label) = &body.label {
            self.labels.insert(label.clone(), id);
        }
        self.bodies.insert(id, body);

        Ok(id)
    }

    /// Insert a body read back from a store, keeping its id.
    pub fn insert_body_with_id(&mut self, mut body: Body) -> Result<BodyId> {
        let id = body.id;
        self.spare_bids.remove(&id.0);
        self.next_bid = self.next_bid.max(id.0 + 1);

        if self.dynamic {
            body.dynamic_init()?;
        } else {
            body.static_init()?;
        }
        body.update_shape();

        for (index, sgp) in body.sgps.iter_mut().enumerate() {
            let key = self.boxes.insert(BoxEntry {
                aabb: body.shape.sgp_extents(sgp),
                body: id,
                sgp: index,
                surface: None,
            });
            sgp.box_key = Some(key);
        }

        if let Some(label) = &body.label {
            self.labels.insert(label.clone(), id);
        }
        self.bodies.insert(id, body);

        Ok(id)
    }

    /// Remove a body and everything attached to it.
    pub fn remove_body(&mut self, id: BodyId) {
        let body = match self.bodies.remove(&id) {
            Some(body) => body,
            None => return,
        };

        for cid in body.con.iter().copied().collect::<Vec<_>>() {
            self.remove_constraint(cid);
        }
        for sgp in &body.sgps {
            if let Some(key) = sgp.box_key {
                self.boxes.remove(key);
            }
        }
        if let Some(label) = &body.label {
            self.labels.remove(label);
        }

        self.spare_bids.insert(id.0);
    }

    /// Find a labeled body.
    pub fn find_body(&self, label: &str) -> Option<&Body> {
        self.labels.get(label).and_then(|id| self.bodies.get(id))
    }

    /// Insert a constraint into the graph, assigning its id and the body
    /// backlinks.
    pub fn insert_constraint(&mut self, mut con: Constraint) -> ConstraintId {
        let id = self.alloc_cid();
        con.id = id;

        if let Some(body) = self.bodies.get_mut(&con.master) {
            body.con.insert(id);
        }
        if let Some(slave) = con.slave {
            if let Some(body) = self.bodies.get_mut(&slave) {
                body.con.insert(id);
            }
        }
        self.constraints.insert(id, con);

        id
    }

    /// Remove a constraint, returning its id to the pool unless locked.
    pub fn remove_constraint(&mut self, id: ConstraintId) {
        let con = match self.constraints.remove(&id) {
            Some(con) => con,
            None => return,
        };

        if let Some(body) = self.bodies.get_mut(&con.master) {
            body.con.remove(&id);
        }
        if let Some(slave) = con.slave {
            if let Some(body) = self.bodies.get_mut(&slave) {
                body.con.remove(&id);
            }
        }
        if con.kind == ConstraintKind::Contact {
            self.contacts
                .remove(&pair_key(con.master, con.msgp, con.slave.unwrap_or(con.master), con.ssgp));
        }

        if !con.state.contains(ConState::IDLOCK) {
            self.spare_cids.insert(id.0);
        }
    }

    /// Fix a referential point of a body along all directions.
    pub fn fix_point(&mut self, body: BodyId, point: Vec3<f64>, strength: f64) -> ConstraintId {
        let mut con = Constraint::new(ConstraintKind::FixPoint, body);
        con.mpnt = point;
        con.point = self.bodies[&body].cur_point(0, point);
        // The anchor stays where the point was fixed
        con.z[0] = con.point.x;
        con.z[1] = con.point.y;
        con.z[2] = con.point.z;
        con.z[4] = strength;

        self.insert_constraint(con)
    }

    /// Fix a referential point of a body along a spatial direction; an
    /// optional second body point makes the constraint two-sided.
    pub fn fix_direction(
        &mut self,
        body: BodyId,
        point: Vec3<f64>,
        direction: Vec3<f64>,
        slave: Option<(BodyId, Vec3<f64>)>,
    ) -> ConstraintId {
        let mut con = Constraint::new(ConstraintKind::FixDirection, body);
        con.mpnt = point;
        con.point = self.bodies[&body].cur_point(0, point);
        con.base = math::base_from_normal(direction.normalized());
        if let Some((slave_id, spnt)) = slave {
            con.slave = Some(slave_id);
            con.spnt = spnt;
        }

        self.insert_constraint(con)
    }

    /// Prescribe the velocity of a referential point along a spatial
    /// direction.
    pub fn set_velocity(
        &mut self,
        body: BodyId,
        point: Vec3<f64>,
        direction: Vec3<f64>,
        velocity: TimeSeries,
    ) -> ConstraintId {
        let mut con = Constraint::new(ConstraintKind::VeloDir, body);
        con.mpnt = point;
        con.point = self.bodies[&body].cur_point(0, point);
        con.base = math::base_from_normal(direction.normalized());
        con.tms = Some(velocity);

        self.insert_constraint(con)
    }

    /// Insert a rigid link between two referential points; a missing slave
    /// links the master to a fixed spatial point stored in `spnt`. When the
    /// points coincide a gluing fix-point is inserted instead.
    pub fn put_rigid_link(
        &mut self,
        master: BodyId,
        slave: Option<BodyId>,
        mpnt: Vec3<f64>,
        spnt: Vec3<f64>,
        strength: f64,
    ) -> ConstraintId {
        let master_cur = self.bodies[&master].cur_point(0, mpnt);
        let slave_cur = match slave {
            Some(id) => self.bodies[&id].cur_point(0, spnt),
            None => spnt,
        };
        let link = master_cur - slave_cur;
        let length = link.magnitude();

        if length < math::GEOMETRIC_EPSILON {
            // Coinciding points glue instead
            let mut con = Constraint::new(ConstraintKind::FixPoint, master);
            con.mpnt = mpnt;
            con.spnt = spnt;
            con.slave = slave;
            con.point = master_cur;
            con.z[0] = master_cur.x;
            con.z[1] = master_cur.y;
            con.z[2] = master_cur.z;
            con.z[4] = strength;
            return self.insert_constraint(con);
        }

        let mut con = Constraint::new(ConstraintKind::RigidLink, master);
        con.mpnt = mpnt;
        con.spnt = spnt;
        con.slave = slave;
        con.point = master_cur;
        con.base = math::base_from_normal(link / length);
        con.set_riglnk_vec(link);
        con.z[3] = length;
        con.z[4] = strength;

        self.insert_constraint(con)
    }

    /// Insert a user spring between two referential points.
    #[allow(clippy::too_many_arguments)]
    pub fn put_spring(
        &mut self,
        master: BodyId,
        mpnt: Vec3<f64>,
        slave: Option<BodyId>,
        spnt: Vec3<f64>,
        stiffness: f64,
        dashpot: f64,
        limits: (f64, f64),
    ) -> ConstraintId {
        let master_cur = self.bodies[&master].cur_point(0, mpnt);
        let slave_cur = match slave {
            Some(id) => self.bodies[&id].cur_point(0, spnt),
            None => spnt,
        };
        let link = master_cur - slave_cur;
        let length = link.magnitude().max(math::GEOMETRIC_EPSILON);

        let mut con = Constraint::new(ConstraintKind::Spring, master);
        con.mpnt = mpnt;
        con.spnt = spnt;
        con.slave = slave;
        con.point = master_cur;
        con.base = math::base_from_normal(link / length);
        con.z[0] = stiffness;
        con.z[1] = dashpot;
        con.z[2] = limits.0;
        con.z[3] = limits.1;
        con.z[5] = length;
        con.z[6] = length;

        self.insert_constraint(con)
    }

    /// Initialise at time zero: operators, shapes and boxes.
    pub fn initialize(&mut self) -> Result<()> {
        let ids: Vec<BodyId> = self.sorted_body_ids();

        for id in ids {
            let body = self.bodies.get_mut(&id).expect("body vanished");
            if self.dynamic {
                body.dynamic_init()?;
            } else {
                body.static_init()?;
            }
            body.update_shape();

            if body.cristep < self.step {
                warn!(
                    "body {:?}: time step {} exceeds the critical estimate {}",
                    id, self.step, body.cristep
                );
            }
        }
        self.refresh_boxes();

        Ok(())
    }

    /// Body ids in ascending order.
    pub fn sorted_body_ids(&self) -> Vec<BodyId> {
        self.bodies.keys().copied().sorted().collect()
    }

    /// Constraint ids in ascending order.
    pub fn sorted_constraint_ids(&self) -> Vec<ConstraintId> {
        self.constraints.keys().copied().sorted().collect()
    }

    /// Phase one: refresh every box from the current shapes.
    fn refresh_boxes(&mut self) {
        for body in self.bodies.values() {
            for sgp in &body.sgps {
                if let Some(key) = sgp.box_key {
                    self.boxes.update(key, body.shape.sgp_extents(sgp));
                }
            }
        }
    }

    /// Initial half of the step: phases one to five; returns the assembled
    /// local dynamical system.
    pub fn update_begin(&mut self, timers: &mut Timers) -> Result<LocalDynamics> {
        // Phase 1: extents refresh
        timers.start(labels::TIMINT);
        let ids = self.sorted_body_ids();
        for id in &ids {
            let body = self.bodies.get_mut(id).expect("body vanished");
            body.update_shape();
        }
        self.refresh_boxes();

        // Phase 2: time integration begin
        for id in &ids {
            let body = self.bodies.get_mut(id).expect("body vanished");
            body.step_begin(self.time, self.step);
        }
        timers.stop(labels::TIMINT);

        // Phase 3: contact update, then fresh detection
        timers.start(labels::CONUPD);
        self.nspa = 0;
        self.update_existing_contacts();
        self.update_bilateral_geometry();
        timers.stop(labels::CONUPD);

        timers.start(labels::CONDET);
        self.detect_new_contacts();
        timers.stop(labels::CONDET);

        // Phase 4: external force resolution at the mid step
        timers.start(labels::TIMINT);
        let gravity = self.gravity_at(self.time + 0.5 * self.step);
        for id in &ids {
            let body = self.bodies.get_mut(id).expect("body vanished");
            body.apply_forces(self.time, self.step, gravity, self.dynamic);
        }
        // Prescribed velocities are sampled for the end of the step
        let end_time = self.time + self.step;
        for con in self.constraints.values_mut() {
            if con.kind == ConstraintKind::VeloDir {
                if let Some(series) = &con.tms {
                    con.z[0] = series.value(end_time);
                }
            }
        }
        timers.stop(labels::TIMINT);

        // Phase 5: local system assembly
        timers.start(labels::LOCDYN);
        let system = locdyn::assemble(&self.bodies, &mut self.constraints, self.step);
        timers.stop(labels::LOCDYN);

        Ok(system)
    }

    /// Final half of the step: impulses, phase seven and the time advance.
    pub fn update_end(&mut self, system: &LocalDynamics, timers: &mut Timers) -> Result<()> {
        timers.start(labels::TIMINT);

        // Anchors whose tension exceeds their tensile strength release
        // before any impulse is applied, like cohesive contacts break
        let mut released: Vec<ConstraintId> = Vec::new();
        for block in &system.blocks {
            if let Some(con) = self.constraints.get(&block.con) {
                let tension = match con.kind {
                    ConstraintKind::RigidLink => con.r.z,
                    ConstraintKind::FixPoint => con.r.magnitude(),
                    _ => continue,
                };
                if tension > con.strength() {
                    released.push(con.id);
                }
            }
        }
        for id in released {
            warn!("constraint {id:?} released: reaction exceeded its tensile strength");
            self.remove_constraint(id);
        }

        // Convert the reactions into generalised impulses
        for block in &system.blocks {
            let con = match self.constraints.get(&block.con) {
                Some(con) => con,
                None => continue,
            };
            if con.r == Vec3::zero() {
                continue;
            }

            let base = con.base;
            let r = con.r;
            let master = con.master;
            let slave = con.slave;

            // The reaction acts on the slave side; the master takes the
            // opposite
            if let Some(body) = self.bodies.get_mut(&master) {
                body.apply_impulse(&block.master_op, &base, -r, self.step);
            }
            if let (Some(slave_id), Some(op)) = (slave, block.slave_op.as_ref()) {
                if let Some(body) = self.bodies.get_mut(&slave_id) {
                    body.apply_impulse(op, &base, r, self.step);
                }
            }

            // Dissipation bookkeeping: impulse times the mean of the free
            // and the constrained relative velocity
            if con.kind == ConstraintKind::Contact {
                let avg = (block.b + con.u) * 0.5;
                let con_work = self.step * con.r.z * avg.z;
                let fric_work = self.step * (con.r.x * avg.x + con.r.y * avg.y);
                if let Some(body) = self.bodies.get_mut(&master) {
                    body.energy[crate::body::energy::CONTACT] += con_work;
                    body.energy[crate::body::energy::FRICTION] += fric_work;
                }
            }
        }

        // Phase 7: time integration end
        let ids = self.sorted_body_ids();
        for id in &ids {
            let body = self.bodies.get_mut(id).expect("body vanished");
            body.step_end(self.time, self.step)?;
            body.step_done();
        }

        // Residual drift leaves through position projection
        self.project_positions(system);
        timers.stop(labels::TIMINT);

        // Constraints settle into their steady state
        for con in self.constraints.values_mut() {
            con.state.remove(ConState::NEW);
        }

        self.time += self.step;

        Ok(())
    }

    /// Phase three, first half: refresh the live contacts in update mode.
    fn update_existing_contacts(&mut self) {
        let mut stale: Vec<ConstraintId> = Vec::new();
        let contact_ids: Vec<ConstraintId> = {
            let mut ids: Vec<ConstraintId> = self
                .constraints
                .iter()
                .filter(|(_, c)| c.kind == ConstraintKind::Contact)
                .map(|(id, _)| *id)
                .collect();
            ids.sort_unstable();
            ids
        };

        for id in contact_ids {
            let (master, slave, msgp, ssgp, spair) = {
                let con = &self.constraints[&id];
                (
                    con.master,
                    con.slave.unwrap_or(con.master),
                    con.msgp,
                    con.ssgp,
                    con.spair,
                )
            };

            let result = {
                let master_body = &self.bodies[&master];
                let slave_body = &self.bodies[&slave];
                let mref = master_body.shape.sgp_ref(&master_body.sgps[msgp]);
                let sref = slave_body.shape.sgp_ref(&slave_body.sgps[ssgp]);

                narrow::update(&mref, &sref, spair)
            };

            match result {
                Update::Gone => stale.push(id),
                Update::Reject => {
                    warn!("contact {id:?} rejected by the geometry sanity check");
                    stale.push(id);
                }
                Update::SurfaceChanged(_) => {
                    // The surface pair moved on: request a fresh detection
                    debug!("contact {id:?} changed its surface pair");
                    stale.push(id);
                }
                Update::Updated(geometry) => {
                    self.depth_check(&geometry);

                    let mpnt = self.bodies[&master].ref_point(msgp, geometry.point);
                    let spnt = self.bodies[&slave].ref_point(ssgp, geometry.slave_point);
                    let con = self.constraints.get_mut(&id).expect("contact vanished");
                    con.point = geometry.point;
                    con.base = math::base_from_normal(geometry.normal);
                    con.gap = geometry.gap;
                    con.area = geometry.area;
                    con.mpnt = mpnt;
                    con.spnt = spnt;
                }
            }
        }
        for id in stale {
            self.remove_constraint(id);
        }
    }

    /// Phase three, second half: narrow phase over the broad phase
    /// candidates, with sparsification.
    fn detect_new_contacts(&mut self) {
        let pairs = {
            let excluded_surfaces = &self.excluded_surfaces;
            let excluded_bodies = &self.excluded_bodies;
            let bodies = &self.bodies;

            self.boxes.overlapping_pairs(|a, b| {
                if a.body == b.body {
                    // Self contact is opt-in per body
                    if a.sgp == b.sgp {
                        return false;
                    }
                    return bodies
                        .get(&a.body)
                        .map(|body| body.flags.contains(BodyFlags::SELF_CONTACT))
                        .unwrap_or(false);
                }

                let key = if a.body <= b.body {
                    (a.body, b.body)
                } else {
                    (b.body, a.body)
                };
                if excluded_bodies.contains(&key) {
                    return false;
                }

                if let (Some(sa), Some(sb)) = (a.surface, b.surface) {
                    let key = if sa <= sb { (sa, sb) } else { (sb, sa) };
                    if excluded_surfaces.contains(&key) {
                        return false;
                    }
                }

                // Obstacle pairs carry no unknowns
                let dofs = |id| bodies.get(&id).map(|b: &Body| b.dofs()).unwrap_or(0);
                dofs(a.body) > 0 || dofs(b.body) > 0
            })
        };

        for (ka, kb) in pairs {
            let (one, two) = match (self.boxes.get(ka), self.boxes.get(kb)) {
                (Some(a), Some(b)) => (*a, *b),
                _ => continue,
            };
            let key = pair_key(one.body, one.sgp, two.body, two.sgp);
            if self.contacts.contains_key(&key) {
                continue;
            }

            let detection = {
                let body_one = &self.bodies[&one.body];
                let body_two = &self.bodies[&two.body];
                let ref_one = body_one.shape.sgp_ref(&body_one.sgps[one.sgp]);
                let ref_two = body_two.shape.sgp_ref(&body_two.sgps[two.sgp]);

                narrow::detect(&ref_one, &ref_two)
            };

            let (geometry, master_is_second) = match detection {
                Detect::NoContact => continue,
                Detect::Reject => {
                    warn!(
                        "contact between {:?}/{} and {:?}/{} rejected by the geometry sanity check",
                        one.body, one.sgp, two.body, two.sgp
                    );
                    continue;
                }
                Detect::Contact {
                    geometry,
                    master_is_second,
                } => (geometry, master_is_second),
            };

            // Sparsification by area and by proximity to existing contacts
            if geometry.area < self.minarea {
                self.nspa += 1;
                continue;
            }
            if self.mindist > 0.0 && self.near_existing_contact(one.body, two.body, geometry.point)
            {
                self.nspa += 1;
                continue;
            }
            self.depth_check(&geometry);

            let (master, msgp, slave, ssgp) = if master_is_second {
                (two.body, two.sgp, one.body, one.sgp)
            } else {
                (one.body, one.sgp, two.body, two.sgp)
            };

            let mat = self.sps.get(geometry.spair[0], geometry.spair[1]);
            let mpnt = self.bodies[&master].ref_point(msgp, geometry.point);
            let spnt = self.bodies[&slave].ref_point(ssgp, geometry.slave_point);

            let mut con = Constraint::new(ConstraintKind::Contact, master);
            con.slave = Some(slave);
            con.msgp = msgp;
            con.ssgp = ssgp;
            con.point = geometry.point;
            con.base = math::base_from_normal(geometry.normal);
            con.gap = geometry.gap;
            con.area = geometry.area;
            con.spair = geometry.spair;
            con.mat = mat;
            con.mpnt = mpnt;
            con.spnt = spnt;
            if mat.cohesion > 0.0 {
                con.state.insert(ConState::COHESIVE);
            }

            let id = self.insert_constraint(con);
            self.contacts.insert(key, id);
        }
    }

    /// Refresh the spatial points, frames and auxiliary data of the
    /// bilateral constraints from the mid-step configuration.
    fn update_bilateral_geometry(&mut self) {
        let ids = self.sorted_constraint_ids();

        for id in ids {
            let (kind, master, slave, mpnt, spnt) = {
                let con = &self.constraints[&id];
                (con.kind, con.master, con.slave, con.mpnt, con.spnt)
            };
            if kind == ConstraintKind::Contact {
                continue;
            }

            let master_cur = self.bodies[&master].cur_point(0, mpnt);
            let slave_cur = match slave {
                Some(slave_id) => self.bodies[&slave_id].cur_point(0, spnt),
                None => spnt,
            };

            let con = self.constraints.get_mut(&id).expect("constraint vanished");
            con.point = master_cur;

            match kind {
                ConstraintKind::RigidLink => {
                    let link = master_cur - slave_cur;
                    let length = link.magnitude();
                    if length > math::GEOMETRIC_EPSILON {
                        con.base = math::base_from_normal(link / length);
                    }
                    con.set_riglnk_vec(link);
                }
                ConstraintKind::Spring => {
                    let link = master_cur - slave_cur;
                    let length = link.magnitude();
                    if length > math::GEOMETRIC_EPSILON {
                        con.base = math::base_from_normal(link / length);
                    }
                    con.z[6] = length;
                }
                _ => {}
            }
        }
    }

    /// Positional stabilisation after the velocity step: project residual
    /// contact penetration, link length drift and fix-point drift out of the
    /// configurations without touching the velocities.
    fn project_positions(&mut self, system: &LocalDynamics) {
        for block in &system.blocks {
            let con = match self.constraints.get(&block.con) {
                Some(con) => con,
                None => continue,
            };

            // The blocks carry the step factor; positional impulses act on
            // the configuration directly, so it is divided back out
            let wnn = math::col(&block.w, 2).z / self.step;
            if wnn <= 0.0 {
                continue;
            }

            let correction = match con.kind {
                ConstraintKind::Contact => {
                    // Gap left over after the constrained half step
                    let end_gap = con.gap + 0.5 * self.step * con.u.z;
                    if end_gap >= 0.0 {
                        continue;
                    }

                    Vec3::new(0.0, 0.0, -end_gap / wnn)
                }
                ConstraintKind::RigidLink => {
                    let master_cur = self.bodies[&con.master].cur_point(0, con.mpnt);
                    let slave_cur = match con.slave {
                        Some(id) => self.bodies[&id].cur_point(0, con.spnt),
                        None => con.spnt,
                    };
                    let error = (master_cur - slave_cur).magnitude() - con.riglnk_len();
                    if error.abs() < 1e-12 {
                        continue;
                    }

                    Vec3::new(0.0, 0.0, error / wnn)
                }
                ConstraintKind::FixPoint => {
                    let master_cur = self.bodies[&con.master].cur_point(0, con.mpnt);
                    let target = match con.slave {
                        Some(id) => self.bodies[&id].cur_point(0, con.spnt),
                        None => Vec3::new(con.z[0], con.z[1], con.z[2]),
                    };
                    let error = con.base.transposed() * (master_cur - target);
                    if error.magnitude() < 1e-12 {
                        continue;
                    }

                    match math::solve(&block.w, error) {
                        Some(delta) => delta * self.step,
                        None => continue,
                    }
                }
                _ => continue,
            };

            let base = con.base;
            let master = con.master;
            let slave = con.slave;

            if let Some(body) = self.bodies.get_mut(&master) {
                body.apply_position_impulse(&block.master_op, &base, -correction);
            }
            if let (Some(slave_id), Some(op)) = (slave, block.slave_op.as_ref()) {
                if let Some(body) = self.bodies.get_mut(&slave_id) {
                    body.apply_position_impulse(op, &base, correction);
                }
            }
        }
    }

    /// Raise the depth violation flag on excessive penetration.
    fn depth_check(&mut self, geometry: &ContactGeometry) {
        if geometry.gap < self.depth {
            if !self.flags.contains(DomFlags::DEPTH_VIOLATED) {
                warn!(
                    "interpenetration {} exceeds the configured depth bound {}",
                    geometry.gap, self.depth
                );
            }
            self.flags.insert(DomFlags::DEPTH_VIOLATED);
        }
    }

    /// Whether another contact between the same body pair lies within the
    /// sparsification distance of a point.
    fn near_existing_contact(&self, a: BodyId, b: BodyId, point: Vec3<f64>) -> bool {
        self.constraints.values().any(|con| {
            con.kind == ConstraintKind::Contact
                && ((con.master == a && con.slave == Some(b))
                    || (con.master == b && con.slave == Some(a)))
                && (con.point - point).magnitude() < self.mindist
        })
    }

    /// Drop every constraint, as state reads replace them wholesale.
    pub fn clear_constraints(&mut self) {
        let ids = self.sorted_constraint_ids();
        for id in ids {
            self.remove_constraint(id);
        }
        self.contacts.clear();
    }

    /// Insert a constraint read back from a store, keeping its id and
    /// wiring the body backlinks.
    pub fn attach_read_constraint(&mut self, con: Constraint) {
        let id = con.id;
        self.spare_cids.remove(&id.0);
        self.next_cid = self.next_cid.max(id.0 + 1);

        if let Some(body) = self.bodies.get_mut(&con.master) {
            body.con.insert(id);
        }
        if let Some(slave) = con.slave {
            if let Some(body) = self.bodies.get_mut(&slave) {
                body.con.insert(id);
            }
        }
        if con.kind == ConstraintKind::Contact {
            self.contacts.insert(
                pair_key(con.master, con.msgp, con.slave.unwrap_or(con.master), con.ssgp),
                id,
            );
        }
        self.constraints.insert(id, con);
    }

    /// Live body count.
    pub fn nbod(&self) -> usize {
        self.bodies.len()
    }

    /// Live constraint count.
    pub fn ncon(&self) -> usize {
        self.constraints.len()
    }

    /// Total velocity degrees of freedom.
    pub fn dofs(&self) -> usize {
        self.bodies.values().map(|b| b.dofs()).sum()
    }
}

/// Canonical SGP pair key.
fn pair_key(a: BodyId, asgp: usize, b: BodyId, bsgp: usize) -> PairKey {
    if (a, asgp) <= (b, bsgp) {
        (a, asgp, b, bsgp)
    } else {
        (b, bsgp, a, asgp)
    }
}

#[cfg(test)]
mod tests {
    use vek::Vec3;

    use crate::body::{Body, BodyKind, BulkMaterial};
    use crate::constraint::ConstraintKind;
    use crate::geom::Sphere;
    use crate::shape::{Primitive, Shape};
    use crate::timer::Timers;

    use super::Domain;

    fn sphere_body(center: Vec3<f64>) -> Body {
        let shape = Shape::single(Primitive::Sphere(Sphere::new(center, 0.5, 1)));

        Body::new(BodyKind::Rigid, shape, BulkMaterial::default())
    }

    #[test]
    fn test_id_reuse() {
        let mut dom = Domain::new(true, 1e-3);

        let a = dom.insert_body(sphere_body(Vec3::zero())).unwrap();
        let b = dom.insert_body(sphere_body(Vec3::unit_x() * 3.0)).unwrap();
        assert_ne!(a, b);

        dom.remove_body(a);
        let c = dom.insert_body(sphere_body(Vec3::unit_y() * 3.0)).unwrap();
        // Freed ids come back from the pool
        assert_eq!(c, a);
    }

    #[test]
    fn test_touching_spheres_make_one_contact() {
        let mut dom = Domain::new(true, 1e-3);

        dom.insert_body(sphere_body(Vec3::zero())).unwrap();
        dom.insert_body(sphere_body(Vec3::new(0.95, 0.0, 0.0)))
            .unwrap();

        let mut timers = Timers::new();
        let system = dom.update_begin(&mut timers).unwrap();

        assert_eq!(dom.ncon(), 1);
        assert_eq!(system.blocks.len(), 1);

        let con = dom.constraints.values().next().unwrap();
        assert_eq!(con.kind, ConstraintKind::Contact);
        assert!(con.gap <= 0.0);

        dom.update_end(&system, &mut timers).unwrap();
        assert!((dom.time - 1e-3).abs() < 1e-12);
    }

    #[test]
    fn test_excluded_body_pair() {
        let mut dom = Domain::new(true, 1e-3);

        let a = dom.insert_body(sphere_body(Vec3::zero())).unwrap();
        let b = dom
            .insert_body(sphere_body(Vec3::new(0.9, 0.0, 0.0)))
            .unwrap();
        dom.exclude_bodies(a, b);

        let mut timers = Timers::new();
        let system = dom.update_begin(&mut timers).unwrap();
        assert_eq!(dom.ncon(), 0);
        dom.update_end(&system, &mut timers).unwrap();
    }

    #[test]
    fn test_constraint_backlinks() {
        let mut dom = Domain::new(true, 1e-3);

        let a = dom.insert_body(sphere_body(Vec3::zero())).unwrap();
        let id = dom.fix_point(a, Vec3::zero(), f64::INFINITY);

        assert!(dom.bodies[&a].con.contains(&id));
        dom.remove_constraint(id);
        assert!(!dom.bodies[&a].con.contains(&id));
    }

    #[test]
    fn test_detection_idempotent() {
        let mut dom = Domain::new(true, 1e-3);

        dom.insert_body(sphere_body(Vec3::zero())).unwrap();
        dom.insert_body(sphere_body(Vec3::new(0.95, 0.0, 0.0)))
            .unwrap();

        let mut timers = Timers::new();

        // First step detects, second updates; the set stays put
        let system = dom.update_begin(&mut timers).unwrap();
        dom.update_end(&system, &mut timers).unwrap();
        let ids1 = dom.sorted_constraint_ids();
        let point1 = dom.constraints.values().next().unwrap().point;

        let system = dom.update_begin(&mut timers).unwrap();
        dom.update_end(&system, &mut timers).unwrap();
        let ids2 = dom.sorted_constraint_ids();
        let point2 = dom.constraints.values().next().unwrap().point;

        assert_eq!(ids1, ids2);
        assert!((point1 - point2).magnitude() < 1e-3);
    }
}
