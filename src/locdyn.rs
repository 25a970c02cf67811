//! Local dynamical system: block operators relating constraint reactions to
//! constraint-local relative velocities through the bodies' inverse inertia.
//!
//! Reactions are average forces over the step while the bodies receive them
//! as impulses, so the assembled blocks carry the step factor:
//! `U = B + (h · baseᵀ H M⁻¹ Hᵀ base) · R`.

use hashbrown::HashMap;
use vek::{Mat3, Vec3};

use crate::{
    body::{Body, BodyId, LocOp},
    constraint::{Constraint, ConstraintId},
};

/// One diagonal block with its off-diagonal neighbours.
#[derive(Debug)]
pub struct Block {
    /// Constraint this block belongs to.
    pub con: ConstraintId,
    /// Diagonal Delassus operator.
    pub w: Mat3<f64>,
    /// Free local velocity.
    pub b: Vec3<f64>,
    /// Off-diagonal blocks toward constraints sharing a body.
    pub adj: Vec<(ConstraintId, Mat3<f64>)>,
    /// Master side point operator.
    pub master_op: LocOp,
    /// Slave side point operator, when the slave carries inertia.
    pub slave_op: Option<LocOp>,
}

/// The assembled system, held between phase five and the end of the step.
#[derive(Debug, Default)]
pub struct LocalDynamics {
    /// Blocks in ascending constraint id order.
    pub blocks: Vec<Block>,
    /// Block index by constraint id.
    pub index: HashMap<ConstraintId, usize>,
}

impl LocalDynamics {
    /// Block of a constraint.
    pub fn block(&self, con: ConstraintId) -> Option<&Block> {
        self.index.get(&con).map(|&i| &self.blocks[i])
    }
}

/// Point operators of one constraint; the slave operator exists only for
/// two-sided constraints whose slave carries inertia.
fn constraint_ops(bodies: &HashMap<BodyId, Body>, con: &Constraint) -> (LocOp, Option<LocOp>) {
    let master = &bodies[&con.master];
    let master_op = master.gen_to_loc(con.msgp, con.mpnt);

    let slave_op = if con.two_sided() {
        let slave = &bodies[&con.slave.expect("two-sided constraint has a slave")];

        (slave.dofs() > 0).then(|| slave.gen_to_loc(con.ssgp, con.spnt))
    } else {
        None
    };

    (master_op, slave_op)
}

/// Assemble the block graph for a step of size `step` and refresh every
/// constraint's free and initial relative velocities.
pub fn assemble(
    bodies: &HashMap<BodyId, Body>,
    constraints: &mut HashMap<ConstraintId, Constraint>,
    step: f64,
) -> LocalDynamics {
    let mut order: Vec<ConstraintId> = constraints.keys().copied().collect();
    order.sort_unstable();

    // Point operators per constraint
    let mut ops: HashMap<ConstraintId, (LocOp, Option<LocOp>)> = HashMap::new();
    for id in &order {
        ops.insert(*id, constraint_ops(bodies, &constraints[id]));
    }

    let mut system = LocalDynamics::default();

    for id in &order {
        let con = &constraints[id];
        let (master_op, slave_op) = &ops[id];
        let base_t = con.base.transposed();

        let master = &bodies[&con.master];

        // Free and initial relative velocities of the slave side with
        // respect to the master, so that separation reads positive along
        // the outward normal
        let mut b = -master_op.apply(&master.velo);
        let mut v = -master_op.apply(&master.prev_velo);
        // Diagonal operator: both sides add up for two-sided constraints
        let mut w = master.delassus(master_op, master_op);

        if let (Some(slave_id), Some(slave_op)) = (con.slave, slave_op.as_ref()) {
            let slave = &bodies[&slave_id];
            b += slave_op.apply(&slave.velo);
            v += slave_op.apply(&slave.prev_velo);
            w += slave.delassus(slave_op, slave_op);
        }

        let w = base_t * w * con.base * step;
        let b = base_t * b;
        let v = base_t * v;

        // Off-diagonal blocks through every shared body
        let mut adj = Vec::new();
        for (body_id, own_op, own_sign) in [
            (Some(con.master), Some(master_op), 1.0),
            (con.slave, slave_op.as_ref(), -1.0),
        ] {
            let body_id = match body_id {
                Some(id) => id,
                None => continue,
            };
            let own_op = match own_op {
                Some(op) => op,
                None => continue,
            };
            let body = &bodies[&body_id];

            for other_id in &body.con {
                if other_id == id {
                    continue;
                }
                let other = match constraints.get(other_id) {
                    Some(other) => other,
                    None => continue,
                };
                let (other_master, other_slave) = &ops[other_id];

                let (other_op, other_sign) = if other.master == body_id {
                    (Some(other_master), 1.0)
                } else {
                    (other_slave.as_ref(), -1.0)
                };
                let other_op = match other_op {
                    Some(op) => op,
                    None => continue,
                };

                let block = base_t * body.delassus(own_op, other_op) * other.base
                    * (own_sign * other_sign * step);
                adj.push((*other_id, block));
            }
        }

        system.index.insert(*id, system.blocks.len());
        system.blocks.push(Block {
            con: *id,
            w,
            b,
            adj,
            master_op: master_op.clone(),
            slave_op: slave_op.clone(),
        });

        let con = constraints.get_mut(id).expect("constraint vanished");
        con.u = b;
        con.v = v;
    }

    system
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use hashbrown::HashMap;
    use vek::Vec3;

    use crate::body::{Body, BodyId, BodyKind, BulkMaterial};
    use crate::constraint::{Constraint, ConstraintId, ConstraintKind};
    use crate::geom::Sphere;
    use crate::math;
    use crate::shape::{Primitive, Shape};

    #[test]
    fn test_single_contact_diagonal() {
        let shape = Shape::single(Primitive::Sphere(Sphere::new(Vec3::zero(), 0.5, 1)));
        let material = BulkMaterial {
            density: 1.0 / (4.0 / 3.0 * std::f64::consts::PI * 0.125),
            ..BulkMaterial::default()
        };
        let mut body = Body::new(BodyKind::Rigid, shape, material);
        body.id = BodyId(1);
        body.dynamic_init().unwrap();

        let mut con = Constraint::new(ConstraintKind::Contact, BodyId(1));
        con.id = ConstraintId(1);
        con.mpnt = Vec3::new(0.0, 0.0, -0.5);
        con.point = Vec3::new(0.0, 0.0, -0.5);
        con.base = math::base_from_normal(Vec3::unit_z());
        body.con.insert(con.id);

        let mut bodies = HashMap::new();
        bodies.insert(BodyId(1), body);
        let mut constraints = HashMap::new();
        constraints.insert(ConstraintId(1), con);

        let system = super::assemble(&bodies, &mut constraints, 1.0);
        let block = system.block(ConstraintId(1)).unwrap();

        // W must be symmetric positive definite on the diagonal
        for i in 0..3 {
            assert!(math::col(&block.w, i)[i] > 0.0);
            for j in 0..3 {
                assert_relative_eq!(
                    math::col(&block.w, i)[j],
                    math::col(&block.w, j)[i],
                    epsilon = 1e-12
                );
            }
        }

        // Normal direction sees at least the inverse mass
        assert!(math::col(&block.w, 2)[2] >= 1.0 - 1e-9);
    }
}
