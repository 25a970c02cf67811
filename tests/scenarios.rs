//! End-to-end stepping scenarios driven straight through the domain.

use approx::assert_relative_eq;
use vek::Vec3;

use nsdyn::{
    body::{energy, Body, BodyKind, BulkMaterial},
    constraint::ConstraintKind,
    geom::{Convex, Ellipsoid, Sphere},
    shape::{Primitive, Shape},
    surface::SurfaceMaterial,
    timer::Timers,
    tms::TimeSeries,
    Domain, SolverKind,
};

/// Advance one step with a solver.
fn step(dom: &mut Domain, solver: &mut SolverKind, timers: &mut Timers) {
    let system = dom.update_begin(timers).unwrap();
    dom.merit = solver.solve(&system, &mut dom.constraints, dom.dynamic, dom.step);
    dom.update_end(&system, timers).unwrap();
}

/// Rigid sphere body of unit mass.
fn unit_sphere(center: Vec3<f64>, radius: f64, surface: i32) -> Body {
    let shape = Shape::single(Primitive::Sphere(Sphere::new(center, radius, surface)));
    let material = BulkMaterial {
        density: 1.0 / (4.0 / 3.0 * std::f64::consts::PI * radius.powi(3)),
        ..BulkMaterial::default()
    };

    Body::new(BodyKind::Rigid, shape, material)
}

/// Ground slab obstacle with its top face at zero.
fn ground() -> Body {
    let shape = Shape::single(Primitive::Convex(Convex::cuboid(
        Vec3::new(-20.0, -20.0, -1.0),
        Vec3::new(20.0, 20.0, 0.0),
        1,
    )));

    Body::new(BodyKind::Obstacle, shape, BulkMaterial::default())
}

#[test]
fn two_spheres_free_fall_onto_plane() {
    let mut dom = Domain::new(true, 1e-3);
    dom.set_gravity(
        TimeSeries::constant(0.0),
        TimeSeries::constant(0.0),
        TimeSeries::constant(-9.81),
    );
    dom.sps.default = SurfaceMaterial {
        friction: 0.3,
        ..SurfaceMaterial::default()
    };

    dom.insert_body(ground()).unwrap();
    let a = dom.insert_body(unit_sphere(Vec3::new(0.0, 0.0, 0.6), 0.5, 2)).unwrap();
    let b = dom.insert_body(unit_sphere(Vec3::new(0.0, 0.0, 1.8), 0.5, 2)).unwrap();

    let mut solver = SolverKind::gauss_seidel();
    let mut timers = Timers::new();
    for _ in 0..1000 {
        step(&mut dom, &mut solver, &mut timers);
    }

    // Both spheres settle with negligible vertical velocity
    for id in [a, b] {
        let body = &dom.bodies[&id];
        assert!(
            body.velo[5].abs() <= 1e-2,
            "sphere {id:?} still moves at {}",
            body.velo[5]
        );
    }

    // Contacts carry no more than rounding-level penetration
    assert!(dom.ncon() >= 2);
    for con in dom.constraints.values() {
        assert!(con.gap >= -1e-6, "gap {} too deep", con.gap);
    }

    // The dissipated contact work accounts for the kinetic energy lost
    let mut external = 0.0;
    let mut dissipated = 0.0;
    let mut kinetic = 0.0;
    for body in dom.bodies.values() {
        external += body.energy[energy::EXTERNAL];
        dissipated += body.energy[energy::CONTACT] + body.energy[energy::FRICTION];
        kinetic += body.energy[energy::KINETIC];
    }
    let lost = external - kinetic;
    assert!(lost > 0.0);
    assert_relative_eq!(-dissipated, lost, max_relative = 0.01);
}

#[test]
fn rigid_pendulum_keeps_link_length() {
    let mut dom = Domain::new(true, 1e-3);
    dom.set_gravity(
        TimeSeries::constant(0.0),
        TimeSeries::constant(0.0),
        TimeSeries::constant(-9.81),
    );

    let bob = dom
        .insert_body(unit_sphere(Vec3::new(1.0, 0.0, 0.0), 0.05, 2))
        .unwrap();
    dom.put_rigid_link(bob, None, Vec3::new(1.0, 0.0, 0.0), Vec3::zero(), f64::INFINITY);

    let mut solver = SolverKind::gauss_seidel();
    let mut timers = Timers::new();
    let mut min_z = f64::MAX;

    for i in 0..10_000 {
        step(&mut dom, &mut solver, &mut timers);

        let center = Vec3::new(
            dom.bodies[&bob].conf[9],
            dom.bodies[&bob].conf[10],
            dom.bodies[&bob].conf[11],
        );
        min_z = min_z.min(center.z);

        if i % 250 == 0 {
            let length = center.magnitude();
            assert!(
                (length - 1.0).abs() <= 1e-6,
                "link length {length} drifted at step {i}"
            );
        }
    }

    // The bob swung through the bottom of its arc
    assert!(min_z < -0.9);
}

#[test]
fn rigid_link_releases_at_tensile_strength() {
    let mut dom = Domain::new(true, 1e-3);
    dom.set_gravity(
        TimeSeries::constant(0.0),
        TimeSeries::constant(0.0),
        TimeSeries::constant(-9.81),
    );

    // A unit mass hanging below the origin loads the link with its weight
    let bob = dom
        .insert_body(unit_sphere(Vec3::new(0.0, 0.0, -1.0), 0.05, 2))
        .unwrap();
    dom.put_rigid_link(bob, None, Vec3::new(0.0, 0.0, -1.0), Vec3::zero(), 5.0);
    assert_eq!(dom.ncon(), 1);

    let mut solver = SolverKind::gauss_seidel();
    let mut timers = Timers::new();
    for _ in 0..500 {
        step(&mut dom, &mut solver, &mut timers);
    }

    // The weight exceeds the 5 N strength: the link snapped on the first
    // step and the bob has been falling freely since
    assert_eq!(dom.ncon(), 0);
    assert_relative_eq!(dom.bodies[&bob].velo[5], -9.81 * 0.5, epsilon = 1e-9);
}

#[test]
fn rigid_link_holds_below_tensile_strength() {
    let mut dom = Domain::new(true, 1e-3);
    dom.set_gravity(
        TimeSeries::constant(0.0),
        TimeSeries::constant(0.0),
        TimeSeries::constant(-9.81),
    );

    let bob = dom
        .insert_body(unit_sphere(Vec3::new(0.0, 0.0, -1.0), 0.05, 2))
        .unwrap();
    dom.put_rigid_link(bob, None, Vec3::new(0.0, 0.0, -1.0), Vec3::zero(), 20.0);

    let mut solver = SolverKind::gauss_seidel();
    let mut timers = Timers::new();
    for _ in 0..500 {
        step(&mut dom, &mut solver, &mut timers);
    }

    // Twice the weight in reserve: the link carries the bob
    assert_eq!(dom.ncon(), 1);
    assert_relative_eq!(dom.bodies[&bob].conf[11], -1.0, epsilon = 1e-6);
}

#[test]
fn prescribed_velocity_slider() {
    let mut dom = Domain::new(true, 1e-3);

    let shape = Shape::single(Primitive::Convex(Convex::cuboid(
        Vec3::broadcast(-0.5),
        Vec3::broadcast(0.5),
        1,
    )));
    let cube = dom
        .insert_body(Body::new(BodyKind::Rigid, shape, BulkMaterial::default()))
        .unwrap();

    dom.set_velocity(
        cube,
        Vec3::zero(),
        Vec3::unit_z(),
        TimeSeries::constant(0.1),
    );
    dom.bodies
        .get_mut(&cube)
        .unwrap()
        .initial_velocity(Vec3::new(0.0, 0.0, 0.1), Vec3::zero());

    let mut solver = SolverKind::gauss_seidel();
    let mut timers = Timers::new();
    for _ in 0..2000 {
        step(&mut dom, &mut solver, &mut timers);
    }

    let z = dom.bodies[&cube].conf[11];
    assert_relative_eq!(z, 0.2, epsilon = 1e-6);
}

#[test]
fn sphere_ellipsoid_glancing() {
    let mut dom = Domain::new(true, 1e-3);

    let sphere = unit_sphere(Vec3::new(-0.75, 0.0, 0.0), 0.2, 2);
    let a = dom.insert_body(sphere).unwrap();
    dom.bodies
        .get_mut(&a)
        .unwrap()
        .initial_velocity(Vec3::new(1.0, 0.0, 0.0), Vec3::zero());

    let shape = Shape::single(Primitive::Ellipsoid(Ellipsoid::new(
        Vec3::zero(),
        Vec3::new(0.5, 0.3, 0.3),
        3,
    )));
    let material = BulkMaterial {
        density: 1.0 / (4.0 / 3.0 * std::f64::consts::PI * 0.5 * 0.3 * 0.3),
        ..BulkMaterial::default()
    };
    dom.insert_body(Body::new(BodyKind::Rigid, shape, material))
        .unwrap();

    let mut solver = SolverKind::gauss_seidel();
    let mut timers = Timers::new();
    let mut contact_seen = false;

    for _ in 0..200 {
        step(&mut dom, &mut solver, &mut timers);

        for con in dom.constraints.values() {
            if con.kind != ConstraintKind::Contact {
                continue;
            }
            contact_seen = true;

            let normal = nsdyn::math::col(&con.base, 2);
            assert_relative_eq!(normal.magnitude(), 1.0, epsilon = 1e-9);
            assert!(normal.x > 0.0, "normal points backward: {normal:?}");
            assert!(con.gap <= 0.0);
        }
    }

    assert!(contact_seen, "the sphere never touched the ellipsoid");
}

#[test]
fn stacked_cubes_stay_put() {
    let mut dom = Domain::new(true, 1e-3);
    dom.set_gravity(
        TimeSeries::constant(0.0),
        TimeSeries::constant(0.0),
        TimeSeries::constant(-9.81),
    );
    dom.sps.default = SurfaceMaterial {
        friction: 0.5,
        ..SurfaceMaterial::default()
    };

    dom.insert_body(ground()).unwrap();

    let mut lowest = None;
    for level in 0..10 {
        let shape = Shape::single(Primitive::Convex(Convex::cuboid(
            Vec3::new(-0.5, -0.5, level as f64),
            Vec3::new(0.5, 0.5, level as f64 + 1.0),
            2,
        )));
        let id = dom
            .insert_body(Body::new(BodyKind::Rigid, shape, BulkMaterial::default()))
            .unwrap();
        if level == 0 {
            lowest = Some(id);
        }
    }
    let lowest = lowest.unwrap();
    let start_z = dom.bodies[&lowest].conf[11];

    let mut solver = SolverKind::gauss_seidel();
    let mut timers = Timers::new();
    for _ in 0..5000 {
        step(&mut dom, &mut solver, &mut timers);
    }

    let displacement = (dom.bodies[&lowest].conf[11] - start_z).abs();
    assert!(
        displacement < 1e-3,
        "the lowest cube drifted by {displacement}"
    );
}

#[test]
fn quasi_static_mode_steps() {
    let mut dom = Domain::new(false, 1e-2);
    dom.set_gravity(
        TimeSeries::constant(0.0),
        TimeSeries::constant(0.0),
        TimeSeries::constant(-9.81),
    );

    dom.insert_body(ground()).unwrap();
    dom.insert_body(unit_sphere(Vec3::new(0.0, 0.0, 0.5), 0.5, 2))
        .unwrap();

    let mut solver = SolverKind::gauss_seidel();
    let mut timers = Timers::new();
    for _ in 0..10 {
        step(&mut dom, &mut solver, &mut timers);
    }

    // The resting sphere barely moves under quasi-statics
    let body = dom.bodies.values().find(|b| b.dofs() > 0).unwrap();
    assert!(body.conf[11] > 0.49);
}

#[test]
fn orthonormal_bases_after_steps() {
    let mut dom = Domain::new(true, 1e-3);
    dom.set_gravity(
        TimeSeries::constant(0.0),
        TimeSeries::constant(0.0),
        TimeSeries::constant(-9.81),
    );

    dom.insert_body(ground()).unwrap();
    dom.insert_body(unit_sphere(Vec3::new(0.0, 0.0, 0.55), 0.5, 2))
        .unwrap();
    dom.insert_body(unit_sphere(Vec3::new(0.4, 0.0, 1.5), 0.5, 2))
        .unwrap();

    let mut solver = SolverKind::gauss_seidel();
    let mut timers = Timers::new();
    for _ in 0..300 {
        step(&mut dom, &mut solver, &mut timers);

        for con in dom.constraints.values() {
            let base = con.base;
            let id = base * base.transposed();
            for i in 0..3 {
                for j in 0..3 {
                    let expected = if i == j { 1.0 } else { 0.0 };
                    assert_relative_eq!(
                        nsdyn::math::col(&id, j)[i],
                        expected,
                        epsilon = 1e-9
                    );
                }
            }

            // Contact points sit inside both shapes
            if con.kind == ConstraintKind::Contact {
                assert!(con.area >= 0.0);
                let master = &dom.bodies[&con.master];
                assert!(master.shape.point_distance(con.point) <= 1e-6);
            }
        }
    }
}
