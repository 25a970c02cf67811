//! Frame store round trips: rewriting, replaying and remapping state.

use approx::assert_relative_eq;
use vek::Vec3;

use nsdyn::{
    body::{Body, BodyId, BodyKind, BulkMaterial},
    geom::{Convex, Sphere},
    io::pbf::{Compression, FrameReader},
    mesh::Mesh,
    shape::{Primitive, Shape},
    surface::SurfaceMaterial,
    tms::TimeSeries,
    Domain, Simulation, SolverKind,
};

/// Drop scene: a slab and two labeled spheres.
fn drop_domain(step: f64) -> Domain {
    let mut dom = Domain::new(true, step);
    dom.set_gravity(
        TimeSeries::constant(0.0),
        TimeSeries::constant(0.0),
        TimeSeries::constant(-9.81),
    );
    dom.sps.default = SurfaceMaterial {
        friction: 0.3,
        ..SurfaceMaterial::default()
    };

    let ground = Shape::single(Primitive::Convex(Convex::cuboid(
        Vec3::new(-10.0, -10.0, -1.0),
        Vec3::new(10.0, 10.0, 0.0),
        1,
    )));
    dom.insert_body(
        Body::new(BodyKind::Obstacle, ground, BulkMaterial::default()).with_label("ground"),
    )
    .unwrap();

    for (i, z) in [0.6, 1.8].into_iter().enumerate() {
        let shape = Shape::single(Primitive::Sphere(Sphere::new(
            Vec3::new(0.0, 0.0, z),
            0.5,
            2,
        )));
        let material = BulkMaterial {
            density: 1.0 / (4.0 / 3.0 * std::f64::consts::PI * 0.125),
            ..BulkMaterial::default()
        };
        dom.insert_body(
            Body::new(BodyKind::Rigid, shape, material).with_label(format!("ball{i}")),
        )
        .unwrap();
    }

    dom
}

#[test]
fn reopen_and_seek_reproduces_state() {
    let dir = tempfile::tempdir().unwrap();

    let mut sim = Simulation::new(drop_domain(1e-3), SolverKind::gauss_seidel(), dir.path());
    sim.set_output(0.1, Compression::Off);

    // Run to 0.3 seconds and remember the exact state there
    sim.run(0.3).unwrap();
    let snapshot: Vec<(BodyId, Vec<f64>, Vec<f64>)> = sim
        .domain
        .sorted_body_ids()
        .into_iter()
        .map(|id| {
            let body = &sim.domain.bodies[&id];
            (id, body.conf.clone(), body.velo.clone())
        })
        .collect();
    let snapshot_cons: Vec<_> = sim
        .domain
        .sorted_constraint_ids()
        .into_iter()
        .map(|id| {
            let con = &sim.domain.constraints[&id];
            (id, con.r, con.u)
        })
        .collect();

    // Keep going, close, then replay the middle frame
    sim.run(0.2).unwrap();
    drop(sim);

    let reader = FrameReader::open(dir.path().join("state.pbf")).unwrap();
    let mut replay = Domain::new(true, 1e-3);
    nsdyn::io::state::read_state(&mut replay, &reader, 0.3005).unwrap();

    assert_eq!(replay.nbod(), snapshot.len());
    for (id, conf, velo) in &snapshot {
        let body = &replay.bodies[id];
        // Lossless mode reproduces the state bit for bit
        assert_eq!(&body.conf, conf, "configuration of {id:?}");
        assert_eq!(&body.velo, velo, "velocity of {id:?}");
    }

    assert_eq!(replay.ncon(), snapshot_cons.len());
    for (id, r, u) in &snapshot_cons {
        let con = &replay.constraints[id];
        assert_eq!(con.r, *r);
        assert_eq!(con.u, *u);
    }
}

#[test]
fn init_state_overwrites_matching_bodies() {
    let dir = tempfile::tempdir().unwrap();

    let mut sim = Simulation::new(drop_domain(1e-3), SolverKind::gauss_seidel(), dir.path());
    sim.set_output(0.05, Compression::Off);
    sim.run(0.2).unwrap();

    let expected: Vec<(BodyId, Vec<f64>)> = sim
        .domain
        .sorted_body_ids()
        .into_iter()
        .map(|id| (id, sim.domain.bodies[&id].conf.clone()))
        .collect();
    drop(sim);

    // A fresh domain with the same bodies picks the stored state back up
    let mut sim = Simulation::open(drop_domain(1e-3), dir.path()).unwrap();
    sim.init_state(0.2005, None).unwrap();

    for (id, conf) in &expected {
        assert_eq!(&sim.domain.bodies[id].conf, conf);
    }
}

#[test]
fn init_state_by_label_patterns() {
    let dir = tempfile::tempdir().unwrap();

    let mut sim = Simulation::new(drop_domain(1e-3), SolverKind::gauss_seidel(), dir.path());
    sim.set_output(0.05, Compression::Off);
    sim.run(0.2).unwrap();

    let moved: Vec<(BodyId, Vec<f64>)> = sim
        .domain
        .sorted_body_ids()
        .into_iter()
        .map(|id| (id, sim.domain.bodies[&id].conf.clone()))
        .collect();
    drop(sim);

    let mut sim = Simulation::open(drop_domain(1e-3), dir.path()).unwrap();
    sim.init_state(0.2005, Some(&["ball0".to_string()])).unwrap();

    for (id, conf) in &moved {
        let body = &sim.domain.bodies[id];
        if body.label.as_deref() == Some("ball0") {
            assert_eq!(&body.conf, conf);
        } else if body.label.as_deref() == Some("ball1") {
            // Unmatched bodies keep their fresh state
            assert_ne!(&body.conf, conf);
        }
    }
}

#[test]
fn compressed_state_within_single_precision() {
    let dir = tempfile::tempdir().unwrap();

    let mut sim = Simulation::new(drop_domain(1e-3), SolverKind::gauss_seidel(), dir.path());
    sim.set_output(0.05, Compression::F32);
    sim.run(0.1).unwrap();

    let expected: Vec<(BodyId, Vec<f64>)> = sim
        .domain
        .sorted_body_ids()
        .into_iter()
        .map(|id| (id, sim.domain.bodies[&id].conf.clone()))
        .collect();
    drop(sim);

    let mut sim = Simulation::open(drop_domain(1e-3), dir.path()).unwrap();
    sim.init_state(1.0, None).unwrap();

    for (id, conf) in &expected {
        let body = &sim.domain.bodies[id];
        for (stored, exact) in body.conf.iter().zip(conf) {
            assert_relative_eq!(stored, exact, epsilon = 2.0 * f32::EPSILON as f64);
        }
    }
}

#[test]
fn rigid_state_remaps_onto_fem_basis() {
    let dir = tempfile::tempdir().unwrap();

    // A rigid block tips sideways under an initial spin
    let mut dom = Domain::new(true, 1e-3);
    let shape = Shape::single(Primitive::Convex(Convex::cuboid(
        Vec3::zero(),
        Vec3::one(),
        1,
    )));
    let id = dom
        .insert_body(
            Body::new(BodyKind::Rigid, shape, BulkMaterial::default()).with_label("block"),
        )
        .unwrap();
    dom.bodies
        .get_mut(&id)
        .unwrap()
        .initial_velocity(Vec3::new(0.2, 0.0, 0.0), Vec3::new(0.0, 0.0, 1.0));

    let mut sim = Simulation::new(dom, SolverKind::gauss_seidel(), dir.path());
    sim.set_output(0.05, Compression::Off);
    sim.run(0.2).unwrap();

    let rigid_conf = sim.domain.bodies[&id].conf.clone();
    drop(sim);

    // The same geometry as a finite element block receives the rigid motion
    let mut fem_dom = Domain::new(true, 1e-3);
    let mesh = Mesh::hex_block(Vec3::zero(), Vec3::one(), (1, 1, 1), 1);
    let fem_id = fem_dom
        .insert_body(
            Body::new(
                BodyKind::FiniteElement,
                Shape::single(Primitive::Mesh(mesh)),
                BulkMaterial::default(),
            )
            .with_label("block"),
        )
        .unwrap();
    assert_eq!(fem_id, id);

    let mut sim = Simulation::open(fem_dom, dir.path()).unwrap();
    sim.rigid_to_fem(1.0, None).unwrap();

    // Every node landed on its rigid image
    let rotation = vek::Mat3::new(
        rigid_conf[0],
        rigid_conf[1],
        rigid_conf[2],
        rigid_conf[3],
        rigid_conf[4],
        rigid_conf[5],
        rigid_conf[6],
        rigid_conf[7],
        rigid_conf[8],
    );
    let position = Vec3::new(rigid_conf[9], rigid_conf[10], rigid_conf[11]);
    let center = Vec3::broadcast(0.5);

    let body = &sim.domain.bodies[&fem_id];
    let mesh = body.shape.as_mesh().unwrap();
    for (i, node) in mesh.ref_nodes.iter().enumerate() {
        let expected = rotation * (*node - center) + position;
        let actual = *node
            + Vec3::new(
                body.conf[3 * i],
                body.conf[3 * i + 1],
                body.conf[3 * i + 2],
            );
        assert_relative_eq!((expected - actual).magnitude(), 0.0, epsilon = 1e-9);
    }
}
