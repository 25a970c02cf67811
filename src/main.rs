//! Driver harness: builds a drop scene from a TOML configuration and runs
//! it to completion.
//!
//! Exit code is zero on success and non-zero on any fatal geometry or I/O
//! error. A `STOP` file in the output directory terminates the run cleanly
//! at the next step boundary.

use miette::{IntoDiagnostic, WrapErr};
use serde::Deserialize;
use vek::Vec3;

use nsdyn::{
    body::{Body, BodyKind, BulkMaterial},
    geom::{Convex, Sphere},
    io::pbf::Compression,
    shape::{Primitive, Shape},
    surface::SurfaceMaterial,
    tms::TimeSeries,
    Domain, Simulation, SolverKind,
};

/// Runtime configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
struct Config {
    /// Time step.
    step: f64,
    /// Total simulated time.
    duration: f64,
    /// Seconds between output frames.
    output_interval: f64,
    /// Gravity vector.
    gravity: [f64; 3],
    /// Contact friction coefficient.
    friction: f64,
    /// Contact restitution.
    restitution: f64,
    /// Number of dropped spheres.
    spheres: usize,
    /// Sphere radius.
    radius: f64,
    /// Drop height of the first sphere.
    height: f64,
    /// Constraint solver: "gauss-seidel" or "penalty".
    solver: String,
    /// Output directory.
    outpath: String,
    /// Truncate stored doubles to single precision.
    compressed: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            step: 1e-3,
            duration: 1.0,
            output_interval: 1e-2,
            gravity: [0.0, 0.0, -9.81],
            friction: 0.3,
            restitution: 0.0,
            spheres: 2,
            radius: 0.5,
            height: 1.0,
            solver: "gauss-seidel".to_string(),
            outpath: "out".to_string(),
            compressed: false,
        }
    }
}

/// Build the drop scene: a fixed ground slab and a column of spheres.
fn build_domain(config: &Config) -> miette::Result<Domain> {
    let mut dom = Domain::new(true, config.step);
    dom.set_gravity(
        TimeSeries::constant(config.gravity[0]),
        TimeSeries::constant(config.gravity[1]),
        TimeSeries::constant(config.gravity[2]),
    );
    dom.sps.default = SurfaceMaterial {
        friction: config.friction,
        restitution: config.restitution,
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
    .into_diagnostic()
    .wrap_err("inserting the ground slab")?;

    let density = 1.0 / (4.0 / 3.0 * std::f64::consts::PI * config.radius.powi(3));
    for i in 0..config.spheres {
        let center = Vec3::new(
            0.0,
            0.0,
            config.height + 2.5 * config.radius * i as f64,
        );
        let shape = Shape::single(Primitive::Sphere(Sphere::new(center, config.radius, 2)));
        let material = BulkMaterial {
            density,
            ..BulkMaterial::default()
        };

        dom.insert_body(
            Body::new(BodyKind::Rigid, shape, material).with_label(format!("sphere{i}")),
        )
        .into_diagnostic()
        .wrap_err("inserting a sphere")?;
    }

    Ok(dom)
}

fn main() -> miette::Result<()> {
    env_logger::init();

    let config: Config = match std::env::args().nth(1) {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .into_diagnostic()
                .wrap_err_with(|| format!("reading configuration {path:?}"))?;

            toml::from_str(&text)
                .into_diagnostic()
                .wrap_err_with(|| format!("parsing configuration {path:?}"))?
        }
        None => Config::default(),
    };

    let solver = match config.solver.as_str() {
        "gauss-seidel" => SolverKind::gauss_seidel(),
        "penalty" => SolverKind::penalty(),
        other => miette::bail!("unknown solver {other:?}"),
    };

    let domain = build_domain(&config)?;
    let mut sim = Simulation::new(domain, solver, &config.outpath);
    sim.set_output(
        config.output_interval,
        if config.compressed {
            Compression::F32
        } else {
            Compression::Off
        },
    );

    sim.run(config.duration)
        .into_diagnostic()
        .wrap_err("running the simulation")?;

    log::info!(
        "finished at t = {} with {} constraints and merit {:.3e}",
        sim.domain.time,
        sim.domain.ncon(),
        sim.domain.merit
    );

    Ok(())
}
