//! Simulation session: the run loop, output triggering and state replay.

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use hashbrown::HashSet;
use log::info;

use crate::{
    body::BodyId,
    domain::Domain,
    error::{Error, Result},
    io::{
        pbf::{Compression, FrameReader, FrameStore, FrameWriter},
        state,
    },
    solver::SolverKind,
    timer::{labels, Timers},
    tms::SeriesRegistry,
};

/// Environment variable nesting the output directory.
pub const OUTPUT_SUBDIR_VAR: &str = "NSDYN_OUTPUT_SUBDIR";

/// Cooperative cancellation token checked at phase boundaries.
pub type CancelToken = Arc<AtomicBool>;

/// Per-step user callback; returning `false` interrupts the run.
pub type Callback = Box<dyn FnMut(&mut Domain) -> bool>;

/// Session mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Stepping and appending frames.
    Write,
    /// Replaying frames from an existing store.
    Read,
}

/// A simulation session owning the domain, the solver, the output store,
/// the named series registry and the phase timers.
pub struct Simulation {
    /// The domain.
    pub domain: Domain,
    /// Session mode.
    pub mode: Mode,
    /// Constraint solver.
    pub solver: SolverKind,
    /// Output directory.
    pub outpath: PathBuf,
    /// Phase timers.
    pub timers: Timers,
    /// Named time series owned by this session.
    pub series: SeriesRegistry,
    /// Double precision handling of output frames.
    pub compression: Compression,
    /// Output store.
    store: Option<FrameStore>,
    /// Replay reader.
    reader: Option<FrameReader>,
    /// Output interval.
    output_interval: f64,
    /// Next output instant.
    output_time: f64,
    /// Bodies already written as complete records.
    written_bodies: HashSet<BodyId>,
    /// Cancellation token.
    cancel: CancelToken,
    /// Per-step callback.
    callback: Option<(f64, f64, Callback)>,
    /// Whether the initial frame exists.
    started: bool,
}

impl Simulation {
    /// Create a write-mode session; the output directory is nested under
    /// the value of [`OUTPUT_SUBDIR_VAR`] when set.
    pub fn new(domain: Domain, solver: SolverKind, outpath: impl AsRef<Path>) -> Self {
        let mut outpath = outpath.as_ref().to_path_buf();
        if let Ok(subdir) = std::env::var(OUTPUT_SUBDIR_VAR) {
            if !subdir.is_empty() {
                outpath = outpath.join(subdir);
            }
        }

        Self {
            domain,
            mode: Mode::Write,
            solver,
            outpath,
            timers: Timers::new(),
            series: SeriesRegistry::new(),
            compression: Compression::Off,
            store: None,
            reader: None,
            output_interval: 0.0,
            output_time: 0.0,
            written_bodies: HashSet::new(),
            cancel: Arc::new(AtomicBool::new(false)),
            callback: None,
            started: false,
        }
    }

    /// Open a read-mode session over an existing output directory.
    pub fn open(domain: Domain, outpath: impl AsRef<Path>) -> Result<Self> {
        let outpath = outpath.as_ref().to_path_buf();
        let reader = FrameReader::open(store_path(&outpath))?;

        let mut sim = Self::new(domain, SolverKind::gauss_seidel(), &outpath);
        sim.mode = Mode::Read;
        sim.reader = Some(reader);

        Ok(sim)
    }

    /// Set the output interval and compression.
    pub fn set_output(&mut self, interval: f64, compression: Compression) {
        self.output_interval = interval;
        self.output_time = self.domain.time + interval;
        self.compression = compression;
    }

    /// Install a user callback fired at an interval; a false return
    /// interrupts the run.
    pub fn set_callback(&mut self, interval: f64, callback: Callback) {
        self.callback = Some((interval, self.domain.time + interval, callback));
    }

    /// Token cancelling the run at the next phase boundary.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Advance the simulation over a duration, writing frames whenever the
    /// output instant is crossed.
    pub fn run(&mut self, duration: f64) -> Result<()> {
        debug_assert_eq!(self.mode, Mode::Write);

        std::fs::create_dir_all(&self.outpath)?;
        if self.store.is_none() {
            self.store = Some(FrameStore::create(store_path(&self.outpath))?);
        }

        if !self.started {
            self.domain.initialize()?;
            info!(
                "domain initialised: {} bodies, {} dofs",
                self.domain.nbod(),
                self.domain.dofs()
            );
            self.write_frame()?;
            self.started = true;
        }

        let t_end = self.domain.time + duration;

        while self.domain.time < t_end {
            // Cooperative interruption points sit between steps only
            if self.cancel.load(Ordering::Relaxed) || self.stop_file() {
                info!("run interrupted at t = {}", self.domain.time);
                break;
            }

            let system = self.domain.update_begin(&mut self.timers)?;

            self.timers.start(labels::CONSOL);
            let merit = self.solver.solve(
                &system,
                &mut self.domain.constraints,
                self.domain.dynamic,
                self.domain.step,
            );
            self.domain.merit = merit;
            self.timers.stop(labels::CONSOL);

            self.domain.update_end(&system, &mut self.timers)?;

            if self.output_interval > 0.0 && self.domain.time >= self.output_time {
                self.output_time += self.output_interval;
                self.write_frame()?;
            }

            if let Some((interval, ref mut due, ref mut callback)) = self.callback {
                if self.domain.time >= *due {
                    *due += interval;
                    if !callback(&mut self.domain) {
                        info!("callback interrupted the run at t = {}", self.domain.time);
                        break;
                    }
                }
            }
        }

        // The last committed frame is flushed even on interruption
        self.write_frame()?;

        Ok(())
    }

    /// Append a frame with the current domain, solver and timer state.
    fn write_frame(&mut self) -> Result<()> {
        let store = self
            .store
            .as_mut()
            .ok_or_else(|| Error::FileFormat("no output store".to_string()))?;

        // Bodies not yet written go out as complete records
        let new_bodies: Vec<BodyId> = self
            .domain
            .sorted_body_ids()
            .into_iter()
            .filter(|id| !self.written_bodies.contains(id))
            .collect();

        let mut frame = FrameWriter::new(self.domain.time, self.compression);
        state::write_state(&self.domain, &new_bodies, &mut self.timers, &mut frame);
        self.solver.write_state(&mut frame);
        store.append(frame)?;

        self.written_bodies.extend(new_bodies);

        Ok(())
    }

    /// Replay the frame nearest a time into the domain.
    pub fn seek(&mut self, time: f64) -> Result<()> {
        debug_assert_eq!(self.mode, Mode::Read);

        let reader = self
            .reader
            .as_ref()
            .ok_or_else(|| Error::NoSuchFrame("DOM".to_string()))?;

        state::read_state(&mut self.domain, reader, time)?;
        state::read_timers(reader, time, &mut self.timers)
    }

    /// Initialise body states from a stored frame, optionally narrowed by
    /// label patterns.
    pub fn init_state(&mut self, time: f64, patterns: Option<&[String]>) -> Result<()> {
        if self.reader.is_none() {
            self.reader = Some(FrameReader::open(store_path(&self.outpath))?);
        }
        let reader = self.reader.as_ref().expect("reader just opened");

        state::init_state(&mut self.domain, reader, time, patterns)
    }

    /// Remap stored rigid states onto finite element bodies.
    pub fn rigid_to_fem(&mut self, time: f64, patterns: Option<&[String]>) -> Result<()> {
        if self.reader.is_none() {
            self.reader = Some(FrameReader::open(store_path(&self.outpath))?);
        }
        let reader = self.reader.as_ref().expect("reader just opened");

        state::rigid_to_fem(&mut self.domain, reader, time, patterns)
    }

    /// First and last stored frame times.
    pub fn time_limits(&self) -> Option<(f64, f64)> {
        self.reader.as_ref().and_then(|r| r.time_limits())
    }

    /// Whether the user dropped a STOP file into the output directory.
    fn stop_file(&self) -> bool {
        self.outpath.join("STOP").exists()
    }
}

/// Store file within the output directory.
fn store_path(outpath: &Path) -> PathBuf {
    outpath.join("state.pbf")
}

#[cfg(test)]
mod tests {
    use vek::Vec3;

    use crate::body::{Body, BodyKind, BulkMaterial};
    use crate::domain::Domain;
    use crate::geom::Sphere;
    use crate::shape::{Primitive, Shape};
    use crate::solver::SolverKind;
    use crate::tms::TimeSeries;

    use super::Simulation;

    #[test]
    fn test_run_writes_frames() {
        let dir = tempfile::tempdir().unwrap();

        let mut dom = Domain::new(true, 1e-3);
        dom.set_gravity(
            TimeSeries::constant(0.0),
            TimeSeries::constant(0.0),
            TimeSeries::constant(-9.81),
        );
        let shape = Shape::single(Primitive::Sphere(Sphere::new(Vec3::zero(), 0.5, 1)));
        dom.insert_body(Body::new(BodyKind::Rigid, shape, BulkMaterial::default()))
            .unwrap();

        let mut sim = Simulation::new(dom, SolverKind::gauss_seidel(), dir.path());
        sim.set_output(5e-3, crate::io::pbf::Compression::Off);
        sim.run(2e-2).unwrap();

        let reader = crate::io::pbf::FrameReader::open(dir.path().join("state.pbf")).unwrap();
        assert!(reader.len() >= 4);
        let (start, end) = reader.time_limits().unwrap();
        assert_eq!(start, 0.0);
        assert!(end >= 2e-2 - 1e-9);
    }

    #[test]
    fn test_stop_file_interrupts() {
        let dir = tempfile::tempdir().unwrap();

        let mut dom = Domain::new(true, 1e-3);
        let shape = Shape::single(Primitive::Sphere(Sphere::new(Vec3::zero(), 0.5, 1)));
        dom.insert_body(Body::new(BodyKind::Rigid, shape, BulkMaterial::default()))
            .unwrap();

        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(dir.path().join("STOP"), b"").unwrap();

        let mut sim = Simulation::new(dom, SolverKind::gauss_seidel(), dir.path());
        sim.run(1.0).unwrap();

        // Interrupted right away, still leaving flushed frames behind
        assert!(sim.domain.time < 0.5);
    }
}
