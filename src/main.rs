// ============================================================================
// relief-coupler demo driver
//
// Runs the coupling loop against the in-process reference host:
//
//   one thread per rank  →  synthetic host owning a block of top faces
//                        →  SurfaceCoupler over a ThreadComm world
//
// An optional argument names a JSON configuration document; without one a
// 100 km box with a seeded Gaussian uplift dome is used. Log level follows RUST_LOG
// (default "info").
// ============================================================================

use std::error::Error;
use std::{env, fs, process, thread};
use std::sync::Arc;

use log::{debug, error, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use relief_coupler::comm::{Communicator, ThreadComm};
use relief_coupler::config::Configuration;
use relief_coupler::coupler::SurfaceCoupler;
use relief_coupler::error::CouplingResult;
use relief_coupler::geometry::{norm, scale, GeometryDescriptor, Point3};
use relief_coupler::host::synthetic::{ConstraintRecorder, SyntheticHost, VelocityFn, TOP_BOUNDARY};
use relief_coupler::host::TimeUnit;

const RANKS: usize = 4;
const TIMESTEPS: u64 = 5;
/// Host timestep [yr]
const HOST_DT: f64 = 20_000.0;
/// Host surface faces per box side (per cube-face side on a shell)
const HOST_RESOLUTION: usize = 16;
/// Peak uplift rate of the dome [m/yr]
const PEAK_UPLIFT: f64 = 2e-3;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match env::args().nth(1) {
        Some(path) => load(&path),
        None => default_configuration(),
    };
    let config = match config {
        Ok(c) => c,
        Err(e) => {
            error!("configuration rejected: {e}");
            process::exit(1);
        }
    };

    info!("starting {RANKS} ranks for {TIMESTEPS} host timesteps of {HOST_DT} yr");

    let outcomes: Vec<CouplingResult<()>> = thread::scope(|s| {
        let handles: Vec<_> = ThreadComm::world(RANKS)
            .into_iter()
            .map(|comm| {
                let config = config.clone();
                s.spawn(move || run_rank(config, comm))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| match h.join() {
                Ok(outcome) => outcome,
                Err(_) => {
                    error!("a rank panicked");
                    process::exit(2);
                }
            })
            .collect()
    });

    let mut failed = false;
    for (rank, outcome) in outcomes.into_iter().enumerate() {
        if let Err(e) = outcome {
            error!("rank {rank}: {e}");
            failed = true;
        }
    }
    if failed {
        process::exit(1);
    }
    info!("coupling run complete");
}

fn load(path: &str) -> Result<Configuration, Box<dyn Error>> {
    let text = fs::read_to_string(path)?;
    Ok(Configuration::from_json(&text)?)
}

fn default_configuration() -> Result<Configuration, Box<dyn Error>> {
    let mut cfg = Configuration::new(GeometryDescriptor::Planar {
        origin:      [0.0, 0.0, -100_000.0],
        extents:     [100_000.0, 100_000.0, 100_000.0],
        repetitions: [16, 16],
    })?;
    cfg.coupling.steps_per_solver_step = 4;
    cfg.coupling.maximum_substep = 2_000.0;
    cfg.erosion.hillslope_diffusion = true;
    Ok(cfg)
}

fn run_rank(config: Configuration, comm: ThreadComm) -> CouplingResult<()> {
    let (rank, size) = (comm.rank(), comm.size());
    let dome = uplift_dome(&config.geometry, config.coupling.seed);
    let mut host = SyntheticHost::new(&config.geometry, HOST_RESOLUTION, dome).partitioned(rank, size);
    let mut sink = ConstraintRecorder::new(host.support_points());
    debug!("rank {rank}: {} owned top faces", host.faces().len());

    let mut coupler = SurfaceCoupler::new(config, TimeUnit::Years, comm)?;

    for _ in 0..=TIMESTEPS {
        coupler.compute_velocity_constraints(&host, &mut sink, &[TOP_BOUNDARY])?;
        debug!("rank {rank}: {} constrained support points", sink.records.len());
        sink.records.clear();

        if let Some(surface) = coupler.surface() {
            let n = surface.len() as f64;
            let mean = surface.elevation.sum() / n;
            let max = surface.elevation.fold(f64::NEG_INFINITY, |a, &h| a.max(h));
            info!("  surface after step: h_mean={mean:.2} m | h_max={max:.2} m");
        }
        host.advance(HOST_DT);
    }
    Ok(())
}

/// Normal velocity field with a Gaussian bump near the middle of a box, or
/// over the north pole of a shell. The box centre is drawn from `seed`, so
/// every rank builds the same field.
fn uplift_dome(geometry: &GeometryDescriptor, seed: u64) -> VelocityFn {
    let mut rng = StdRng::seed_from_u64(seed);
    match *geometry {
        GeometryDescriptor::Planar { origin, extents, .. } => {
            let cx = origin[0] + rng.gen_range(0.3..0.7) * extents[0];
            let cy = origin[1] + rng.gen_range(0.3..0.7) * extents[1];
            let w = 0.25 * extents[0].min(extents[1]);
            Arc::new(move |p: &Point3| {
                let r2 = (p[0] - cx).powi(2) + (p[1] - cy).powi(2);
                [0.0, 0.0, PEAK_UPLIFT * (-r2 / (w * w)).exp()]
            })
        }
        GeometryDescriptor::SphericalShell { .. } => Arc::new(|p: &Point3| {
            let r = norm(p);
            if r == 0.0 {
                return [0.0; 3];
            }
            let u = PEAK_UPLIFT * (p[2] / r).max(0.0).powi(4);
            scale(p, u / r)
        }),
    }
}
