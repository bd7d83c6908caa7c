//! Shearing-sheet ring patch split over two ranks.
//!
//! Every rank draws the same particle set, keeps the particles in its own
//! root boxes, builds and aggregates its tree, then trades essential trees
//! with its peer over in-process channels.
//!
//! An optional argument names a YAML tree configuration to use instead of
//! the built-in one.

use std::{f64::consts::PI, fs::File};

use bhforest::{
    boundary::Boundary,
    distributed::{ChannelTransport, Decomposition},
    Particle, Result, Simulation, TreeConfig, TreeError,
};
use rand::{rngs::StdRng, Rng, SeedableRng};

const OMEGA: f64 = 1.0;
const PARTICLE_RADIUS: f64 = 1.0;
const BOXSIZE: f64 = 50.0;
const TAU: f64 = 0.5;
const N_RANKS: usize = 2;

fn particles() -> Vec<Particle> {
    let r_h = 0.5 * 2.0 * PARTICLE_RADIUS;
    let particle_mass = r_h * r_h * r_h * 3.0 / 2.0;
    let n = (TAU * BOXSIZE * BOXSIZE / (PI * PARTICLE_RADIUS * PARTICLE_RADIUS)).round() as usize;

    let mut rng = StdRng::seed_from_u64(7);
    (0..n)
        .map(|_| {
            let x = (rng.random::<f64>() - 0.5) * BOXSIZE;
            let y = (rng.random::<f64>() - 0.5) * BOXSIZE;
            let z = 2.0 * PARTICLE_RADIUS * (rng.random::<f64>() - 0.5);
            Particle {
                x,
                y,
                z,
                vy: -1.5 * x * OMEGA,
                m: particle_mass,
                r: PARTICLE_RADIUS,
                ..Default::default()
            }
        })
        .collect()
}

fn run_rank(config: TreeConfig, rank: usize, mut transport: ChannelTransport) -> Result<()> {
    let decomposition = Decomposition::new(rank, N_RANKS)?;
    let mut sim: Simulation = Simulation::for_rank(config.clone(), decomposition)?;

    for p in particles() {
        let Some(root_box) = config.root_box_for(p.position()) else {
            continue;
        };
        if decomposition.owner_of(root_box, config.n_root())? == rank {
            sim.add(p)?;
        }
    }

    sim.tree_update()?;
    sim.tree_update_gravity_data()?;
    sim.tree_prepare_essential_tree_for_gravity(&mut transport)?;
    sim.tree_prepare_essential_tree_for_collisions(&mut transport)?;

    let stats = sim.tree().stats();
    let local_mass = sim.gravity_view()?.total_mass();
    let essential = sim.essential_tree();
    let remote_mass = essential.gravity_view()?.total_mass();
    let received = essential.particles()?.len();

    let mut candidates = 0;
    for p in &sim.particles {
        candidates += essential
            .particles_within(p.position(), 2.0 * PARTICLE_RADIUS)?
            .len();
    }

    println!(
        "rank {rank}: {} particles, {} cells, depth {}, local mass {local_mass:.2}, \
         remote mass {remote_mass:.2}, {received} boundary particles, \
         {candidates} cross-rank collision candidates",
        stats.population, stats.cells, stats.max_depth
    );
    Ok(())
}

fn load_config() -> Result<TreeConfig> {
    let Some(path) = std::env::args().nth(1) else {
        let config = TreeConfig::configure_box(BOXSIZE / 2.0, 2, 2, 1)
            .with_ghosts(3, 3, 0)
            .with_boundary(Boundary::Shear { omega: OMEGA });
        config.validate()?;
        return Ok(config);
    };
    let file = File::open(&path).map_err(|e| TreeError::InvalidConfig(format!("{path}: {e}")))?;
    TreeConfig::from_yaml_reader(file)
}

fn main() -> Result<()> {
    let config = load_config()?;

    std::thread::scope(|s| {
        let handles: Vec<_> = ChannelTransport::network(N_RANKS)
            .into_iter()
            .enumerate()
            .map(|(rank, transport)| {
                let config = config.clone();
                s.spawn(move || run_rank(config, rank, transport))
            })
            .collect();

        for handle in handles {
            match handle.join() {
                Ok(result) => result?,
                Err(_) => eprintln!("ERROR: rank thread panicked"),
            }
        }
        Ok(())
    })
}
