use anyhow::{Context, Result};
use cartsim_core::{CartSimConfig, GrowthWorld, TreatCourse};
use cartsim_lattice::Coord;
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

/// CAR T-cell growth simulation runner.
#[derive(Debug, Parser)]
#[command(name = "cartsim", version, about)]
struct Args {
    /// Path to a JSON configuration file; defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of ticks (simulated minutes) to run.
    #[arg(long, default_value_t = 10_080)]
    ticks: u64,

    /// Override the configured RNG seed.
    #[arg(long)]
    seed: Option<u64>,

    /// Treatment dose of CAR T-cells, seeded after the delay.
    #[arg(long, default_value_t = 100)]
    dose: usize,

    /// Delay before treatment insertion, in ticks.
    #[arg(long, default_value_t = 1_440)]
    treat_delay: u64,

    /// Fraction of the dose drawn from the CD8 population.
    #[arg(long, default_value_t = 0.5)]
    cd8_fraction: f64,

    /// Interval between reported summaries, in ticks.
    #[arg(long, default_value_t = 1_440)]
    report_interval: u64,

    /// Write collected lysis records to this path as JSON.
    #[arg(long)]
    lysis_out: Option<PathBuf>,
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let mut world = bootstrap_world(&args)?;

    info!(ticks = args.ticks, "starting growth simulation");
    let mut kills = 0usize;
    let mut births = 0usize;
    let mut deaths = 0usize;
    for tick in 1..=args.ticks {
        let events = world.run_tick()?;
        kills += events.kills;
        births += events.births;
        deaths += events.deaths;
        if events.seeded > 0 {
            info!(tick, seeded = events.seeded, "treatment inserted");
        }
        if args.report_interval > 0 && tick % args.report_interval == 0 {
            info!(
                tick,
                agents = world.agent_count(),
                births,
                deaths,
                kills,
                "interval summary"
            );
        }
    }

    info!(
        agents = world.agent_count(),
        lysed = world.lysis_records().len(),
        "simulation complete"
    );

    if let Some(path) = &args.lysis_out {
        let json = serde_json::to_string_pretty(world.lysis_records())?;
        fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), "lysis records written");
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn bootstrap_world(args: &Args) -> Result<GrowthWorld> {
    let mut config = match &args.config {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str::<CartSimConfig>(&raw)
                .with_context(|| format!("parsing {}", path.display()))?
        }
        None => CartSimConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.rng_seed = Some(seed);
    }
    if config.rng_seed.is_none() {
        warn!("no RNG seed configured; this run will not be reproducible");
    }

    let (tissue_pop, cd8_pop, cd4_pop) = population_indices(&config)
        .context("configuration must include tissue, CD8, and CD4 populations")?;

    let mut world = GrowthWorld::new(config)?;
    seed_environment(&mut world, tissue_pop)?;

    if args.dose > 0 {
        let cd8_fraction = args.cd8_fraction.clamp(0.0, 1.0);
        world.schedule_treatment(
            args.treat_delay,
            TreatCourse {
                dose: args.dose,
                fractions: vec![(cd8_pop, cd8_fraction), (cd4_pop, 1.0 - cd8_fraction)],
            },
        )?;
        info!(
            dose = args.dose,
            delay = args.treat_delay,
            cd8_fraction,
            "treatment scheduled"
        );
    }
    Ok(world)
}

fn population_indices(config: &CartSimConfig) -> Option<(usize, usize, usize)> {
    use cartsim_core::{PopulationConfig, Subtype};
    let mut tissue = None;
    let mut cd8 = None;
    let mut cd4 = None;
    for (index, population) in config.populations.iter().enumerate() {
        match population {
            PopulationConfig::Tissue(_) if tissue.is_none() => tissue = Some(index),
            PopulationConfig::CarT(p) if p.subtype == Subtype::Cd8 && cd8.is_none() => {
                cd8 = Some(index);
            }
            PopulationConfig::CarT(p) if p.subtype == Subtype::Cd4 && cd4.is_none() => {
                cd4 = Some(index);
            }
            _ => {}
        }
    }
    Some((tissue?, cd8?, cd4?))
}

/// Seed a tumor plug in the lattice center and mark a vasculature border
/// for treatment insertion.
fn seed_environment(world: &mut GrowthWorld, tissue_pop: usize) -> Result<()> {
    let geometry = world.lattice().config().clone();
    let (cx, cy) = (geometry.width as i32 / 2, geometry.height as i32 / 2);
    for dx in -2..=2 {
        for dy in -2..=2 {
            world.seed_tissue(tissue_pop, Coord::new(cx + dx, cy + dy, 0))?;
        }
    }
    for x in 0..geometry.width as i32 {
        world.lattice_mut().set_site(Coord::new(x, 0, 0), 0.0)?;
        world
            .lattice_mut()
            .set_site(Coord::new(x, geometry.height as i32 - 1, 0), 0.0)?;
    }
    info!(tumor_cells = world.agent_count(), "environment seeded");
    Ok(())
}
