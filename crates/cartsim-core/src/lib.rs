//! Core types for the CARTSIM workspace: CAR T-cell agents, their
//! intracellular modules, the stochastic binding engine, and the deferred
//! action ("helper") subsystem, wired together by a tick-driven world.
//!
//! Everything is single-threaded and deterministic: one `SmallRng` seeded
//! from configuration is threaded through every draw, shuffle, and jitter,
//! so two worlds built from the same configuration replay identically.

pub mod binding;
pub mod helper;
pub mod metabolism;
pub mod params;
pub mod signaling;

use cartsim_lattice::{Coord, Lattice, LatticeConfig, LatticeError, Substrate};
use cartsim_schedule::{EntryId, Ordering, Schedule, ScheduleError};
use rand::{Rng, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use slotmap::{SlotMap, new_key_type};
use thiserror::Error;
use tracing::debug;

pub use binding::{BindOutcome, bind};
pub use helper::{Helper, HelperKind, TreatCourse};
pub use metabolism::{
    Metabolism, MetabolismEnv, MetabolismOutput, MetabolismRates, MetabolismStatus,
    MetabolismTraits,
};
pub use params::{AgeRange, ParamSet, Parameter};
pub use signaling::{Signaling, SignalingEnv, SignalingKind, SignalingOutput, SignalingRates};

new_key_type! {
    /// Stable generational handle for agents.
    pub struct AgentId;
}

new_key_type! {
    /// Stable generational handle for helpers.
    pub struct HelperId;
}

/// Simulation clock in minutes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tick(pub u64);

impl Tick {
    /// Returns the next sequential tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Resets the tick counter back to zero.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// Ticks per activity window: one simulated day.
const ACTIVITY_WINDOW: u32 = 1440;
/// Windows without binding before the activated flag clears.
const ACTIVITY_WINDOWS_MAX: u32 = 7;

/// Cell state. Neutral is the "undecided" transition state and has no
/// biological analog.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CellState {
    Neutral,
    Apoptotic,
    Migratory,
    Proliferative,
    Senescent,
    Cytotoxic,
    Stimulatory,
    Exhausted,
    Anergic,
    Starved,
    Paused,
    Quiescent,
    Necrotic,
}

impl CellState {
    /// Stable numeric code for snapshot records.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            CellState::Neutral => 0,
            CellState::Apoptotic => 1,
            CellState::Migratory => 2,
            CellState::Proliferative => 3,
            CellState::Senescent => 4,
            CellState::Cytotoxic => 5,
            CellState::Stimulatory => 6,
            CellState::Exhausted => 7,
            CellState::Anergic => 8,
            CellState::Starved => 9,
            CellState::Paused => 10,
            CellState::Quiescent => 11,
            CellState::Necrotic => 12,
        }
    }

    /// States that block the starvation transition.
    const fn blocks_starvation(self) -> bool {
        matches!(
            self,
            CellState::Apoptotic
                | CellState::Senescent
                | CellState::Exhausted
                | CellState::Anergic
                | CellState::Starved
        )
    }
}

/// Effector variant, fixed at construction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Subtype {
    /// Helper/stimulatory-oriented.
    Cd4,
    /// Lytic/cytotoxic-oriented.
    Cd8,
}

impl Subtype {
    /// Stable numeric code for snapshot records.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Subtype::Cd4 => 4,
            Subtype::Cd8 => 8,
        }
    }
}

/// Independent behavior flags.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CellFlags {
    pub migrating: bool,
    pub proliferating: bool,
    pub activated: bool,
    pub bound_antigen: bool,
    pub bound_self: bool,
    pub doubled: bool,
}

/// One CAR T-cell agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartCell {
    pub subtype: Subtype,
    pub pop: usize,
    pub state: CellState,
    pub flags: CellFlags,
    pub coord: Coord,
    /// Age in minutes.
    pub age: u32,
    /// Energy in fmol ATP; negative values mean the cell is running a deficit.
    pub energy: f64,
    /// Divisions remaining before senescence.
    pub divisions: u32,
    /// Per-cell death age in minutes.
    pub death_age: f64,

    // Values drawn once from the population distributions.
    pub senes_frac: f64,
    pub exhau_frac: f64,
    pub anerg_frac: f64,
    pub proli_frac: f64,
    pub energy_threshold: f64,
    pub accuracy: f64,
    pub search_ability: u32,
    pub max_antigen_binding: u32,
    pub cars: u32,
    pub self_receptors: u32,
    pub self_receptors_start: u32,

    // Receptor biophysics, identical across a lineage.
    pub car_affinity: f64,
    pub car_alpha: f64,
    pub car_beta: f64,
    pub self_affinity: f64,
    pub self_alpha: f64,
    pub self_beta: f64,
    pub contact_frac: f64,

    pub bound_antigen_count: u32,
    pub bound_self_count: u32,
    /// Minutes since the cell last bound antigen.
    pub last_active_ticker: u32,
    /// Completed cell cycle lengths in minutes.
    pub cycles: Vec<f64>,

    /// Recentered distributions handed to daughters.
    pub heritable: ParamSet,

    /// The in-progress transition, if any. Invariant: `Some` iff the cell is
    /// mid-transition, and no other helper references this cell.
    #[serde(skip)]
    pub helper: Option<HelperId>,
    /// Schedule handle for this cell's repeating step.
    #[serde(skip)]
    pub stepper: Option<EntryId>,
    /// Set once the cell has been removed from stepping; idempotent.
    pub stopped: bool,

    pub signaling: Signaling,
    pub metabolism: Metabolism,
}

impl CartCell {
    /// Construct a cell by drawing once from `params`, recentring the drawn
    /// values into the heritable set for daughters.
    ///
    /// `glucose_ext` seeds the internal nutrient pools in equilibrium with
    /// the location the cell is born into.
    pub fn new(
        population: &TCellPopulation,
        pop: usize,
        coord: Coord,
        volume: f64,
        age: u32,
        params: &ParamSet,
        glucose_ext: f64,
        rng: &mut SmallRng,
    ) -> Self {
        let senes_frac = params.senes_frac.draw(rng);
        let exhau_frac = params.exhau_frac.draw(rng);
        let anerg_frac = params.anerg_frac.draw(rng);
        let proli_frac = params.proli_frac.draw(rng);
        let energy_threshold = params.energy_threshold.draw(rng);
        let accuracy = params.accuracy.draw(rng);
        let death_age = params.death_age.draw(rng);
        let divisions = params.divisions.draw_int(rng);
        let search_ability = params.search_ability.mu.round() as u32;
        let max_antigen_binding = params.max_antigen_binding.draw_int(rng);
        let cars = params.cars.draw_int(rng);
        let self_receptors = params.self_receptors.draw_int(rng);

        let mut heritable = params.clone();
        heritable.senes_frac = params.senes_frac.update(senes_frac);
        heritable.exhau_frac = params.exhau_frac.update(exhau_frac);
        heritable.anerg_frac = params.anerg_frac.update(anerg_frac);
        heritable.proli_frac = params.proli_frac.update(proli_frac);
        heritable.energy_threshold = params.energy_threshold.update(energy_threshold);
        heritable.accuracy = params.accuracy.update(accuracy);
        heritable.death_age = params.death_age.update(death_age);
        heritable.divisions = params.divisions.update(f64::from(divisions));
        heritable.max_antigen_binding = params
            .max_antigen_binding
            .update(f64::from(max_antigen_binding));
        heritable.cars = params.cars.update(f64::from(cars));
        heritable.self_receptors = params.self_receptors.update(f64::from(self_receptors));

        let signaling = Signaling::new(population.signaling, population.signaling_kind());

        let traits = MetabolismTraits {
            meta_pref: params.meta_pref.draw(rng),
            meta_pref_il2: params.meta_pref_il2.draw(rng),
            meta_pref_active: params.meta_pref_active.draw(rng),
            gluc_uptake_rate: params.gluc_uptake_rate.draw(rng),
            gluc_uptake_rate_il2: params.gluc_uptake_rate_il2.draw(rng),
            gluc_uptake_rate_active: params.gluc_uptake_rate_active.draw(rng),
        };
        heritable.meta_pref = params.meta_pref.update(traits.meta_pref);
        heritable.meta_pref_il2 = params.meta_pref_il2.update(traits.meta_pref_il2);
        heritable.meta_pref_active = params.meta_pref_active.update(traits.meta_pref_active);
        heritable.gluc_uptake_rate = params.gluc_uptake_rate.update(traits.gluc_uptake_rate);
        heritable.gluc_uptake_rate_il2 = params
            .gluc_uptake_rate_il2
            .update(traits.gluc_uptake_rate_il2);
        heritable.gluc_uptake_rate_active = params
            .gluc_uptake_rate_active
            .update(traits.gluc_uptake_rate_active);

        let metabolism = Metabolism::new(volume, glucose_ext, traits, population.metabolism);

        Self {
            subtype: population.subtype,
            pop,
            state: CellState::Neutral,
            flags: CellFlags::default(),
            coord,
            age,
            energy: 0.0,
            divisions,
            death_age,
            senes_frac,
            exhau_frac,
            anerg_frac,
            proli_frac,
            energy_threshold,
            accuracy,
            search_ability,
            max_antigen_binding,
            cars,
            self_receptors,
            self_receptors_start: self_receptors,
            car_affinity: params.car_affinity.mu,
            car_alpha: params.car_alpha.mu,
            car_beta: params.car_beta.mu,
            self_affinity: params.self_affinity.mu,
            self_alpha: params.self_alpha.mu,
            self_beta: params.self_beta.mu,
            contact_frac: params.contact_frac.mu,
            bound_antigen_count: 0,
            bound_self_count: 0,
            last_active_ticker: 0,
            cycles: Vec::new(),
            heritable,
            helper: None,
            stepper: None,
            stopped: false,
            signaling,
            metabolism,
        }
    }

    /// Current cell volume.
    #[must_use]
    pub fn volume(&self) -> f64 {
        self.metabolism.volume()
    }

    /// Critical volume the cell works to maintain.
    #[must_use]
    pub fn crit_volume(&self) -> f64 {
        self.metabolism.crit_volume()
    }

    /// Snapshot record for profilers and death logs.
    #[must_use]
    pub fn snapshot(&self) -> CellSnapshot {
        CellSnapshot {
            code: self.subtype.code(),
            pop: self.pop,
            state: self.state.code(),
            coord: self.coord,
            volume: self.volume(),
            age: self.age,
            cycles: self.cycles.clone(),
        }
    }
}

/// Target/tissue cell, seen by this crate through a narrow surface: the
/// binding engine reads its ligand counts, kill interactions damage it,
/// and stimulation quiesces it. Its own state machine lives elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TissueCell {
    pub pop: usize,
    pub state: CellState,
    pub coord: Coord,
    pub volume: f64,
    /// Target antigens presented to the engineered receptor.
    pub car_antigens: f64,
    /// Inhibitory ligands presented to the self receptor.
    pub self_ligands: f64,
    pub cancerous: bool,
    pub max_height: f64,
    pub stopped: bool,
}

impl TissueCell {
    /// Whether the cell still presents a viable surface.
    #[must_use]
    pub fn is_viable(&self) -> bool {
        !self.stopped
            && !matches!(self.state, CellState::Apoptotic | CellState::Necrotic)
    }

    /// Growth-arrest the cell (stimulatory contact).
    pub fn quiesce(&mut self) {
        self.state = CellState::Quiescent;
    }

    /// Snapshot record for death logs.
    #[must_use]
    pub fn snapshot(&self) -> CellSnapshot {
        CellSnapshot {
            code: 0,
            pop: self.pop,
            state: self.state.code(),
            coord: self.coord,
            volume: self.volume,
            age: 0,
            cycles: Vec::new(),
        }
    }
}

/// Any agent living on the lattice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Agent {
    TCell(CartCell),
    Tissue(TissueCell),
}

impl Agent {
    /// Current location.
    #[must_use]
    pub fn coord(&self) -> Coord {
        match self {
            Agent::TCell(cell) => cell.coord,
            Agent::Tissue(cell) => cell.coord,
        }
    }

    /// Current volume.
    #[must_use]
    pub fn volume(&self) -> f64 {
        match self {
            Agent::TCell(cell) => cell.volume(),
            Agent::Tissue(cell) => cell.volume,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> CellState {
        match self {
            Agent::TCell(cell) => cell.state,
            Agent::Tissue(cell) => cell.state,
        }
    }

    /// Whether the agent has been removed from stepping.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        match self {
            Agent::TCell(cell) => cell.stopped,
            Agent::Tissue(cell) => cell.stopped,
        }
    }

    /// Whether this is a T-cell agent.
    #[must_use]
    pub fn is_tcell(&self) -> bool {
        matches!(self, Agent::TCell(_))
    }

    /// Per-record snapshot.
    #[must_use]
    pub fn snapshot(&self) -> CellSnapshot {
        match self {
            Agent::TCell(cell) => cell.snapshot(),
            Agent::Tissue(cell) => cell.snapshot(),
        }
    }
}

/// Per-agent record emitted to profilers and death logs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CellSnapshot {
    /// Subtype code: 0 for tissue, 4/8 for T-cell variants.
    pub code: u8,
    pub pop: usize,
    pub state: u8,
    pub coord: Coord,
    pub volume: f64,
    pub age: u32,
    pub cycles: Vec<f64>,
}

/// Record of a target killed by a cytotoxic agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LysisRecord {
    pub tick: u64,
    pub coord: Coord,
    pub victim: CellSnapshot,
}

/// One profiling interval's worth of agent snapshots.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProfileFrame {
    pub tick: u64,
    pub agents: Vec<CellSnapshot>,
}

/// Configuration for one T-cell population.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TCellPopulation {
    pub subtype: Subtype,
    pub params: ParamSet,
    /// Initial (and critical) volume distribution.
    pub volume: Parameter,
    /// Initial age range in minutes.
    pub age: AgeRange,
    /// Spread of the death-probability curve around the drawn death age.
    pub death_age_sd: f64,
    /// Migration rate in micrometers per minute, with jitter range.
    pub migra_rate: f64,
    pub migra_range: f64,
    /// Apoptosis completion time in minutes, with jitter range.
    pub death_time: u64,
    pub death_range: u64,
    /// Time a bound cell holds its target, with jitter range.
    pub bound_time: u64,
    pub bound_range: u64,
    /// DNA synthesis duration in minutes, with jitter range.
    pub synthesis_time: f64,
    pub synthesis_range: f64,
    pub signaling: SignalingRates,
    /// Delay before subtype production engages, in minutes.
    pub synthesis_delay: usize,
    /// CD4 IL-2 production rates (ignored by CD8 populations).
    pub il2_prod_rate_il2: f64,
    pub il2_prod_rate_active: f64,
    pub metabolism: MetabolismRates,
}

impl TCellPopulation {
    /// Reasonable defaults for the given subtype.
    #[must_use]
    pub fn defaults(subtype: Subtype) -> Self {
        Self {
            subtype,
            params: ParamSet::default(),
            volume: Parameter::new(175.0, 0.05),
            age: AgeRange { min: 0, max: 1440 },
            death_age_sd: 10_080.0,
            migra_rate: 0.5,
            migra_range: 0.1,
            death_time: 720,
            death_range: 120,
            bound_time: 60,
            bound_range: 10,
            synthesis_time: 636.0,
            synthesis_range: 60.0,
            signaling: SignalingRates::default(),
            synthesis_delay: 30,
            il2_prod_rate_il2: 10.0,
            il2_prod_rate_active: 100.0,
            metabolism: MetabolismRates::default(),
        }
    }

    /// The signaling variant implied by the subtype tag.
    #[must_use]
    pub fn signaling_kind(&self) -> SignalingKind {
        match self.subtype {
            Subtype::Cd8 => SignalingKind::Cytotoxic {
                synthesis_delay: self.synthesis_delay,
            },
            Subtype::Cd4 => SignalingKind::Stimulatory {
                synthesis_delay: self.synthesis_delay,
                prod_rate_il2: self.il2_prod_rate_il2,
                prod_rate_active: self.il2_prod_rate_active,
            },
        }
    }
}

/// Configuration for one tissue population.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TissuePopulation {
    pub volume: Parameter,
    pub car_antigens: Parameter,
    pub self_ligands: Parameter,
    pub max_height: f64,
    pub cancerous: bool,
}

impl Default for TissuePopulation {
    fn default() -> Self {
        Self {
            volume: Parameter::new(2250.0, 0.1),
            car_antigens: Parameter::new(5000.0, 0.1),
            self_ligands: Parameter::new(150.0, 0.1),
            max_height: 8.7,
            cancerous: true,
        }
    }
}

/// One population entry: the subtype tag replaces the source's
/// reflection-based constructor comparison.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum PopulationConfig {
    CarT(TCellPopulation),
    Tissue(TissuePopulation),
}

/// Static configuration for a growth world.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartSimConfig {
    pub lattice: LatticeConfig,
    /// Optional RNG seed for reproducible runs.
    pub rng_seed: Option<u64>,
    /// Ticks between profiling frames; 0 disables profiling.
    pub profile_interval: u32,
    /// Reference glucose concentration used to normalize location scores
    /// [fmol/um^3].
    pub glucose_concentration: f64,
    /// Initial substrate concentrations seeded uniformly into the lattice.
    pub initial_glucose: f64,
    pub initial_oxygen: f64,
    pub initial_il2: f64,
    /// Sites with more damage than this are skipped when seeding treatment.
    pub max_damage_seed: f64,
    pub populations: Vec<PopulationConfig>,
}

impl Default for CartSimConfig {
    fn default() -> Self {
        Self {
            lattice: LatticeConfig::default(),
            rng_seed: None,
            profile_interval: 0,
            glucose_concentration: 5e-3,
            initial_glucose: 2.5e-3,
            initial_oxygen: 1.5e-2,
            initial_il2: 0.0,
            max_damage_seed: 0.5,
            populations: vec![
                PopulationConfig::Tissue(TissuePopulation::default()),
                PopulationConfig::CarT(TCellPopulation::defaults(Subtype::Cd8)),
                PopulationConfig::CarT(TCellPopulation::defaults(Subtype::Cd4)),
            ],
        }
    }
}

impl CartSimConfig {
    fn validate(&self) -> Result<(), GrowthError> {
        if self.populations.is_empty() {
            return Err(GrowthError::InvalidConfig(
                "at least one population is required",
            ));
        }
        if self.glucose_concentration <= 0.0 {
            return Err(GrowthError::InvalidConfig(
                "glucose_concentration must be positive",
            ));
        }
        if self.initial_glucose < 0.0 || self.initial_oxygen < 0.0 || self.initial_il2 < 0.0 {
            return Err(GrowthError::InvalidConfig(
                "initial substrate concentrations must be non-negative",
            ));
        }
        if self.max_damage_seed < 0.0 {
            return Err(GrowthError::InvalidConfig(
                "max_damage_seed must be non-negative",
            ));
        }
        Ok(())
    }

    fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}

/// Errors raised by the growth world.
#[derive(Debug, Error)]
pub enum GrowthError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// A lattice operation failed.
    #[error(transparent)]
    Lattice(#[from] LatticeError),
    /// A scheduling operation failed.
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    /// A seeding request named a population of the wrong kind.
    #[error("population {pop} cannot seed agents of the requested kind")]
    PopulationMismatch { pop: usize },
    /// Treatment seeding ran out of usable locations with dose remaining.
    #[error("treatment seeding exhausted at tick {tick} with {remaining} of {dose} unplaced")]
    SeedingExhausted {
        tick: u64,
        dose: usize,
        remaining: usize,
    },
    /// A helper and its owning agent disagree about each other.
    #[error("helper invariant violated for agent {agent:?} at tick {tick}")]
    HelperInvariant { agent: AgentId, tick: u64 },
}

/// Events processed by the tick pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    CellStep(AgentId),
    HelperStep(HelperId),
    Profile,
}

/// Summary of one executed tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickEvents {
    pub tick: Tick,
    pub births: usize,
    pub deaths: usize,
    pub kills: usize,
    pub seeded: usize,
}

/// The simulation world: agents, lattice, schedule, and the one RNG.
pub struct GrowthWorld {
    config: CartSimConfig,
    tick: Tick,
    rng: SmallRng,
    agents: SlotMap<AgentId, Agent>,
    helpers: SlotMap<HelperId, Helper>,
    lattice: Lattice<AgentId>,
    schedule: Schedule<Event>,
    lysis_log: Vec<LysisRecord>,
    profiles: Vec<ProfileFrame>,
    births: usize,
    deaths: usize,
    kills: usize,
    seeded: usize,
}

impl std::fmt::Debug for GrowthWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrowthWorld")
            .field("tick", &self.tick)
            .field("agent_count", &self.agents.len())
            .field("helper_count", &self.helpers.len())
            .finish()
    }
}

impl GrowthWorld {
    /// Build a world from configuration.
    pub fn new(config: CartSimConfig) -> Result<Self, GrowthError> {
        config.validate()?;
        let rng = config.seeded_rng();
        let mut lattice = Lattice::new(config.lattice.clone())?;
        lattice.fill_field(Substrate::Glucose, config.initial_glucose);
        lattice.fill_field(Substrate::Oxygen, config.initial_oxygen);
        lattice.fill_field(Substrate::Il2, config.initial_il2);

        let mut schedule = Schedule::new();
        if config.profile_interval > 0 {
            let interval = u64::from(config.profile_interval);
            schedule.schedule_repeating(interval, interval, Ordering::Profilers, Event::Profile)?;
        }

        Ok(Self {
            config,
            tick: Tick::zero(),
            rng,
            agents: SlotMap::with_key(),
            helpers: SlotMap::with_key(),
            lattice,
            schedule,
            lysis_log: Vec::new(),
            profiles: Vec::new(),
            births: 0,
            deaths: 0,
            kills: 0,
            seeded: 0,
        })
    }

    /// Current tick.
    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    /// Static configuration.
    #[must_use]
    pub fn config(&self) -> &CartSimConfig {
        &self.config
    }

    /// Read-only agent access.
    #[must_use]
    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.agents.get(id)
    }

    /// Iterate over all live agents.
    pub fn agents(&self) -> impl Iterator<Item = (AgentId, &Agent)> {
        self.agents.iter()
    }

    /// Number of live agents.
    #[must_use]
    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Read-only helper access.
    #[must_use]
    pub fn helper(&self, id: HelperId) -> Option<&Helper> {
        self.helpers.get(id)
    }

    /// Immutable lattice access.
    #[must_use]
    pub fn lattice(&self) -> &Lattice<AgentId> {
        &self.lattice
    }

    /// Mutable lattice access (for scenario setup).
    #[must_use]
    pub fn lattice_mut(&mut self) -> &mut Lattice<AgentId> {
        &mut self.lattice
    }

    /// Borrow the shared RNG (for scenario setup in tests).
    #[must_use]
    pub fn rng(&mut self) -> &mut SmallRng {
        &mut self.rng
    }

    /// Records of targets killed so far.
    #[must_use]
    pub fn lysis_records(&self) -> &[LysisRecord] {
        &self.lysis_log
    }

    /// Profiling frames collected so far.
    #[must_use]
    pub fn profiles(&self) -> &[ProfileFrame] {
        &self.profiles
    }

    fn tcell_population(&self, pop: usize) -> Result<&TCellPopulation, GrowthError> {
        match self.config.populations.get(pop) {
            Some(PopulationConfig::CarT(population)) => Ok(population),
            _ => Err(GrowthError::PopulationMismatch { pop }),
        }
    }

    fn tissue_population(&self, pop: usize) -> Result<&TissuePopulation, GrowthError> {
        match self.config.populations.get(pop) {
            Some(PopulationConfig::Tissue(population)) => Ok(population),
            _ => Err(GrowthError::PopulationMismatch { pop }),
        }
    }

    /// Seed one tissue cell at `coord`.
    pub fn seed_tissue(&mut self, pop: usize, coord: Coord) -> Result<AgentId, GrowthError> {
        let population = self.tissue_population(pop)?.clone();
        let cell = TissueCell {
            pop,
            state: CellState::Neutral,
            coord,
            volume: population.volume.draw(&mut self.rng),
            car_antigens: population.car_antigens.draw(&mut self.rng),
            self_ligands: population.self_ligands.draw(&mut self.rng),
            cancerous: population.cancerous,
            max_height: population.max_height,
            stopped: false,
        };
        let id = self.agents.insert(Agent::Tissue(cell));
        self.lattice.add_agent(id, coord)?;
        Ok(id)
    }

    /// Insert one T-cell of population `pop` at `coord`, drawing volume and
    /// age from the population distributions, and schedule its stepping.
    pub fn insert_tcell(&mut self, pop: usize, coord: Coord) -> Result<AgentId, GrowthError> {
        let population = self.tcell_population(pop)?.clone();
        let volume = population.volume.draw(&mut self.rng);
        let age = population.age.draw(&mut self.rng);
        self.insert_tcell_with(&population, pop, coord, volume, age)
    }

    fn insert_tcell_with(
        &mut self,
        population: &TCellPopulation,
        pop: usize,
        coord: Coord,
        volume: f64,
        age: u32,
    ) -> Result<AgentId, GrowthError> {
        let glucose_ext = self.lattice.field_average(Substrate::Glucose, coord)?
            * self.lattice.config().location_volume;
        let cell = CartCell::new(
            population,
            pop,
            coord,
            volume,
            age,
            &population.params.clone().sanitized(),
            glucose_ext,
            &mut self.rng,
        );
        let id = self.agents.insert(Agent::TCell(cell));
        self.lattice.add_agent(id, coord)?;
        self.schedule_stepper(id)?;
        Ok(id)
    }

    /// Register an already-built T-cell (daughters arrive through here).
    pub(crate) fn adopt_tcell(
        &mut self,
        mut cell: CartCell,
        coord: Coord,
    ) -> Result<AgentId, GrowthError> {
        cell.coord = coord;
        cell.helper = None;
        cell.stepper = None;
        let id = self.agents.insert(Agent::TCell(cell));
        self.lattice.add_agent(id, coord)?;
        self.schedule_stepper(id)?;
        Ok(id)
    }

    fn schedule_stepper(&mut self, id: AgentId) -> Result<(), GrowthError> {
        let handle = self.schedule.schedule_repeating(
            self.tick.0 + 1,
            1,
            Ordering::Cells,
            Event::CellStep(id),
        )?;
        if let Some(Agent::TCell(cell)) = self.agents.get_mut(id) {
            cell.stepper = Some(handle);
        }
        Ok(())
    }

    /// Schedule a treatment course: after `delay` ticks, `dose` T-cells are
    /// seeded near usable vasculature sites, split between populations by
    /// the given fractions.
    pub fn schedule_treatment(
        &mut self,
        delay: u64,
        course: TreatCourse,
    ) -> Result<HelperId, GrowthError> {
        for &(pop, _) in &course.fractions {
            self.tcell_population(pop)?;
        }
        let begin = self.tick;
        let end = Tick(self.tick.0 + delay);
        self.install_helper(None, HelperKind::Treat(course), begin, end, false)
    }

    pub(crate) fn install_helper(
        &mut self,
        cell: Option<AgentId>,
        kind: HelperKind,
        begin: Tick,
        end: Tick,
        repeating: bool,
    ) -> Result<HelperId, GrowthError> {
        let id = self.helpers.insert(Helper {
            cell,
            begin,
            end,
            handle: EntryId::default(),
            kind,
        });
        let handle = if repeating {
            self.schedule
                .schedule_repeating(end.0, 1, Ordering::Helpers, Event::HelperStep(id))?
        } else {
            self.schedule
                .schedule_once(end.0, Ordering::Helpers, Event::HelperStep(id))
        };
        self.helpers[id].handle = handle;
        if let Some(owner) = cell
            && let Some(Agent::TCell(cell)) = self.agents.get_mut(owner)
        {
            cell.helper = Some(id);
        }
        Ok(id)
    }

    /// Stop and discard the agent's active helper, if any.
    pub(crate) fn clear_helper(&mut self, id: AgentId) {
        let Some(Agent::TCell(cell)) = self.agents.get_mut(id) else {
            return;
        };
        if let Some(helper_id) = cell.helper.take()
            && let Some(helper) = self.helpers.remove(helper_id)
        {
            self.schedule.stop(helper.handle);
        }
    }

    /// Remove a T-cell from the world: lattice, schedule, then arena.
    /// Idempotent; helpers referencing the agent observe a missing key.
    pub(crate) fn remove_tcell(&mut self, id: AgentId) {
        let Some(Agent::TCell(cell)) = self.agents.get_mut(id) else {
            return;
        };
        cell.stopped = true;
        let coord = cell.coord;
        let stepper = cell.stepper.take();
        if let Some(handle) = stepper {
            self.schedule.stop(handle);
        }
        let _ = self.lattice.remove_agent(id, coord);
        self.agents.remove(id);
        self.deaths += 1;
    }

    /// Apply lethal damage to a tissue target and record the lysis.
    pub(crate) fn lyse_tissue(&mut self, id: AgentId) {
        let Some(Agent::Tissue(cell)) = self.agents.get_mut(id) else {
            return;
        };
        cell.state = CellState::Apoptotic;
        cell.stopped = true;
        let record = LysisRecord {
            tick: self.tick.0,
            coord: cell.coord,
            victim: cell.snapshot(),
        };
        let coord = cell.coord;
        let _ = self.lattice.remove_agent(id, coord);
        self.agents.remove(id);
        self.lysis_log.push(record);
        self.kills += 1;
    }

    /// Execute one tick: cell steps, then helper steps, then profiling, in
    /// schedule order.
    pub fn run_tick(&mut self) -> Result<TickEvents, GrowthError> {
        let tick = self.tick.next();
        self.tick = tick;
        self.births = 0;
        self.deaths = 0;
        self.kills = 0;
        self.seeded = 0;

        while let Some((_, event)) = self.schedule.take_due(tick.0) {
            match event {
                Event::CellStep(id) => self.step_cell(id)?,
                Event::HelperStep(id) => self.step_helper(id)?,
                Event::Profile => self.profile(),
            }
        }

        Ok(TickEvents {
            tick,
            births: self.births,
            deaths: self.deaths,
            kills: self.kills,
            seeded: self.seeded,
        })
    }

    /// Run `ticks` consecutive ticks, returning the final summary.
    pub fn run(&mut self, ticks: u64) -> Result<TickEvents, GrowthError> {
        let mut events = TickEvents::default();
        for _ in 0..ticks {
            events = self.run_tick()?;
        }
        Ok(events)
    }

    fn profile(&mut self) {
        let agents = self
            .agents
            .values()
            .map(Agent::snapshot)
            .collect::<Vec<_>>();
        debug!(tick = self.tick.0, agents = agents.len(), "profile frame");
        self.profiles.push(ProfileFrame {
            tick: self.tick.0,
            agents,
        });
    }

    /// Cross-check the helper/agent reference invariant: every helper's
    /// owner points back at it, and every cell's helper exists.
    pub fn validate_helpers(&self) -> Result<(), GrowthError> {
        for (helper_id, helper) in &self.helpers {
            if let Some(owner) = helper.cell {
                match self.agents.get(owner) {
                    None => continue, // resolved as "already stopped" at fire time
                    Some(Agent::TCell(cell)) if cell.helper == Some(helper_id) => {}
                    Some(_) => {
                        return Err(GrowthError::HelperInvariant {
                            agent: owner,
                            tick: self.tick.0,
                        });
                    }
                }
            }
        }
        for (agent_id, agent) in &self.agents {
            if let Agent::TCell(cell) = agent
                && let Some(helper_id) = cell.helper
                && !self.helpers.contains_key(helper_id)
            {
                return Err(GrowthError::HelperInvariant {
                    agent: agent_id,
                    tick: self.tick.0,
                });
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Agent step rules.
    // ------------------------------------------------------------------

    fn step_cell(&mut self, id: AgentId) -> Result<(), GrowthError> {
        // A dead or missing agent's repeating entry is cleaned up lazily.
        let Some(Agent::TCell(cell)) = self.agents.get_mut(id) else {
            return Ok(());
        };
        if cell.stopped {
            if let Some(handle) = cell.stepper.take() {
                self.schedule.stop(handle);
            }
            return Ok(());
        }

        // Age, then check lifespan against the cumulative death curve.
        cell.age += 1;
        let (age, death_age, state, pop) = (cell.age, cell.death_age, cell.state, cell.pop);
        if f64::from(age) > death_age && state != CellState::Apoptotic {
            let sd = self.tcell_population(pop)?.death_age_sd;
            let p = normal_cdf(f64::from(age), death_age, sd);
            let draw = self.rng.random::<f64>();
            if draw < p {
                self.apoptose(id)?;
            }
        }

        // Decay the activity ticker: one antigen-count decrement per
        // bindingless day, and deactivation after seven.
        if let Some(Agent::TCell(cell)) = self.agents.get_mut(id) {
            cell.last_active_ticker += 1;
            if cell.last_active_ticker % ACTIVITY_WINDOW == 0 && cell.bound_antigen_count > 0 {
                cell.bound_antigen_count -= 1;
            }
            if cell.last_active_ticker / ACTIVITY_WINDOW >= ACTIVITY_WINDOWS_MAX {
                cell.flags.activated = false;
            }
        }

        self.step_metabolism(id)?;
        self.check_energy(id)?;
        self.step_signaling(id)?;
        self.decide(id)?;
        Ok(())
    }

    fn step_metabolism(&mut self, id: AgentId) -> Result<(), GrowthError> {
        let Some(Agent::TCell(cell)) = self.agents.get(id) else {
            return Ok(());
        };
        let coord = cell.coord;
        let geometry = self.lattice.config().clone();
        let occupancy = self.lattice.occupancy(coord)?.max(1);
        let env = MetabolismEnv {
            glucose_ext: self.lattice.field_average(Substrate::Glucose, coord)?
                * geometry.location_volume,
            oxygen_ext: self.lattice.field_average(Substrate::Oxygen, coord)?
                * geometry.location_volume,
            location_volume: geometry.location_volume,
            location_area: geometry.location_area,
            area_fraction: 1.0 / occupancy as f64,
        };

        let Some(Agent::TCell(cell)) = self.agents.get_mut(id) else {
            return Ok(());
        };
        let status = MetabolismStatus {
            activated: cell.flags.activated,
            proliferating: cell.flags.proliferating,
            migrating: cell.flags.migrating,
        };
        let CartCell {
            metabolism,
            signaling,
            energy,
            flags,
            ..
        } = cell;
        let output = metabolism.step(*energy, status, signaling, env);
        *energy = output.energy;
        flags.doubled = output.doubled;

        self.lattice.adjust_field(
            Substrate::Glucose,
            coord,
            -output.glucose_uptake / geometry.location_volume,
        )?;
        self.lattice.adjust_field(
            Substrate::Oxygen,
            coord,
            -output.oxygen_uptake / geometry.location_volume,
        )?;
        Ok(())
    }

    fn check_energy(&mut self, id: AgentId) -> Result<(), GrowthError> {
        let Some(Agent::TCell(cell)) = self.agents.get(id) else {
            return Ok(());
        };
        let (energy, threshold, state) = (cell.energy, cell.energy_threshold, cell.state);
        if energy < threshold && state != CellState::Apoptotic {
            self.apoptose(id)?;
        } else if energy < 0.0 && !state.blocks_starvation() {
            self.starve(id);
        } else if state == CellState::Starved && energy >= 0.0 {
            if let Some(Agent::TCell(cell)) = self.agents.get_mut(id) {
                cell.state = CellState::Neutral;
            }
        }
        Ok(())
    }

    fn step_signaling(&mut self, id: AgentId) -> Result<(), GrowthError> {
        let Some(Agent::TCell(cell)) = self.agents.get(id) else {
            return Ok(());
        };
        let coord = cell.coord;
        let env = SignalingEnv {
            volume: cell.volume(),
            location_volume: self.lattice.config().location_volume,
            il2_field: self.lattice.field_average(Substrate::Il2, coord)?,
        };
        let Some(Agent::TCell(cell)) = self.agents.get_mut(id) else {
            return Ok(());
        };
        let active = cell.flags.activated;
        let output = cell.signaling.step(active, env);
        self.lattice
            .set_field(Substrate::Il2, coord, output.il2_field.max(0.0))?;
        Ok(())
    }

    fn decide(&mut self, id: AgentId) -> Result<(), GrowthError> {
        let Some(Agent::TCell(cell)) = self.agents.get(id) else {
            return Ok(());
        };
        if !matches!(cell.state, CellState::Neutral | CellState::Paused) {
            return Ok(());
        }
        if cell.divisions == 0 {
            self.senesce(id)?;
            return Ok(());
        }

        let outcome = bind(&self.agents, &self.lattice, id, &mut self.rng);
        let Some(Agent::TCell(cell)) = self.agents.get_mut(id) else {
            return Ok(());
        };
        cell.flags.bound_antigen = outcome.antigen;
        cell.flags.bound_self = outcome.self_ligand;
        if outcome.antigen {
            cell.bound_antigen_count += 1;
            if let Some(bump) = outcome.self_receptor_bump {
                cell.self_receptors += bump;
                cell.heritable.self_receptors = cell
                    .heritable
                    .self_receptors
                    .update(f64::from(cell.self_receptors));
            }
        }
        if outcome.self_ligand {
            cell.bound_self_count += 1;
        }

        if outcome.antigen {
            if outcome.self_ligand {
                self.anergy(id)?;
            } else if cell.bound_antigen_count > cell.max_antigen_binding {
                self.exhaust(id)?;
            } else if let Some(target) = outcome.target {
                match cell.subtype {
                    Subtype::Cd8 => self.cytotoxic(id, target)?,
                    Subtype::Cd4 => self.stimulate(id, target)?,
                }
            }
        } else {
            if outcome.self_ligand {
                // Only the inhibitory receptor engaged: release it.
                cell.flags.bound_self = false;
            }
            if cell.flags.activated {
                self.proliferate(id)?;
            } else {
                let proli_frac = cell.proli_frac;
                if self.rng.random::<f64>() > proli_frac {
                    self.migrate(id)?;
                } else {
                    self.proliferate(id)?;
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // State transitions.
    // ------------------------------------------------------------------

    /// Switch to senescent, or apoptose with the complementary probability.
    pub fn senesce(&mut self, id: AgentId) -> Result<(), GrowthError> {
        let Some(Agent::TCell(cell)) = self.agents.get(id) else {
            return Ok(());
        };
        let frac = cell.senes_frac;
        if self.rng.random::<f64>() > frac {
            self.apoptose(id)
        } else {
            if let Some(Agent::TCell(cell)) = self.agents.get_mut(id) {
                cell.state = CellState::Senescent;
                cell.flags.migrating = false;
                cell.flags.proliferating = false;
                cell.flags.bound_antigen = false;
                cell.flags.bound_self = false;
                cell.flags.activated = false;
            }
            Ok(())
        }
    }

    /// Switch to apoptotic and schedule removal after the death duration.
    pub fn apoptose(&mut self, id: AgentId) -> Result<(), GrowthError> {
        self.clear_helper(id);
        let Some(Agent::TCell(cell)) = self.agents.get_mut(id) else {
            return Ok(());
        };
        cell.state = CellState::Apoptotic;
        cell.flags.migrating = false;
        cell.flags.proliferating = false;
        cell.flags.bound_antigen = false;
        cell.flags.bound_self = false;
        cell.flags.activated = false;
        let pop = cell.pop;
        let population = self.tcell_population(pop)?;
        let (death_time, death_range) = (population.death_time, population.death_range);
        let jitter = (death_range as f64 * (2.0 * self.rng.random::<f64>() - 1.0)).round() as i64;
        let end = Tick((self.tick.0 + death_time).saturating_add_signed(jitter));
        self.install_helper(Some(id), HelperKind::Remove, self.tick, end, false)?;
        Ok(())
    }

    /// Switch to starved; flags reset, no helper.
    pub fn starve(&mut self, id: AgentId) {
        if let Some(Agent::TCell(cell)) = self.agents.get_mut(id) {
            cell.state = CellState::Starved;
            cell.flags.migrating = false;
            cell.flags.proliferating = false;
            cell.flags.bound_antigen = false;
            cell.flags.bound_self = false;
        }
    }

    /// Switch to paused; the cell retries its decision on a later tick.
    pub fn pause(&mut self, id: AgentId) {
        if let Some(Agent::TCell(cell)) = self.agents.get_mut(id) {
            cell.state = CellState::Paused;
            cell.flags.migrating = false;
            cell.flags.proliferating = false;
            cell.flags.bound_antigen = false;
            cell.flags.bound_self = false;
        }
    }

    /// Switch to migratory and schedule the move completion.
    pub fn migrate(&mut self, id: AgentId) -> Result<(), GrowthError> {
        let Some(Agent::TCell(cell)) = self.agents.get_mut(id) else {
            return Ok(());
        };
        cell.state = CellState::Migratory;
        cell.flags.migrating = true;
        cell.flags.proliferating = false;
        cell.flags.bound_antigen = false;
        cell.flags.bound_self = false;
        let pop = cell.pop;
        let population = self.tcell_population(pop)?;
        let (rate, range) = (population.migra_rate, population.migra_range);
        let jittered = rate + range * (2.0 * self.rng.random::<f64>() - 1.0);
        let distance = self.lattice.config().grid_size;
        let travel = (distance / jittered).round().max(1.0) as u64;
        let end = Tick(self.tick.0 + travel);
        self.install_helper(Some(id), HelperKind::Move, self.tick, end, false)?;
        Ok(())
    }

    /// Switch to proliferative: build the prospective daughter now, then
    /// schedule the repeating division-completion helper.
    pub fn proliferate(&mut self, id: AgentId) -> Result<(), GrowthError> {
        let Some(Agent::TCell(cell)) = self.agents.get_mut(id) else {
            return Ok(());
        };
        cell.state = CellState::Proliferative;
        cell.flags.migrating = false;
        cell.flags.proliferating = true;
        cell.flags.bound_antigen = false;
        cell.flags.bound_self = false;

        let pop = cell.pop;
        let coord = cell.coord;
        let crit_volume = cell.crit_volume();
        let heritable = cell.heritable.clone();
        let population = self.tcell_population(pop)?.clone();

        let fraction = self.rng.random::<f64>() / 10.0 + 0.45;
        let glucose_ext = self.lattice.field_average(Substrate::Glucose, coord)?
            * self.lattice.config().location_volume;
        let daughter = CartCell::new(
            &population,
            pop,
            coord,
            crit_volume * 2.0 * fraction,
            0,
            &heritable,
            glucose_ext,
            &mut self.rng,
        );
        let jitter =
            (population.synthesis_range * (2.0 * self.rng.random::<f64>() - 1.0)).round();
        let synthesis_time = population.synthesis_time + jitter;
        let begin = self.tick;
        let end = Tick(self.tick.0 + 1);
        self.install_helper(
            Some(id),
            HelperKind::Divide {
                daughter: Box::new(daughter),
                fraction,
                synthesis_time,
                ticker: 0,
            },
            begin,
            end,
            true,
        )?;
        Ok(())
    }

    /// Switch to cytotoxic and schedule the kill interaction.
    pub fn cytotoxic(&mut self, id: AgentId, target: AgentId) -> Result<(), GrowthError> {
        let Some(Agent::TCell(cell)) = self.agents.get_mut(id) else {
            return Ok(());
        };
        cell.state = CellState::Cytotoxic;
        cell.flags.activated = true;
        cell.flags.migrating = false;
        cell.flags.proliferating = false;
        cell.last_active_ticker = 0;
        self.install_helper(
            Some(id),
            HelperKind::Kill { target },
            self.tick,
            self.tick,
            false,
        )?;
        Ok(())
    }

    /// Switch to stimulatory: quiesce the live target and hold the bound
    /// state for the bound duration.
    pub fn stimulate(&mut self, id: AgentId, target: AgentId) -> Result<(), GrowthError> {
        let Some(Agent::TCell(cell)) = self.agents.get_mut(id) else {
            return Ok(());
        };
        cell.state = CellState::Stimulatory;
        cell.flags.activated = true;
        cell.flags.migrating = false;
        cell.flags.proliferating = false;
        cell.last_active_ticker = 0;
        let pop = cell.pop;

        let target_stopped = match self.agents.get(target) {
            Some(agent) => agent.is_stopped(),
            None => true,
        };
        if target_stopped {
            if let Some(Agent::TCell(cell)) = self.agents.get_mut(id) {
                cell.flags.bound_antigen = false;
                cell.state = CellState::Neutral;
            }
            return Ok(());
        }
        if let Some(Agent::Tissue(tissue)) = self.agents.get_mut(target) {
            tissue.quiesce();
        }
        let population = self.tcell_population(pop)?;
        let (bound_time, bound_range) = (population.bound_time, population.bound_range);
        let jitter = (bound_range as f64 * (2.0 * self.rng.random::<f64>() - 1.0)).round() as i64;
        let end = Tick((self.tick.0 + bound_time).saturating_add_signed(jitter));
        self.install_helper(Some(id), HelperKind::Reset, self.tick, end, false)?;
        Ok(())
    }

    /// Switch to exhausted, or apoptose with the complementary probability.
    pub fn exhaust(&mut self, id: AgentId) -> Result<(), GrowthError> {
        let Some(Agent::TCell(cell)) = self.agents.get(id) else {
            return Ok(());
        };
        let frac = cell.exhau_frac;
        if self.rng.random::<f64>() > frac {
            self.apoptose(id)
        } else {
            if let Some(Agent::TCell(cell)) = self.agents.get_mut(id) {
                cell.state = CellState::Exhausted;
                cell.flags.migrating = false;
                cell.flags.proliferating = false;
                cell.flags.bound_antigen = false;
                cell.flags.activated = false;
            }
            Ok(())
        }
    }

    /// Switch to anergic, or apoptose with the complementary probability.
    pub fn anergy(&mut self, id: AgentId) -> Result<(), GrowthError> {
        let Some(Agent::TCell(cell)) = self.agents.get(id) else {
            return Ok(());
        };
        let frac = cell.anerg_frac;
        if self.rng.random::<f64>() > frac {
            self.apoptose(id)
        } else {
            if let Some(Agent::TCell(cell)) = self.agents.get_mut(id) {
                cell.state = CellState::Anergic;
                cell.flags.migrating = false;
                cell.flags.proliferating = false;
                cell.flags.bound_antigen = false;
                cell.flags.bound_self = false;
                cell.flags.activated = false;
            }
            Ok(())
        }
    }
}

/// Cumulative normal distribution via the Abramowitz-Stegun erf polynomial.
fn normal_cdf(x: f64, mean: f64, sd: f64) -> f64 {
    if sd <= 0.0 {
        return if x >= mean { 1.0 } else { 0.0 };
    }
    0.5 * (1.0 + erf((x - mean) / (sd * std::f64::consts::SQRT_2)))
}

fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let poly = t
        * (0.254_829_592
            + t * (-0.284_496_736 + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    sign * (1.0 - poly * (-x * x).exp())
}
