//! Stochastic receptor binding against neighboring targets.
//!
//! Two receptor systems compete: the engineered activating receptor (CAR)
//! against target antigens, and the native inhibitory receptor against
//! self ligands. Each candidate neighbor is scored with a Hill occupancy
//! term squashed through a logistic onto `[0, 1)` and compared against two
//! independent uniform draws from the shared stream. Engaging either
//! receptor ends the search at that candidate.

use crate::{Agent, AgentId};
use cartsim_lattice::Lattice;
use rand::Rng;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use slotmap::SlotMap;

/// Scaling from molar affinity to molecules per location volume:
/// liters per cubic micrometer times Avogadro's number.
const KD_SCALE: f64 = 1e-15 * 6.022e23;
/// Reference CAR count the receptor ratio is normalized against.
const CARS_REFERENCE: f64 = 50_000.0;

/// Result of one binding query, applied to the cell by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BindOutcome {
    /// The candidate the search stopped at, if either receptor engaged.
    pub target: Option<AgentId>,
    /// The activating receptor engaged its antigen.
    pub antigen: bool,
    /// The inhibitory receptor engaged its ligand.
    pub self_ligand: bool,
    /// Upregulation applied to the inhibitory receptor count on antigen
    /// engagement: a jitter around the starting count.
    pub self_receptor_bump: Option<u32>,
}

/// Logistic squash of a Hill score onto `[0, 1)`.
fn squash(hill: f64) -> f64 {
    2.0 / (1.0 + (-hill).exp()) - 1.0
}

/// Query the binding engine for the cell at `id`.
///
/// Collects all agents at and adjacent to the cell's location, shuffles
/// them with the shared stream, and examines up to `search_ability`
/// candidates in shuffle order, skipping other T-cells and dead targets.
/// The outcome carries the flag combination and counters to apply.
pub fn bind(
    agents: &SlotMap<AgentId, Agent>,
    lattice: &Lattice<AgentId>,
    id: AgentId,
    rng: &mut SmallRng,
) -> BindOutcome {
    let Some(Agent::TCell(cell)) = agents.get(id) else {
        return BindOutcome::default();
    };

    let location_volume = lattice.config().location_volume;
    let kd_car = cell.car_affinity * location_volume * KD_SCALE;
    let kd_self = cell.self_affinity * location_volume * KD_SCALE;

    let mut candidates: Vec<AgentId> = Vec::new();
    if let Ok(here) = lattice.occupants(cell.coord) {
        candidates.extend(here.iter().copied());
    }
    for neighbor in lattice.neighbors(cell.coord) {
        if let Ok(there) = lattice.occupants(neighbor) {
            candidates.extend(there.iter().copied());
        }
    }
    candidates.retain(|&candidate| candidate != id);
    candidates.shuffle(rng);

    if candidates.is_empty() {
        return BindOutcome::default();
    }

    let max_search = candidates.len().min(cell.search_ability as usize);
    for &candidate in candidates.iter().take(max_search) {
        let Some(Agent::Tissue(tissue)) = agents.get(candidate) else {
            continue;
        };
        if !tissue.is_viable() {
            continue;
        }

        let contact = cell.contact_frac;
        let antigens = tissue.car_antigens;
        let ligands = tissue.self_ligands;

        let hill_car = antigens * contact / (kd_car * cell.car_beta + antigens * contact)
            * (f64::from(cell.cars) / CARS_REFERENCE)
            * cell.car_alpha;
        let hill_self = ligands * contact / (kd_self * cell.self_beta + ligands * contact)
            * (f64::from(cell.self_receptors) / f64::from(cell.self_receptors_start))
            * cell.self_alpha;

        let score_car = squash(hill_car);
        let score_self = squash(hill_self);

        let draw_antigen = rng.random::<f64>();
        let draw_self = rng.random::<f64>();

        let antigen = score_car >= draw_antigen;
        let self_ligand = score_self >= draw_self;

        if antigen {
            let jitter = 0.95 + rng.random::<f64>() / 10.0;
            let bump = (f64::from(cell.self_receptors_start) * jitter) as u32;
            return BindOutcome {
                target: Some(candidate),
                antigen: true,
                self_ligand,
                self_receptor_bump: Some(bump),
            };
        }
        if self_ligand {
            return BindOutcome {
                target: Some(candidate),
                antigen: false,
                self_ligand: true,
                self_receptor_bump: None,
            };
        }
        // Neither receptor engaged; keep searching.
    }

    BindOutcome::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Agent, CartSimConfig, CellState, GrowthWorld, Subtype};
    use cartsim_lattice::Coord;
    use rand::SeedableRng;

    fn world(seed: u64) -> GrowthWorld {
        GrowthWorld::new(CartSimConfig {
            rng_seed: Some(seed),
            ..CartSimConfig::default()
        })
        .expect("world")
    }

    #[test]
    fn no_neighbors_means_no_binding() {
        let mut world = world(11);
        let id = world.insert_tcell(1, Coord::new(9, 9, 0)).expect("tcell");
        let mut rng = SmallRng::seed_from_u64(0);
        let outcome = bind(&world.agents, world.lattice(), id, &mut rng);
        assert_eq!(outcome, BindOutcome::default());
    }

    #[test]
    fn binding_is_deterministic_for_a_fixed_stream() {
        let mut world = world(17);
        let center = Coord::new(5, 5, 0);
        let id = world.insert_tcell(1, center).expect("tcell");
        for i in 0..3 {
            world
                .seed_tissue(0, Coord::new(4 + i, 5, 0))
                .expect("tissue");
        }

        let a = bind(&world.agents, world.lattice(), id, &mut SmallRng::seed_from_u64(99));
        let b = bind(&world.agents, world.lattice(), id, &mut SmallRng::seed_from_u64(99));
        assert_eq!(a, b);
    }

    #[test]
    fn dead_targets_and_tcells_are_skipped() {
        let mut world = world(23);
        let center = Coord::new(5, 5, 0);
        let id = world.insert_tcell(1, center).expect("killer");
        // A sibling T-cell and an apoptotic target share the neighborhood;
        // neither is a valid candidate.
        world.insert_tcell(2, Coord::new(5, 6, 0)).expect("sibling");
        let corpse = world.seed_tissue(0, Coord::new(6, 5, 0)).expect("corpse");
        if let Some(Agent::Tissue(tissue)) = world.agents.get_mut(corpse) {
            tissue.state = CellState::Apoptotic;
        }

        for seed in 0..32 {
            let outcome = bind(
                &world.agents,
                world.lattice(),
                id,
                &mut SmallRng::seed_from_u64(seed),
            );
            assert_eq!(outcome.target, None, "seed {seed} bound an invalid target");
        }
    }

    #[test]
    fn saturated_antigen_engages_the_car() {
        let mut world = world(31);
        let center = Coord::new(5, 5, 0);
        let id = world.insert_tcell(1, center).expect("tcell");
        let target = world.seed_tissue(0, Coord::new(5, 6, 0)).expect("target");
        if let Some(Agent::Tissue(tissue)) = world.agents.get_mut(target) {
            tissue.car_antigens = 1e9;
            tissue.self_ligands = 0.0;
        }

        // With overwhelming antigen and zero inhibitory ligand the CAR
        // engages on essentially every stream.
        let mut bound = 0;
        for seed in 0..64 {
            let outcome = bind(
                &world.agents,
                world.lattice(),
                id,
                &mut SmallRng::seed_from_u64(seed),
            );
            if outcome.antigen {
                assert_eq!(outcome.target, Some(target));
                assert!(!outcome.self_ligand);
                assert!(outcome.self_receptor_bump.is_some());
                bound += 1;
            }
        }
        assert!(bound > 48, "CAR engaged only {bound}/64 streams");
    }

    #[test]
    fn subtype_is_fixed_at_construction() {
        let mut world = world(37);
        let cd8 = world.insert_tcell(1, Coord::new(1, 1, 0)).expect("cd8");
        let cd4 = world.insert_tcell(2, Coord::new(2, 2, 0)).expect("cd4");
        let Some(Agent::TCell(cell)) = world.agent(cd8) else {
            panic!()
        };
        assert_eq!(cell.subtype, Subtype::Cd8);
        let Some(Agent::TCell(cell)) = world.agent(cd4) else {
            panic!()
        };
        assert_eq!(cell.subtype, Subtype::Cd4);
    }
}
