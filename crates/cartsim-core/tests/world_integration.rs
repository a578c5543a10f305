use cartsim_core::{
    Agent, AgeRange, CartSimConfig, CellState, GrowthWorld, HelperKind, Parameter,
    PopulationConfig, Subtype, TCellPopulation, Tick, TissuePopulation, TreatCourse,
};
use cartsim_lattice::Coord;

/// Config with a tissue population (0), a CD8 population (1), and a CD4
/// population (2). The CAR alpha is cranked up so that an antigen-saturated
/// target binds on essentially every draw.
fn scenario_config(seed: u64) -> CartSimConfig {
    let mut cd8 = TCellPopulation::defaults(Subtype::Cd8);
    cd8.params.car_alpha = Parameter::constant(50.0);
    cd8.age = AgeRange { min: 0, max: 0 };
    let mut cd4 = TCellPopulation::defaults(Subtype::Cd4);
    cd4.params.car_alpha = Parameter::constant(50.0);
    cd4.age = AgeRange { min: 0, max: 0 };

    let tissue = TissuePopulation {
        volume: Parameter::constant(2250.0),
        car_antigens: Parameter::constant(1e9),
        self_ligands: Parameter::constant(0.0),
        max_height: 100.0,
        cancerous: true,
    };

    CartSimConfig {
        rng_seed: Some(seed),
        populations: vec![
            PopulationConfig::Tissue(tissue),
            PopulationConfig::CarT(cd8),
            PopulationConfig::CarT(cd4),
        ],
        ..CartSimConfig::default()
    }
}

#[test]
fn seeded_worlds_advance_identically() {
    let build = || {
        let mut world = GrowthWorld::new(scenario_config(0xDEAD_BEEF)).expect("world");
        for i in 0..4 {
            world
                .seed_tissue(0, Coord::new(8 + i, 8, 0))
                .expect("tissue");
        }
        world.insert_tcell(1, Coord::new(8, 9, 0)).expect("cd8");
        world.insert_tcell(2, Coord::new(10, 9, 0)).expect("cd4");
        world
    };
    let mut world_a = build();
    let mut world_b = build();

    for _ in 0..50 {
        let events_a = world_a.run_tick().expect("tick a");
        let events_b = world_b.run_tick().expect("tick b");
        assert_eq!(events_a, events_b);
    }

    assert_eq!(world_a.tick(), Tick(50));
    let trajectory = |world: &GrowthWorld| {
        world
            .agents()
            .map(|(_, agent)| {
                let snapshot = agent.snapshot();
                (snapshot.code, snapshot.state, snapshot.coord, snapshot.volume)
            })
            .collect::<Vec<_>>()
    };
    assert_eq!(trajectory(&world_a), trajectory(&world_b));
    assert_eq!(world_a.lysis_records(), world_b.lysis_records());
}

#[test]
fn scenario_a_lone_undecided_cell_migrates_or_proliferates() {
    let mut world = GrowthWorld::new(scenario_config(101)).expect("world");
    let id = world.insert_tcell(1, Coord::new(10, 10, 0)).expect("tcell");
    world.run_tick().expect("tick");

    let Some(Agent::TCell(cell)) = world.agent(id) else {
        panic!("cell vanished");
    };
    assert!(!cell.flags.bound_antigen);
    assert!(!cell.flags.bound_self);
    assert!(cell.divisions > 0);
    match cell.state {
        CellState::Migratory => {
            assert!(cell.flags.migrating);
            let helper = cell.helper.expect("move helper");
            assert!(matches!(
                world.helper(helper).map(|h| &h.kind),
                Some(HelperKind::Move)
            ));
        }
        CellState::Proliferative => {
            assert!(cell.flags.proliferating);
            let helper = cell.helper.expect("divide helper");
            assert!(matches!(
                world.helper(helper).map(|h| &h.kind),
                Some(HelperKind::Divide { .. })
            ));
        }
        other => panic!("unexpected state {other:?}"),
    }
    world.validate_helpers().expect("invariant");
}

#[test]
fn scenario_a_split_tracks_migration_probability() {
    // proli_frac defaults to 0.3, so roughly 70% of never-activated lone
    // cells should pick migration on their first decision.
    let mut migratory = 0;
    let mut proliferative = 0;
    for seed in 0..60 {
        let mut world = GrowthWorld::new(scenario_config(1000 + seed)).expect("world");
        let id = world.insert_tcell(1, Coord::new(10, 10, 0)).expect("tcell");
        world.run_tick().expect("tick");
        match world.agent(id).map(Agent::state) {
            Some(CellState::Migratory) => migratory += 1,
            Some(CellState::Proliferative) => proliferative += 1,
            other => panic!("unexpected state {other:?}"),
        }
    }
    assert_eq!(migratory + proliferative, 60);
    assert!(
        (25..=55).contains(&migratory),
        "migration picked {migratory}/60 times"
    );
}

#[test]
fn scenario_b_antigen_bound_cd8_turns_cytotoxic() {
    let mut world = GrowthWorld::new(scenario_config(202)).expect("world");
    let target = world.seed_tissue(0, Coord::new(10, 11, 0)).expect("target");
    let killer = world.insert_tcell(1, Coord::new(10, 10, 0)).expect("killer");
    world.run_tick().expect("tick");

    let Some(Agent::TCell(cell)) = world.agent(killer) else {
        panic!("killer vanished");
    };
    assert_eq!(cell.state, CellState::Cytotoxic);
    assert!(cell.flags.activated);
    assert!(cell.flags.bound_antigen);
    assert_eq!(cell.bound_antigen_count, 1);
    // The kill interaction fired within the same tick (helper ordering runs
    // after cell ordering): the primed granzyme unit lysed the target and a
    // reset helper now holds the bound state.
    assert!(world.agent(target).is_none());
    assert_eq!(world.lysis_records().len(), 1);
    assert!(cell.signaling.granzyme() < 1.0);
    let helper = cell.helper.expect("reset helper");
    assert!(matches!(
        world.helper(helper).map(|h| &h.kind),
        Some(HelperKind::Reset)
    ));
    world.validate_helpers().expect("invariant");
}

#[test]
fn scenario_b_cd4_variant_stimulates_instead() {
    let mut world = GrowthWorld::new(scenario_config(303)).expect("world");
    let target = world.seed_tissue(0, Coord::new(10, 11, 0)).expect("target");
    let helper_cell = world.insert_tcell(2, Coord::new(10, 10, 0)).expect("cd4");
    world.run_tick().expect("tick");

    let Some(Agent::TCell(cell)) = world.agent(helper_cell) else {
        panic!("cd4 vanished");
    };
    assert_eq!(cell.state, CellState::Stimulatory);
    assert!(cell.flags.activated);
    // Stimulation quiesces the target rather than killing it.
    assert_eq!(world.agent(target).map(Agent::state), Some(CellState::Quiescent));
    assert!(world.lysis_records().is_empty());
    let helper = cell.helper.expect("reset helper");
    assert!(matches!(
        world.helper(helper).map(|h| &h.kind),
        Some(HelperKind::Reset)
    ));
}

#[test]
fn scenario_c_reset_releases_the_bound_state() {
    let mut world = GrowthWorld::new(scenario_config(404)).expect("world");
    world.seed_tissue(0, Coord::new(10, 11, 0)).expect("target");
    let killer = world.insert_tcell(1, Coord::new(10, 10, 0)).expect("killer");
    world.run_tick().expect("tick");
    assert_eq!(
        world.agent(killer).map(Agent::state),
        Some(CellState::Cytotoxic)
    );

    // The reset helper fires after the bound duration (60 +/- 10 ticks) and
    // returns the killer to neutral with both binding flags cleared.
    let mut released = false;
    for _ in 0..80 {
        world.run_tick().expect("tick");
        if let Some(Agent::TCell(cell)) = world.agent(killer)
            && cell.state != CellState::Cytotoxic
        {
            assert!(!cell.flags.bound_antigen);
            assert!(!cell.flags.bound_self);
            released = true;
            break;
        }
    }
    assert!(released, "killer never released its bound state");
}

#[test]
fn scenario_d_treatment_places_the_full_dose() {
    let mut world = GrowthWorld::new(scenario_config(505)).expect("world");
    for x in 0..12 {
        for y in 0..4 {
            world
                .lattice_mut()
                .set_site(Coord::new(x, y, 0), 0.0)
                .expect("site");
        }
    }
    world
        .schedule_treatment(
            3,
            TreatCourse {
                dose: 10,
                fractions: vec![(1, 0.25), (2, 0.75)],
            },
        )
        .expect("treatment");

    // Nothing arrives before the delay elapses.
    world.run_tick().expect("tick");
    world.run_tick().expect("tick");
    assert_eq!(world.agent_count(), 0);

    let events = world.run_tick().expect("tick");
    assert_eq!(events.seeded, 10);
    let mut cd8 = 0;
    let mut cd4 = 0;
    for (id, agent) in world.agents() {
        let Agent::TCell(cell) = agent else {
            panic!("unexpected tissue agent");
        };
        assert!(
            world
                .lattice()
                .occupants(cell.coord)
                .expect("occupants")
                .contains(&id)
        );
        match cell.subtype {
            Subtype::Cd8 => cd8 += 1,
            Subtype::Cd4 => cd4 += 1,
        }
    }
    assert_eq!(cd8 + cd4, 10);
    assert!(cd8 <= 3 && cd4 <= 8, "split was {cd8}/{cd4}");
}

#[test]
fn helper_uniqueness_holds_across_a_busy_run() {
    let mut world = GrowthWorld::new(scenario_config(606)).expect("world");
    for i in 0..6 {
        world
            .seed_tissue(0, Coord::new(6 + i, 8, 0))
            .expect("tissue");
    }
    for i in 0..4 {
        world.insert_tcell(1, Coord::new(6 + i, 9, 0)).expect("cd8");
        world.insert_tcell(2, Coord::new(6 + i, 7, 0)).expect("cd4");
    }
    for _ in 0..120 {
        world.run_tick().expect("tick");
        world.validate_helpers().expect("helper invariant");
    }
}

#[test]
fn profiling_frames_arrive_on_the_configured_interval() {
    let mut config = scenario_config(707);
    config.profile_interval = 10;
    let mut world = GrowthWorld::new(config).expect("world");
    world.insert_tcell(1, Coord::new(5, 5, 0)).expect("tcell");
    for _ in 0..35 {
        world.run_tick().expect("tick");
    }
    let ticks: Vec<u64> = world.profiles().iter().map(|frame| frame.tick).collect();
    assert_eq!(ticks, vec![10, 20, 30]);
    for frame in world.profiles() {
        assert!(!frame.agents.is_empty());
        assert!(frame.agents.iter().all(|snapshot| snapshot.code == 8));
    }
}
