use dockyard_commands::parse_script;
use dockyard_lib::{
    body::BodyKind,
    event::SimulationEvent,
    physics::ParryRigidBodies,
    scenario::{config::Config, nominal, Scenario},
    units::Time,
};
use dockyard_types::prelude::*;
use std::{collections::HashSet, fs, path::Path};

const CONFIG_FILES: &[&str] = &["lunar_survey.toml", "station_assembly.toml"];

#[test]
fn example_scenario_config_file_list_matches_expected() {
    let cfg_files: HashSet<String> = fs::read_dir("../scenarios")
        .unwrap()
        .map(|d| d.unwrap().file_name().into_string().unwrap())
        .collect();
    let expected: HashSet<String> = CONFIG_FILES.iter().map(|f| f.to_string()).collect();
    assert_eq!(cfg_files, expected, "Example scenarios directory is missing an expected config file or contains a new config file that should be tested");
}

#[test]
fn example_scenario_config_files_build() {
    let dir = Path::new("../scenarios");
    for cfg_file in CONFIG_FILES {
        let p = dir.join(cfg_file);
        let cfg = Config::load(&p).unwrap();
        let scenario = Scenario::from_config(&cfg).unwrap();
        let sim = scenario
            .build(Box::new(ParryRigidBodies::new()))
            .unwrap();
        assert_eq!(
            sim.context().bodies.len(),
            cfg.vessels.len() + cfg.loose_objects.len(),
            "{cfg_file}"
        );
        assert_eq!(sim.context().riders.len(), cfg.riders.len(), "{cfg_file}");
    }
}

#[test]
fn station_assembly_config_matches_the_nominal_scenario() {
    let from_file = Scenario::load(Some("../scenarios/station_assembly.toml")).unwrap();
    let nominal = nominal::scenario();

    assert_eq!(from_file.engine, nominal.engine);
    assert_eq!(from_file.bodies.len(), nominal.bodies.len());
    for (a, b) in from_file.bodies.iter().zip(nominal.bodies.iter()) {
        assert_eq!(a.name, b.name);
        assert_eq!(a.parent, b.parent);
        assert_eq!(a.kind.mass(), b.kind.mass());
        let (BodyKind::Vessel(va), BodyKind::Vessel(vb)) = (&a.kind, &b.kind) else {
            continue;
        };
        assert_eq!(va.hull_half_extents, vb.hull_half_extents);
        assert_eq!(va.triggers, vb.triggers);
        assert_eq!(va.security, vb.security);
        assert_eq!(va.ports.len(), vb.ports.len());
        for (pa, pb) in va.ports.iter().zip(vb.ports.iter()) {
            assert_eq!(pa.id, pb.id);
            assert_eq!(pa.position, pb.position);
            assert!(pa.rotation.angle_to(&pb.rotation) < 1e-9, "{} port {}", a.name, pa.id);
        }
    }
    let riders: Vec<_> = from_file.riders.iter().map(|r| (&r.name, &r.carrier, r.connected)).collect();
    let expected: Vec<_> = nominal.riders.iter().map(|r| (&r.name, &r.carrier, r.connected)).collect();
    assert_eq!(riders, expected);
}

#[test]
fn station_assembly_script_replays() {
    let content = fs::read_to_string("../commands/test_fixtures/station_assembly.txt").unwrap();
    let (_, script) = parse_script(&content).unwrap();
    let scenario = Scenario::load(Some("../scenarios/station_assembly.toml")).unwrap();
    let mut sim = scenario.build(Box::new(ParryRigidBodies::new())).unwrap();
    let mut events = sim.subscribe(None);

    let last = script.last_tick().unwrap();
    let mut seen = Vec::new();
    while sim.info().tick <= last + 10 {
        let tick = sim.info().tick;
        for command in script.due(tick) {
            let _ = sim.apply(command);
        }
        sim.tick(Time::from_secs(1.0));
        seen.extend(events.drain());
    }

    let (station, tug, cargo) = (BodyId(1), BodyId(2), BodyId(3));
    let fore = |v| PortRef::new(v, PortId(1));
    assert!(seen.contains(&SimulationEvent::Docked {
        main: station,
        a: fore(tug),
        b: fore(station),
    }));
    assert!(seen.contains(&SimulationEvent::CourseFinished {
        body: station,
        course: CourseId(1),
    }));
    assert!(seen.contains(&SimulationEvent::Undocked {
        a: fore(tug),
        b: fore(station),
        mains: [tug, station],
    }));
    assert!(seen.contains(&SimulationEvent::Destroyed { body: cargo }));

    let ctx = sim.context();
    assert!(ctx.bodies.contains_key(&station) && ctx.bodies.contains_key(&tug));
    assert!(!ctx.bodies.contains_key(&cargo));
    assert_eq!(ctx.tree.check_invariants(), Ok(()));
}
