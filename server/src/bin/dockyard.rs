use clap::Parser;
use dockyard_commands::{parse_script, CommandScript, ParseErrorExt};
use std::{fs, path::PathBuf};
use tracing::{debug, info, warn};

use dockyard_lib::{
    physics::ParryRigidBodies,
    scenario::Scenario,
    simulation::SimulationHandle,
    sync,
    units::Time,
};

#[derive(Parser, Debug)]
#[command(version)]
struct Opts {
    /// Scenario configuration toml file.
    ///
    /// The default nominal scenario is used when not provided.
    #[arg(long)]
    scenario: Option<PathBuf>,

    /// Command script replayed at the scheduled ticks
    #[arg(long)]
    commands: Option<PathBuf>,

    /// Number of ticks to run. Runs until interrupted when not provided.
    #[arg(long)]
    ticks: Option<u64>,

    /// Tick length [s]
    #[arg(long, default_value_t = 1.0)]
    dt: f64,

    /// Write the final outbound snapshots to this JSON file
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let opts = Opts::parse();

    let intr = interruptor::Interruptor::new();
    let intr_clone = intr.clone();
    ctrlc::set_handler(move || {
        if intr_clone.is_set() {
            let exit_code = if cfg!(target_family = "unix") {
                // 128 (fatal error signal "n") + 2 (control-c is fatal error signal 2)
                130
            } else {
                // Windows code 3221225786
                // -1073741510 == C000013A
                -1073741510
            };
            std::process::exit(exit_code);
        } else {
            intr_clone.set();
        }
    })?;

    let script = match opts.commands.as_ref() {
        Some(path) => {
            println!("Opening '{}'", path.display());
            let content = fs::read_to_string(path)?;
            match parse_script(&content) {
                Ok((_, script)) => script,
                Err(e) => {
                    if e.is_failure() {
                        return Err(e.to_string().into());
                    }
                    warn!("Command script is incomplete, ignoring it");
                    CommandScript::default()
                }
            }
        }
        None => CommandScript::default(),
    };

    let scenario = Scenario::load(opts.scenario.as_ref())?;
    let mut sim = scenario.build(Box::new(ParryRigidBodies::new()))?;
    let mut events = sim.subscribe(None);
    let handle = SimulationHandle::new(sim);
    let dt = Time::from_secs(opts.dt);

    loop {
        if intr.is_set() {
            break;
        }
        let tick = handle.with(|sim| sim.info().tick);
        if opts.ticks.map(|n| tick >= n).unwrap_or(false) {
            break;
        }

        for command in script.due(tick) {
            let result = handle.with(|sim| sim.apply(command));
            match result {
                Ok(()) => info!(tick, command = command.name(), "Applied command"),
                Err(e) => warn!(tick, command = command.name(), err = %e, "Command rejected"),
            }
        }

        handle.tick(dt);

        for event in events.drain() {
            debug!(tick, event = ?event, "Event");
        }
        if tick % 100 == 0 {
            println!("TICK: {tick}");
        }
    }

    let info = handle.with(|sim| sim.info().clone());
    println!("Stopped at\n{info:#?}");

    if let Some(path) = opts.snapshot.as_ref() {
        let snapshots = handle.with(|sim| sync::snapshot_all(sim.context()));
        fs::write(path, serde_json::to_string_pretty(&snapshots)?)?;
        println!("Wrote {} snapshots to '{}'", snapshots.len(), path.display());
    }

    Ok(())
}

mod interruptor {
    use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
    use std::sync::Arc;

    #[derive(Clone, Debug)]
    #[repr(transparent)]
    pub struct Interruptor(Arc<AtomicBool>);

    impl Interruptor {
        pub fn new() -> Self {
            Interruptor(Arc::new(AtomicBool::new(false)))
        }

        pub fn set(&self) {
            self.0.store(true, SeqCst);
        }

        pub fn is_set(&self) -> bool {
            self.0.load(SeqCst)
        }
    }

    impl Default for Interruptor {
        fn default() -> Self {
            Self::new()
        }
    }
}
