//! The simulation context, the tick pipeline and the lock-guarded handle that
//! inbound commands go through.

use dockyard_commands::{Command, ThrustCommand};
use dockyard_types::prelude::*;
use na::{Isometry3, Translation3, UnitQuaternion, Vector3};
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::{
    body::{BodyKind, Course, DynamicBody},
    channel::{ChannelError, Receiver, Sender, StepChannel},
    composition::CompositionTree,
    destruction::{self, DestructionGate},
    docking::{self, DockingError},
    event::SimulationEvent,
    integrator::{AdvanceOutcome, IntegrationEnvironment, IntegrationError},
    orbit::{KeplerOrbit, OrbitModel},
    physics::{HullPart, PhysicsError, RigidBodyAdapter, RigidBodyDesc},
    riders::{Rider, RiderRegistry, RiderSnapshot},
    sim_info::SimulationInfo,
    solar_system::SolarSystem,
    stabilization::{self, StabilizationError, StabilizationGraph},
    units::{Mass, Time},
    SimulationComponent,
};

/// Engine tuning, read from the `[engine]` table of a scenario
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct EngineConfig {
    /// Per-axis angular velocity limit [rad/s]
    pub max_angular_rate: f64,
    /// Bodies closer than this to their parent's surface are destroyed [m]
    pub death_margin: f64,
    /// [m/s]
    pub max_stabilization_velocity: f64,
    /// Separation beyond the target's radius [m]
    pub max_stabilization_distance: f64,
    /// Relative speed of two groups after an undock [m/s]
    pub separation_speed: f64,
    /// [m]
    pub trigger_pairing_distance: f64,
    pub cascade_iteration_cap: usize,
    /// 0 uses one worker per core
    pub worker_threads: usize,
    /// Events buffered per tick before new ones are dropped
    pub event_capacity: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_angular_rate: 1.0,
            death_margin: 10_000.0,
            max_stabilization_velocity: 5.0,
            max_stabilization_distance: 100.0,
            separation_speed: 0.5,
            trigger_pairing_distance: 2.0,
            cascade_iteration_cap: 64,
            worker_threads: 0,
            event_capacity: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Docking(#[from] DockingError),
    #[error(transparent)]
    Stabilization(#[from] StabilizationError),
    #[error(transparent)]
    Physics(#[from] PhysicsError),
    #[error(transparent)]
    Integration(#[from] IntegrationError),
    #[error("Unknown body {0}")]
    UnknownBody(BodyId),
    #[error("Unknown celestial body {0}")]
    UnknownCelestial(CelestialId),
    #[error("Body {0} cannot thrust")]
    NotThrustCapable(BodyId),
    #[error("Course {0} is not well formed")]
    InvalidCourse(CourseId),
    #[error("Failed to build the worker pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Where a spawned body starts, relative to its parent
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Placement {
    Elements { elements: OrbitalElements, epoch: f64 },
    StateVectors { position: Vector3<f64>, velocity: Vector3<f64> },
}

#[derive(Clone, Debug)]
pub struct SpawnRequest {
    pub kind: BodyKind,
    pub parent: CelestialId,
    pub placement: Placement,
    pub rotation: UnitQuaternion<f64>,
    pub angular_velocity: Vector3<f64>,
}

/// Everything the engine's entry points read and write. Threaded explicitly
/// through dock, undock, stabilization and destruction.
#[derive(Debug)]
pub struct SimulationContext {
    pub info: SimulationInfo,
    pub config: EngineConfig,
    pub solar_system: SolarSystem,
    pub bodies: BTreeMap<BodyId, DynamicBody>,
    pub tree: CompositionTree,
    pub links: StabilizationGraph,
    pub riders: RiderRegistry,
    pub physics: Box<dyn RigidBodyAdapter>,
    pub destruction: DestructionGate,
    events: Sender<SimulationEvent>,
    next_body: u64,
    next_rider: u64,
}

impl SimulationContext {
    pub fn new(
        config: EngineConfig,
        solar_system: SolarSystem,
        physics: Box<dyn RigidBodyAdapter>,
        events: Sender<SimulationEvent>,
    ) -> Self {
        Self {
            info: SimulationInfo::new(),
            config,
            solar_system,
            bodies: BTreeMap::new(),
            tree: CompositionTree::new(),
            links: StabilizationGraph::new(),
            riders: RiderRegistry::new(),
            physics,
            destruction: DestructionGate::new(),
            events,
            next_body: 1,
            next_rider: 1,
        }
    }

    /// Simulation time [s]
    pub fn now(&self) -> f64 {
        self.info.now()
    }

    /// The main vessel of `id`'s group, or `id` itself for anything undocked
    pub fn main_of(&self, id: BodyId) -> BodyId {
        self.tree.main_vessel(id).unwrap_or(id)
    }

    pub fn emit(&mut self, event: SimulationEvent) {
        if let Err(ChannelError::QueueFull) = self.events.try_send(event) {
            warn!("Event queue full, dropping event");
        }
    }

    /// World pose of a main vessel's origin. The orbit tracks the group's mass
    /// center, which sits at `mass_center` in the main's frame.
    pub fn main_pose(&self, main: BodyId) -> Option<Isometry3<f64>> {
        let body = self.bodies.get(&main)?;
        let center = self
            .tree
            .group(main)
            .map(|g| g.mass_center)
            .unwrap_or_else(Vector3::zeros);
        let origin = body.orbit.absolute_position() - body.rotation * center;
        Some(Isometry3::from_parts(Translation3::from(origin), body.rotation))
    }

    pub fn world_pose(&self, id: BodyId) -> Option<Isometry3<f64>> {
        if !self.bodies.contains_key(&id) {
            return None;
        }
        let main = self.main_of(id);
        self.main_pose(main)
            .map(|pose| pose * self.tree.relative_to_main(id))
    }

    /// Velocity of the group's mass center [m/s]
    pub fn world_velocity(&self, id: BodyId) -> Vector3<f64> {
        self.bodies
            .get(&self.main_of(id))
            .map(|b| b.orbit.absolute_velocity())
            .unwrap_or_else(Vector3::zeros)
    }

    /// Port pose in its vessel's frame
    pub fn port_pose(&self, port: PortRef) -> Option<Isometry3<f64>> {
        self.bodies
            .get(&port.vessel)?
            .kind
            .vessel()?
            .port(port.port)
            .map(|p| p.pose())
    }

    /// Hulls of every vessel in the group, posed in the main's frame
    pub fn hull_parts(&self, main: BodyId) -> Vec<HullPart> {
        self.tree
            .members(main)
            .into_iter()
            .filter_map(|id| {
                let vessel = self.bodies.get(&id)?.kind.vessel()?;
                Some(HullPart {
                    vessel: id,
                    half_extents: vessel.hull_half_extents,
                    pose: self.tree.relative_to_main(id),
                })
            })
            .collect()
    }

    pub fn group_mass(&self, id: BodyId) -> Mass {
        match self.tree.group_of(id) {
            Some(group) => group.mass,
            None => self.bodies.get(&id).map(|b| b.mass()).unwrap_or_default(),
        }
    }

    /// Replace the physics body of a group with one matching its current
    /// members and pose
    pub fn rebuild_physics_body(&mut self, main: BodyId) -> Result<(), PhysicsError> {
        self.physics.remove(main);
        let parts = self.hull_parts(main);
        if parts.is_empty() {
            return Ok(());
        }
        let (Some(body), Some(pose)) = (self.bodies.get(&main), self.main_pose(main)) else {
            return Ok(());
        };
        self.physics.create(RigidBodyDesc {
            id: main,
            parts,
            mass: self.group_mass(main).as_kilograms(),
            pose,
            linear_velocity: body.orbit.absolute_velocity(),
            angular_velocity: body.rotation * body.angular_velocity,
        })
    }

    /// Mirror every independently moving group into the physics side
    pub fn sync_physics(&mut self) {
        let mains: Vec<BodyId> = self.tree.mains().collect();
        for main in mains {
            let (Some(body), Some(pose)) = (self.bodies.get(&main), self.main_pose(main)) else {
                continue;
            };
            let velocity = body.orbit.absolute_velocity();
            let omega = body.rotation * body.angular_velocity;
            if let Err(e) = self.physics.set_pose(main, pose, velocity, omega) {
                debug!(body = %main, err = %e, "Physics body out of sync, recreating");
                if let Err(e) = self.rebuild_physics_body(main) {
                    warn!(body = %main, err = %e, "Failed to recreate physics body");
                }
            }
        }
    }

    pub fn rider_snapshot(&self, carriers: &BTreeSet<BodyId>) -> Vec<RiderSnapshot> {
        self.riders.snapshot(carriers, |id| self.world_pose(id))
    }

    pub fn replay_riders(&mut self, snapshots: &[RiderSnapshot]) {
        let carrier_poses: BTreeMap<BodyId, Isometry3<f64>> = snapshots
            .iter()
            .filter_map(|s| {
                let carrier = self.riders.get(s.rider)?.carrier;
                self.world_pose(carrier).map(|p| (carrier, p))
            })
            .collect();
        for event in self.riders.replay(snapshots, &carrier_poses) {
            self.emit(event);
        }
    }

    fn allocate_body_id(&mut self) -> BodyId {
        while self.bodies.contains_key(&BodyId(self.next_body)) {
            self.next_body += 1;
        }
        let id = BodyId(self.next_body);
        self.next_body += 1;
        id
    }

    pub fn allocate_rider_id(&mut self) -> RiderId {
        while self.riders.get(RiderId(self.next_rider)).is_some() {
            self.next_rider += 1;
        }
        let id = RiderId(self.next_rider);
        self.next_rider += 1;
        id
    }

    /// Add a standalone body with an already seeded orbit
    pub fn spawn_body(
        &mut self,
        kind: BodyKind,
        orbit: Box<dyn OrbitModel>,
        rotation: UnitQuaternion<f64>,
    ) -> BodyId {
        let id = self.allocate_body_id();
        let body = DynamicBody::new(id, kind, orbit).with_rotation(rotation);
        if body.kind.can_dock() {
            self.tree.insert_vessel(id, body.mass());
        }
        debug!(body = %id, kind = body.kind.name(), "Spawned");
        self.bodies.insert(id, body);
        if let Err(e) = self.rebuild_physics_body(id) {
            warn!(body = %id, err = %e, "Failed to create physics body");
        }
        id
    }
}

/// The engine: a context, a worker pool for the parallel passes, and the
/// event channel observers subscribe to.
pub struct Simulation {
    ctx: SimulationContext,
    pool: rayon::ThreadPool,
    events: StepChannel<SimulationEvent>,
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("ctx", &self.ctx)
            .field("workers", &self.pool.current_num_threads())
            .finish()
    }
}

impl Simulation {
    pub fn new(
        config: EngineConfig,
        solar_system: SolarSystem,
        physics: Box<dyn RigidBodyAdapter>,
    ) -> Result<Self, CommandError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .thread_name(|i| format!("dockyard-worker-{i}"))
            .build()?;
        let mut events = StepChannel::new();
        let sender = events.sender(config.event_capacity);
        Ok(Self {
            ctx: SimulationContext::new(config, solar_system, physics, sender),
            pool,
            events,
        })
    }

    pub fn context(&self) -> &SimulationContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut SimulationContext {
        &mut self.ctx
    }

    pub fn info(&self) -> &SimulationInfo {
        &self.ctx.info
    }

    pub fn body(&self, id: BodyId) -> Option<&DynamicBody> {
        self.ctx.bodies.get(&id)
    }

    /// Observers see a tick's events once the tick completes
    pub fn subscribe(&mut self, capacity: impl Into<Option<usize>>) -> Receiver<SimulationEvent> {
        self.events.receiver(capacity)
    }

    pub fn spawn(&mut self, request: SpawnRequest) -> Result<BodyId, CommandError> {
        let now = self.ctx.now();
        let frame = self
            .ctx
            .solar_system
            .parent_frame(request.parent, now)
            .ok_or(CommandError::UnknownCelestial(request.parent))?;
        let orbit = match request.placement {
            Placement::Elements { elements, epoch } => {
                let mut orbit = KeplerOrbit::from_elements(frame, &elements, epoch);
                orbit.advance(now);
                orbit
            }
            Placement::StateVectors { position, velocity } => {
                KeplerOrbit::from_state(frame, position, velocity, now)
            }
        };
        let id = self
            .ctx
            .spawn_body(request.kind, Box::new(orbit), request.rotation);
        let env = IntegrationEnvironment {
            now,
            solar_system: &self.ctx.solar_system,
            config: &self.ctx.config,
            stabilized: false,
            derived: false,
        };
        if let Some(body) = self.ctx.bodies.get_mut(&id) {
            body.angular_velocity = request.angular_velocity;
            body.init(&env, &mut AdvanceOutcome::default())?;
        }
        Ok(id)
    }

    pub fn add_rider(
        &mut self,
        name: impl Into<String>,
        carrier: BodyId,
        local_pose: Isometry3<f64>,
        connected: bool,
    ) -> Result<RiderId, CommandError> {
        if !self.ctx.bodies.contains_key(&carrier) {
            return Err(CommandError::UnknownBody(carrier));
        }
        let id = self.ctx.allocate_rider_id();
        let rider = Rider::new(id, name, carrier, local_pose);
        self.ctx
            .riders
            .insert(if connected { rider.connected() } else { rider });
        Ok(id)
    }

    pub fn dock(&mut self, a: PortRef, b: PortRef) -> Result<BodyId, CommandError> {
        Ok(docking::dock(&mut self.ctx, a, b)?)
    }

    pub fn undock(&mut self, port: PortRef) -> Result<[BodyId; 2], CommandError> {
        Ok(docking::undock(&mut self.ctx, port)?)
    }

    pub fn stabilize(&mut self, dependent: BodyId, target: BodyId, force: bool) -> Result<BodyId, CommandError> {
        Ok(stabilization::attach(&mut self.ctx, dependent, target, force)?)
    }

    pub fn unstabilize(&mut self, dependent: BodyId) -> Result<BodyId, CommandError> {
        Ok(stabilization::detach(&mut self.ctx, dependent, true)?)
    }

    /// Queue thrust for the next tick. Requests on a docked member act on the
    /// group's main, expressed in the main's frame.
    pub fn thrust(&mut self, id: BodyId, thrust: &ThrustCommand) -> Result<(), CommandError> {
        let body = self.ctx.bodies.get(&id).ok_or(CommandError::UnknownBody(id))?;
        if !body.kind.is_thrust_capable() {
            return Err(CommandError::NotThrustCapable(id));
        }
        let main = self.ctx.main_of(id);
        let to_main = self.ctx.tree.relative_to_main(id).rotation;
        let main_body = self
            .ctx
            .bodies
            .get_mut(&main)
            .ok_or(CommandError::UnknownBody(main))?;
        main_body.thrust.engine += to_main * thrust.engine;
        main_body.thrust.maneuvering += to_main * thrust.maneuvering;
        main_body.thrust.rotation += to_main * thrust.rotation;
        Ok(())
    }

    /// Queue a position and velocity correction for the next tick. The deltas
    /// land on the group's main; a stabilized main receives them once with its
    /// deferred release.
    pub fn inject_correction(
        &mut self,
        id: BodyId,
        position: Vector3<f64>,
        velocity: Vector3<f64>,
    ) -> Result<(), CommandError> {
        if !self.ctx.bodies.contains_key(&id) {
            return Err(CommandError::UnknownBody(id));
        }
        let main = self.ctx.main_of(id);
        let main_body = self
            .ctx
            .bodies
            .get_mut(&main)
            .ok_or(CommandError::UnknownBody(main))?;
        main_body.thrust.correction_position += position;
        main_body.thrust.correction_velocity += velocity;
        debug!(body = %main, "Correction queued");
        Ok(())
    }

    pub fn course(&mut self, vessel: BodyId, definition: CourseDefinition) -> Result<(), CommandError> {
        if !definition.is_well_formed() {
            return Err(CommandError::InvalidCourse(definition.id));
        }
        if !self.ctx.solar_system.contains(definition.parent) {
            return Err(CommandError::UnknownCelestial(definition.parent));
        }
        let body = self
            .ctx
            .bodies
            .get(&vessel)
            .ok_or(CommandError::UnknownBody(vessel))?;
        if !body.kind.is_thrust_capable() {
            return Err(CommandError::NotThrustCapable(vessel));
        }
        let main = self.ctx.main_of(vessel);
        if let Some(body) = self.ctx.bodies.get_mut(&main) {
            debug!(body = %main, course = %definition.id, "Course engaged");
            body.course = Some(Course::new(definition));
        }
        Ok(())
    }

    pub fn destroy(&mut self, id: BodyId) -> Result<(), CommandError> {
        if !self.ctx.bodies.contains_key(&id) {
            return Err(CommandError::UnknownBody(id));
        }
        self.ctx.destruction.request(id);
        Ok(())
    }

    pub fn apply(&mut self, command: &Command) -> Result<(), CommandError> {
        match command {
            Command::Dock { a, b } => self.dock(*a, *b).map(|_| ()),
            Command::Undock { port } => self.undock(*port).map(|_| ()),
            Command::Stabilize {
                dependent,
                target,
                force,
            } => self.stabilize(*dependent, *target, *force).map(|_| ()),
            Command::Unstabilize { dependent } => self.unstabilize(*dependent).map(|_| ()),
            Command::Thrust { body, thrust } => self.thrust(*body, thrust),
            Command::Course { vessel, course } => self.course(*vessel, *course),
            Command::Destroy { body } => self.destroy(*body),
        }
    }

    /// Advance every body by `dt` and run the sequential passes
    pub fn tick(&mut self, dt: Time) {
        if !dt.is_positive() {
            warn!(dt = ?dt, "Ignoring tick with a non-positive step");
            return;
        }
        let now = self.ctx.now() + dt.as_secs();
        let outcomes = self.advance_bodies(dt, now);

        self.ctx.info.step(dt);
        for (id, outcome) in outcomes {
            for event in outcome.events {
                self.ctx.emit(event);
            }
            if let Some(release) = outcome.release {
                stabilization::detach_deferred(&mut self.ctx, id, release);
            }
        }

        stabilization::after_update(&mut self.ctx, &self.pool);
        stabilization::resolve_deferred(&mut self.ctx);
        self.ctx.sync_physics();
        destruction::run(&mut self.ctx);

        if let Err(e) = self.events.step() {
            warn!(err = %e, "Event subscribers are falling behind");
        }
    }

    /// The parallel pass. Each body only touches its own state; a body that
    /// fails or panics is logged and skipped.
    fn advance_bodies(&mut self, dt: Time, now: f64) -> Vec<(BodyId, AdvanceOutcome)> {
        let SimulationContext {
            bodies,
            solar_system,
            config,
            links,
            tree,
            ..
        } = &mut self.ctx;
        let (solar_system, config, links, tree) = (&*solar_system, &*config, &*links, &*tree);

        self.pool.install(|| {
            bodies
                .par_iter_mut()
                .filter_map(|(id, body)| {
                    let env = IntegrationEnvironment {
                        now,
                        solar_system,
                        config,
                        stabilized: links.is_stabilized(*id),
                        derived: tree.is_derived(*id),
                    };
                    let result = panic::catch_unwind(AssertUnwindSafe(|| {
                        let mut outcome = AdvanceOutcome::default();
                        body.step(dt, &env, &mut outcome).map(|_| outcome)
                    }));
                    match result {
                        Ok(Ok(outcome)) => Some((*id, outcome)),
                        Ok(Err(e)) => {
                            warn!(body = %id, err = %e, "Skipping body this tick");
                            None
                        }
                        Err(_) => {
                            error!(body = %id, "Body update panicked");
                            None
                        }
                    }
                })
                .collect()
        })
    }
}

/// Shared access to a simulation. Ticks and inbound requests take the same
/// lock, so a dock or undock never interleaves with a tick in flight.
#[derive(Clone, Debug)]
pub struct SimulationHandle(Arc<Mutex<Simulation>>);

impl SimulationHandle {
    pub fn new(sim: Simulation) -> Self {
        Self(Arc::new(Mutex::new(sim)))
    }

    pub fn tick(&self, dt: Time) {
        self.0.lock().tick(dt);
    }

    /// Run `f` with exclusive access
    pub fn with<R>(&self, f: impl FnOnce(&mut Simulation) -> R) -> R {
        f(&mut self.0.lock())
    }

    pub fn request_dock(&self, a: PortRef, b: PortRef) -> Result<BodyId, CommandError> {
        self.0.lock().dock(a, b).map_err(log_rejection)
    }

    pub fn request_undock(&self, port: PortRef) -> Result<[BodyId; 2], CommandError> {
        self.0.lock().undock(port).map_err(log_rejection)
    }

    pub fn request_stabilize(&self, dependent: BodyId, target: BodyId, force: bool) -> Result<BodyId, CommandError> {
        self.0
            .lock()
            .stabilize(dependent, target, force)
            .map_err(log_rejection)
    }

    pub fn request_unstabilize(&self, dependent: BodyId) -> Result<BodyId, CommandError> {
        self.0.lock().unstabilize(dependent).map_err(log_rejection)
    }

    pub fn request_course(&self, vessel: BodyId, definition: CourseDefinition) -> Result<(), CommandError> {
        self.0.lock().course(vessel, definition).map_err(log_rejection)
    }

    pub fn request_thrust(&self, body: BodyId, thrust: &ThrustCommand) -> Result<(), CommandError> {
        self.0.lock().thrust(body, thrust).map_err(log_rejection)
    }

    pub fn request_correction(
        &self,
        body: BodyId,
        position: Vector3<f64>,
        velocity: Vector3<f64>,
    ) -> Result<(), CommandError> {
        self.0
            .lock()
            .inject_correction(body, position, velocity)
            .map_err(log_rejection)
    }

    pub fn request_destroy(&self, body: BodyId) -> Result<(), CommandError> {
        self.0.lock().destroy(body).map_err(log_rejection)
    }
}

fn log_rejection(e: CommandError) -> CommandError {
    warn!(err = %e, "Rejected request");
    e
}
