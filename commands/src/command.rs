use dockyard_types::prelude::*;

type Vector3 = na::Vector3<f64>;

/// A request arriving at the inbound command boundary
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Dock {
        a: PortRef,
        b: PortRef,
    },
    Undock {
        port: PortRef,
    },
    Stabilize {
        dependent: BodyId,
        target: BodyId,
        force: bool,
    },
    Unstabilize {
        dependent: BodyId,
    },
    Thrust {
        body: BodyId,
        thrust: ThrustCommand,
    },
    Course {
        vessel: BodyId,
        course: CourseDefinition,
    },
    Destroy {
        body: BodyId,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Dock { .. } => "dock",
            Command::Undock { .. } => "undock",
            Command::Stabilize { .. } => "stabilize",
            Command::Unstabilize { .. } => "unstabilize",
            Command::Thrust { .. } => "thrust",
            Command::Course { .. } => "course",
            Command::Destroy { .. } => "destroy",
        }
    }
}

/// Accelerations requested for the next tick, all in the body's local frame
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ThrustCommand {
    /// Main engine [m/s^2]
    pub engine: Vector3,
    /// Maneuvering thrusters [m/s^2]
    pub maneuvering: Vector3,
    /// Angular acceleration [rad/s^2]
    pub rotation: Vector3,
}

impl Default for ThrustCommand {
    fn default() -> Self {
        Self {
            engine: Vector3::zeros(),
            maneuvering: Vector3::zeros(),
            rotation: Vector3::zeros(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScriptedCommand {
    pub tick: u64,
    pub command: Command,
}

/// Commands ordered by the tick they are due at. Commands sharing a tick keep
/// their script order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CommandScript {
    commands: Vec<ScriptedCommand>,
}

impl CommandScript {
    pub fn new(mut commands: Vec<ScriptedCommand>) -> Self {
        commands.sort_by_key(|c| c.tick);
        Self { commands }
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn last_tick(&self) -> Option<u64> {
        self.commands.last().map(|c| c.tick)
    }

    pub fn due(&self, tick: u64) -> impl Iterator<Item = &Command> {
        let start = self.commands.partition_point(|c| c.tick < tick);
        self.commands[start..]
            .iter()
            .take_while(move |c| c.tick == tick)
            .map(|c| &c.command)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScriptedCommand> {
        self.commands.iter()
    }
}
