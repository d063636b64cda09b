//! A small line-oriented parser for inbound command scripts.
//!
//! Each non-blank line is `@<tick> <command> <args...>`, optionally followed by a
//! `#` comment. Whole-line comments and blank lines are skipped.

use crate::{
    command::{Command, CommandScript, ScriptedCommand, ThrustCommand},
    COMMENT_TOKEN, FORCE_TOKEN, TICK_TOKEN,
};
use dockyard_types::prelude::*;
use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{alpha1, line_ending, not_line_ending, space0, space1, u32, u64},
    combinator::{eof, map, opt, value},
    error::ErrorKind,
    multi::fold_many0,
    number::complete::double,
    sequence::{preceded, separated_pair},
    Err::{Error, Failure},
};
use tracing::debug;

pub type Result<I, O, E = ParseError<I>> = std::result::Result<(I, O), nom::Err<E>>;

type Vector3 = na::Vector3<f64>;

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ParseError<I> {
    #[error("Missing '@<tick>' prefix")]
    MissingTick,
    #[error("Unknown command '{0}'")]
    UnknownCommand(String),
    #[error("Course window must end after it starts")]
    InvalidCourse,
    #[error("Unparsed trailing input")]
    Trailing(I),
    #[error("Parse error")]
    Nom(I, ErrorKind),
}

pub trait ParseErrorExt {
    fn is_failure(&self) -> bool;
}

impl<I> ParseErrorExt for nom::Err<ParseError<I>> {
    fn is_failure(&self) -> bool {
        matches!(
            self,
            nom::Err::Error(ParseError::Trailing(_)) | nom::Err::Failure(_)
        )
    }
}

pub fn parse_script(script: &str) -> Result<&str, CommandScript> {
    let (s, commands) = fold_many0(
        script_line,
        Vec::new,
        |mut commands: Vec<ScriptedCommand>, line| {
            if let Some(cmd) = line {
                commands.push(cmd);
            }
            commands
        },
    )(script)?;

    if !s.is_empty() {
        return Err(Failure(ParseError::Trailing(s)));
    }

    debug!(commands = commands.len(), "Parsed command script");
    Ok((s, CommandScript::new(commands)))
}

fn script_line(s: &str) -> Result<&str, Option<ScriptedCommand>> {
    alt((
        value(None, blank_line),
        map(command_line_terminated, Some),
    ))(s)
}

fn blank_line(s: &str) -> Result<&str, ()> {
    let (s, _) = space0(s)?;
    let (s, _) = opt(comment)(s)?;
    let (s, _) = line_ending(s)?;
    Ok((s, ()))
}

fn command_line_terminated(s: &str) -> Result<&str, ScriptedCommand> {
    let (s, cmd) = parse_command_line(s)?;
    let (s, _) = alt((line_ending, eof))(s)?;
    Ok((s, cmd))
}

/// Parse a single `@<tick> <command>` line, without its line ending
pub fn parse_command_line(s: &str) -> Result<&str, ScriptedCommand> {
    let (s, _) = space0(s)?;
    let (s, tick) = tick(s)?;
    let (s, _) = space1(s)?;
    let (s, command) = command(s)?;
    let (s, _) = space0(s)?;
    let (s, _) = opt(comment)(s)?;
    Ok((s, ScriptedCommand { tick, command }))
}

fn comment(s: &str) -> Result<&str, &str> {
    preceded(tag(COMMENT_TOKEN), not_line_ending)(s)
}

fn tick(s: &str) -> Result<&str, u64> {
    let (s, _) = tag(TICK_TOKEN)(s).map_err(|_: nom::Err<ParseError<&str>>| {
        Error(ParseError::MissingTick)
    })?;
    u64(s)
}

fn command(s: &str) -> Result<&str, Command> {
    let res = alt((
        dock,
        undock,
        unstabilize,
        stabilize,
        thrust,
        course,
        destroy,
    ))(s);

    match res {
        Err(Error(_)) => {
            let (_, word) = alpha1(s)?;
            Err(Failure(ParseError::UnknownCommand(word.to_string())))
        }
        other => other,
    }
}

fn dock(s: &str) -> Result<&str, Command> {
    let (s, _) = tag("dock")(s)?;
    let (s, _) = space1(s)?;
    let (s, (a, b)) = separated_pair(port_ref, space1, port_ref)(s)?;
    Ok((s, Command::Dock { a, b }))
}

fn undock(s: &str) -> Result<&str, Command> {
    let (s, _) = tag("undock")(s)?;
    let (s, _) = space1(s)?;
    let (s, port) = port_ref(s)?;
    Ok((s, Command::Undock { port }))
}

fn stabilize(s: &str) -> Result<&str, Command> {
    let (s, _) = tag("stabilize")(s)?;
    let (s, _) = space1(s)?;
    let (s, dependent) = body_id(s)?;
    let (s, _) = space1(s)?;
    let (s, target) = body_id(s)?;
    let (s, force) = opt(preceded(space1, tag(FORCE_TOKEN)))(s)?;
    Ok((
        s,
        Command::Stabilize {
            dependent,
            target,
            force: force.is_some(),
        },
    ))
}

fn unstabilize(s: &str) -> Result<&str, Command> {
    let (s, _) = tag("unstabilize")(s)?;
    let (s, _) = space1(s)?;
    let (s, dependent) = body_id(s)?;
    Ok((s, Command::Unstabilize { dependent }))
}

fn thrust(s: &str) -> Result<&str, Command> {
    let (s, _) = tag("thrust")(s)?;
    let (s, _) = space1(s)?;
    let (s, body) = body_id(s)?;
    let (s, _) = space1(s)?;
    let (s, engine) = v3(s)?;
    let (s, maneuvering) = opt(preceded(preceded(space1, tag("rcs")), preceded(space1, v3)))(s)?;
    let (s, rotation) = opt(preceded(preceded(space1, tag("rot")), preceded(space1, v3)))(s)?;
    Ok((
        s,
        Command::Thrust {
            body,
            thrust: ThrustCommand {
                engine,
                maneuvering: maneuvering.unwrap_or_else(Vector3::zeros),
                rotation: rotation.unwrap_or_else(Vector3::zeros),
            },
        },
    ))
}

fn course(s: &str) -> Result<&str, Command> {
    let (s, _) = tag("course")(s)?;
    let (s, _) = space1(s)?;
    let (s, vessel) = body_id(s)?;
    let (s, _) = space1(s)?;
    let (s, id) = u64(s)?;
    let (s, _) = space1(s)?;
    let (s, start_time) = double(s)?;
    let (s, _) = space1(s)?;
    let (s, end_time) = double(s)?;
    let (s, _) = space1(s)?;
    let (s, parent) = u64(s)?;
    let (s, _) = space1(s)?;
    let (s, target) = elements(s)?;

    let course = CourseDefinition {
        id: CourseId(id),
        start_time,
        end_time,
        parent: CelestialId(parent),
        target,
    };
    if !course.is_well_formed() {
        return Err(Failure(ParseError::InvalidCourse));
    }

    Ok((s, Command::Course { vessel, course }))
}

fn destroy(s: &str) -> Result<&str, Command> {
    let (s, _) = tag("destroy")(s)?;
    let (s, _) = space1(s)?;
    let (s, body) = body_id(s)?;
    Ok((s, Command::Destroy { body }))
}

fn body_id(s: &str) -> Result<&str, BodyId> {
    let (s, id) = u64(s)?;
    Ok((s, BodyId(id)))
}

fn port_ref(s: &str) -> Result<&str, PortRef> {
    let (s, (vessel, port)) = separated_pair(u64, tag(":"), u32)(s)?;
    Ok((s, PortRef::new(BodyId(vessel), PortId(port))))
}

fn v3(s: &str) -> Result<&str, Vector3> {
    let (s, v0) = double(s)?;
    let (s, _) = space1(s)?;
    let (s, v1) = double(s)?;
    let (s, _) = space1(s)?;
    let (s, v2) = double(s)?;
    Ok((s, Vector3::new(v0, v1, v2)))
}

/// semi-major-axis eccentricity inclination arg-periapsis lon-asc-node true-anomaly
fn elements(s: &str) -> Result<&str, OrbitalElements> {
    let (s, semi_major_axis) = double(s)?;
    let (s, _) = space1(s)?;
    let (s, eccentricity) = double(s)?;
    let (s, _) = space1(s)?;
    let (s, inclination) = double(s)?;
    let (s, _) = space1(s)?;
    let (s, arg_periapsis) = double(s)?;
    let (s, _) = space1(s)?;
    let (s, lon_asc_node) = double(s)?;
    let (s, _) = space1(s)?;
    let (s, true_anomaly) = double(s)?;
    Ok((
        s,
        OrbitalElements {
            semi_major_axis,
            eccentricity,
            inclination,
            arg_periapsis,
            lon_asc_node,
            true_anomaly,
        },
    ))
}

impl<I> nom::error::ParseError<I> for ParseError<I> {
    fn from_error_kind(s: I, kind: ErrorKind) -> Self {
        ParseError::Nom(s, kind)
    }

    fn append(_: I, _: ErrorKind, other: Self) -> Self {
        other
    }
}
