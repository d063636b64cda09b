extern crate nalgebra as na;

pub use crate::command::{Command, CommandScript, ScriptedCommand, ThrustCommand};
pub use crate::parser::{parse_command_line, parse_script, ParseError, ParseErrorExt};
pub use dockyard_types::prelude::*;

pub mod command;
pub mod parser;

pub const TICK_TOKEN: &str = "@";
pub const COMMENT_TOKEN: &str = "#";
pub const FORCE_TOKEN: &str = "force";
