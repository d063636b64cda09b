extern crate nalgebra as na;

pub mod celestial;
pub mod course;
pub mod ids;
pub mod orbit;
pub mod prelude;
