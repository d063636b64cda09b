pub extern crate nalgebra as na;

pub mod body;
pub mod channel;
pub mod composition;
pub mod destruction;
pub mod docking;
pub mod event;
pub mod integrator;
pub mod orbit;
pub mod physics;
pub mod riders;
pub mod scenario;
pub mod sim_info;
pub mod simulation;
pub mod solar_system;
pub mod stabilization;
pub mod sync;
pub mod units;

pub trait SimulationComponent<'a> {
    /// State written by the component during a step and consumed by the coordinator afterwards.
    type SharedState;

    /// The type for the environment structure that is scoped to this component.
    type Environment;

    type Error;

    fn init(
        &mut self,
        _env: &'a Self::Environment,
        _shared_state: &mut Self::SharedState,
    ) -> Result<(), Self::Error> {
        Ok(())
    }

    fn step(
        &mut self,
        dt: units::Time,
        env: &'a Self::Environment,
        shared_state: &mut Self::SharedState,
    ) -> Result<(), Self::Error>;
}
