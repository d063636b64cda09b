use crate::units::Time;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct SimulationInfo {
    /// Number of completed ticks
    pub tick: u64,
    /// Simulation time at the end of the last tick
    pub sim_time: Time,
    pub real_time_start: Instant,
    pub real_time: Duration,
}

impl Default for SimulationInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulationInfo {
    pub fn new() -> Self {
        SimulationInfo {
            tick: 0,
            sim_time: Time::from_secs(0.0),
            real_time_start: Instant::now(),
            real_time: Duration::ZERO,
        }
    }

    pub fn step(&mut self, dt: Time) {
        self.tick += 1;
        self.sim_time += dt;
        self.real_time = Instant::now().duration_since(self.real_time_start);
    }

    pub fn now(&self) -> f64 {
        self.sim_time.as_secs()
    }
}
