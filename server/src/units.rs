//! Thin unit wrappers for the quantities that cross module boundaries.

use serde::Serialize;
use std::{
    iter::Sum,
    ops::{Add, AddAssign, Div, Mul, Sub},
};

#[derive(Copy, Clone, PartialEq, PartialOrd, Default, Serialize)]
pub struct Time {
    seconds: f64,
}

impl std::fmt::Debug for Time {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} s", self.seconds)
    }
}

impl Time {
    pub fn from_secs(seconds: f64) -> Time {
        Time { seconds }
    }

    pub fn from_millis(millis: f64) -> Time {
        Time {
            seconds: millis / 1000.0,
        }
    }

    pub fn from_minutes(minutes: f64) -> Time {
        Self::from_secs(minutes * 60.0)
    }

    pub fn as_secs(&self) -> f64 {
        self.seconds
    }

    pub fn is_positive(&self) -> bool {
        self.seconds > 0.0
    }
}

impl Add<Time> for Time {
    type Output = Time;

    fn add(self, rhs: Time) -> Self::Output {
        Time::from_secs(self.seconds + rhs.seconds)
    }
}

impl AddAssign<Time> for Time {
    fn add_assign(&mut self, rhs: Time) {
        self.seconds += rhs.seconds;
    }
}

impl Sub<Time> for Time {
    type Output = Time;

    fn sub(self, rhs: Time) -> Self::Output {
        Time::from_secs(self.seconds - rhs.seconds)
    }
}

impl Mul<f64> for Time {
    type Output = Time;

    fn mul(self, rhs: f64) -> Self::Output {
        Time::from_secs(self.seconds * rhs)
    }
}

impl Div<Time> for Time {
    type Output = f64;

    fn div(self, rhs: Time) -> Self::Output {
        self.seconds / rhs.seconds
    }
}

#[derive(Copy, Clone, PartialEq, PartialOrd, Default, Serialize)]
pub struct Mass {
    kilograms: f64,
}

impl std::fmt::Debug for Mass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} kg", self.kilograms)
    }
}

impl Mass {
    pub fn from_kilograms(kilograms: f64) -> Mass {
        Mass { kilograms }
    }

    pub fn from_tonnes(tonnes: f64) -> Mass {
        Mass {
            kilograms: tonnes * 1000.0,
        }
    }

    pub fn as_kilograms(&self) -> f64 {
        self.kilograms
    }
}

impl Add<Mass> for Mass {
    type Output = Mass;

    fn add(self, rhs: Mass) -> Self::Output {
        Mass::from_kilograms(self.kilograms + rhs.kilograms)
    }
}

impl Div<Mass> for Mass {
    type Output = f64;

    fn div(self, rhs: Mass) -> Self::Output {
        self.kilograms / rhs.kilograms
    }
}

impl Sum for Mass {
    fn sum<I: Iterator<Item = Mass>>(iter: I) -> Self {
        iter.fold(Mass::default(), |acc, m| acc + m)
    }
}
