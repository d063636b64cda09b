//! Two-body Keplerian propagation.

use dockyard_types::prelude::*;
use std::f64::consts::{PI, TAU};

use super::{OrbitModel, OrbitSnapshot, ParentFrame};

type Vector3 = na::Vector3<f64>;
type Matrix3 = na::Matrix3<f64>;

/// Eccentricity and inclination below this are treated as zero
const TOL: f64 = 1e-8;

/// |1 - e| below this is treated as parabolic, which the model does not handle
const PARABOLIC_TOL: f64 = 1e-9;

const KEPLER_MAX_ITER: usize = 50;
const KEPLER_TOL: f64 = 1e-12;

/// A two-body orbit around a [`ParentFrame`].
///
/// A parent without gravity (`mu <= 0`) gives straight-line drift, which is a
/// valid configuration. Radial, parabolic and sub-surface states are degenerate:
/// the orbit reports itself invalid and extrapolates linearly until reseeded.
#[derive(Clone, Debug)]
pub struct KeplerOrbit {
    parent: ParentFrame,
    time: f64,
    position: Vector3,
    velocity: Vector3,
    seed: Seed,
}

#[derive(Copy, Clone, Debug)]
enum Seed {
    Conic {
        elements: OrbitalElements,
        mu: f64,
        epoch: f64,
        mean_anomaly: f64,
        mean_motion: f64,
    },
    Linear {
        position: Vector3,
        velocity: Vector3,
        epoch: f64,
        valid: bool,
    },
}

impl Seed {
    fn from_state(parent: &ParentFrame, position: Vector3, velocity: Vector3, time: f64) -> Self {
        let linear = |valid| Seed::Linear {
            position,
            velocity,
            epoch: time,
            valid,
        };

        if parent.mu <= 0.0 {
            return linear(true);
        }
        if position.norm() < parent.radius {
            return linear(false);
        }

        match elements_from_state(parent.mu, &position, &velocity) {
            Some(elements) => {
                let (mean_anomaly, mean_motion) = mean_anomaly(parent.mu, &elements);
                Seed::Conic {
                    elements,
                    mu: parent.mu,
                    epoch: time,
                    mean_anomaly,
                    mean_motion,
                }
            }
            None => linear(false),
        }
    }

    fn evaluate(&self, time: f64) -> (Vector3, Vector3) {
        match *self {
            Seed::Conic {
                elements,
                mu,
                epoch,
                mean_anomaly,
                mean_motion,
            } => {
                let m = mean_anomaly + mean_motion * (time - epoch);
                let elements = OrbitalElements {
                    true_anomaly: true_anomaly_from_mean(m, elements.eccentricity),
                    ..elements
                };
                state_from_elements(mu, &elements)
            }
            Seed::Linear {
                position,
                velocity,
                epoch,
                ..
            } => (position + velocity * (time - epoch), velocity),
        }
    }
}

impl KeplerOrbit {
    pub fn new(parent: ParentFrame) -> Self {
        Self {
            parent,
            time: 0.0,
            position: Vector3::zeros(),
            velocity: Vector3::zeros(),
            seed: Seed::Linear {
                position: Vector3::zeros(),
                velocity: Vector3::zeros(),
                epoch: 0.0,
                valid: true,
            },
        }
    }

    pub fn from_elements(parent: ParentFrame, elements: &OrbitalElements, epoch: f64) -> Self {
        let mut orbit = Self::new(parent);
        orbit.init_from_elements(&parent, elements, epoch);
        orbit
    }

    pub fn from_state(parent: ParentFrame, position: Vector3, velocity: Vector3, time: f64) -> Self {
        let mut orbit = Self::new(parent);
        orbit.init_from_state_vectors(&parent, position, velocity, time, true);
        orbit
    }

    /// Orbital period [s], None for open or degenerate orbits
    pub fn period(&self) -> Option<f64> {
        match self.seed {
            Seed::Conic {
                elements,
                mean_motion,
                ..
            } if elements.eccentricity < 1.0 => Some(TAU / mean_motion),
            _ => None,
        }
    }
}

impl OrbitModel for KeplerOrbit {
    fn init_from_elements(&mut self, parent: &ParentFrame, elements: &OrbitalElements, epoch: f64) {
        self.parent = *parent;
        self.time = epoch;
        if parent.mu > 0.0 {
            let (position, velocity) = state_from_elements(parent.mu, elements);
            self.position = position;
            self.velocity = velocity;
        } else {
            self.position = Vector3::x() * elements.semi_major_axis;
            self.velocity = Vector3::zeros();
        }
        self.reseed();
    }

    fn init_from_state_vectors(
        &mut self,
        parent: &ParentFrame,
        position: Vector3,
        velocity: Vector3,
        time: f64,
        relative: bool,
    ) {
        self.parent = *parent;
        self.time = time;
        if relative {
            self.position = position;
            self.velocity = velocity;
        } else {
            self.position = position - parent.position;
            self.velocity = velocity - parent.velocity;
        }
        self.reseed();
    }

    fn advance(&mut self, time: f64) {
        let (position, velocity) = self.seed.evaluate(time);
        self.position = position;
        self.velocity = velocity;
        self.time = time;
    }

    fn change_parent(&mut self, new_parent: &ParentFrame) {
        let abs_position = self.parent.position + self.position;
        let abs_velocity = self.parent.velocity + self.velocity;
        self.parent = *new_parent;
        self.position = abs_position - new_parent.position;
        self.velocity = abs_velocity - new_parent.velocity;
        self.reseed();
    }

    fn refresh_parent(&mut self, parent: &ParentFrame) {
        self.parent = *parent;
    }

    fn relative_position(&self) -> Vector3 {
        self.position
    }

    fn relative_position_mut(&mut self) -> &mut Vector3 {
        &mut self.position
    }

    fn relative_velocity(&self) -> Vector3 {
        self.velocity
    }

    fn relative_velocity_mut(&mut self) -> &mut Vector3 {
        &mut self.velocity
    }

    fn reseed(&mut self) {
        self.seed = Seed::from_state(&self.parent, self.position, self.velocity, self.time);
    }

    fn is_valid(&self) -> bool {
        match self.seed {
            Seed::Conic { .. } => true,
            Seed::Linear { valid, .. } => valid,
        }
    }

    fn fill_external_representation(&self) -> Option<OrbitSnapshot> {
        match self.seed {
            Seed::Conic { mu, .. } => {
                elements_from_state(mu, &self.position, &self.velocity).map(|elements| {
                    OrbitSnapshot {
                        parent: self.parent.id,
                        epoch: self.time,
                        elements,
                    }
                })
            }
            Seed::Linear { .. } => None,
        }
    }

    fn parent_frame(&self) -> &ParentFrame {
        &self.parent
    }

    fn time(&self) -> f64 {
        self.time
    }

    fn boxed_clone(&self) -> Box<dyn OrbitModel> {
        Box::new(self.clone())
    }
}

/// Position and velocity of `elements` propagated by `dt` seconds
pub fn state_at(mu: f64, elements: &OrbitalElements, dt: f64) -> (Vector3, Vector3) {
    if mu <= 0.0 {
        return (Vector3::x() * elements.semi_major_axis, Vector3::zeros());
    }
    let (m0, n) = mean_anomaly(mu, elements);
    let elements = OrbitalElements {
        true_anomaly: true_anomaly_from_mean(m0 + n * dt, elements.eccentricity),
        ..*elements
    };
    state_from_elements(mu, &elements)
}

/// Position and velocity in the parent-centered inertial frame at the
/// elements' true anomaly
pub fn state_from_elements(mu: f64, elements: &OrbitalElements) -> (Vector3, Vector3) {
    let (rv, vv) = sv_pqw(mu, elements);
    let mat = pqw_ijk_matrix(elements);
    (mat * rv, mat * vv)
}

fn sv_pqw(mu: f64, el: &OrbitalElements) -> (Vector3, Vector3) {
    let p = el.semi_latus_rectum();
    let ta = el.true_anomaly;
    let r = p / (1.0 + el.eccentricity * ta.cos());
    let rv = Vector3::new(r * ta.cos(), r * ta.sin(), 0.0);
    let vv = (mu / p).sqrt() * Vector3::new(-ta.sin(), el.eccentricity + ta.cos(), 0.0);
    (rv, vv)
}

fn pqw_ijk_matrix(el: &OrbitalElements) -> Matrix3 {
    let (sl, cl) = el.lon_asc_node.sin_cos();
    let (sw, cw) = el.arg_periapsis.sin_cos();
    let (si, ci) = el.inclination.sin_cos();

    Matrix3::new(
        cl * cw - sl * sw * ci,
        -cl * sw - sl * cw * ci,
        sl * si,
        sl * cw + cl * sw * ci,
        -sl * sw + cl * cw * ci,
        -cl * si,
        sw * si,
        cw * si,
        ci,
    )
}

/// Classical elements from a relative state. None for radial or parabolic
/// trajectories.
pub fn elements_from_state(mu: f64, rv: &Vector3, vv: &Vector3) -> Option<OrbitalElements> {
    let r = rv.norm();
    let v = vv.norm();
    let hv = rv.cross(vv);
    let h = hv.norm();
    if !(r.is_finite() && v.is_finite()) || r == 0.0 || h <= TOL * r * v.max(1.0) {
        return None;
    }

    let ev = ((v * v - mu / r) * rv - rv.dot(vv) * vv) / mu;
    let e = ev.norm();
    if (e - 1.0).abs() < PARABOLIC_TOL {
        return None;
    }

    let energy = v * v / 2.0 - mu / r;
    let semi_major_axis = -mu / (2.0 * energy);
    let inclination = (hv.z / h).clamp(-1.0, 1.0).acos();

    let nv = Vector3::z().cross(&hv);
    let equatorial = nv.norm() < TOL * h;
    let circular = e < TOL;

    let (lon_asc_node, node) = if equatorial {
        (0.0, Vector3::x())
    } else {
        (nv.y.atan2(nv.x), nv.normalize())
    };

    // In-plane angle from the node line, measured about the angular momentum
    let from_node = |w: &Vector3| (hv.dot(&node.cross(w)) / h).atan2(node.dot(w));

    let latitude = from_node(rv);
    let (arg_periapsis, true_anomaly) = if circular {
        (0.0, latitude)
    } else {
        let argpe = from_node(&ev);
        (argpe, latitude - argpe)
    };

    Some(OrbitalElements {
        semi_major_axis,
        eccentricity: if circular { 0.0 } else { e },
        inclination,
        arg_periapsis: arg_periapsis.rem_euclid(TAU),
        lon_asc_node: lon_asc_node.rem_euclid(TAU),
        true_anomaly: true_anomaly.rem_euclid(TAU),
    })
}

/// Mean anomaly at the elements' true anomaly and the mean motion
fn mean_anomaly(mu: f64, el: &OrbitalElements) -> (f64, f64) {
    let e = el.eccentricity;
    let ta = el.true_anomaly;
    if e < 1.0 {
        let ea = 2.0 * ((1.0 - e).sqrt() * (ta / 2.0).sin()).atan2((1.0 + e).sqrt() * (ta / 2.0).cos());
        let n = (mu / el.semi_major_axis.powi(3)).sqrt();
        (ea - e * ea.sin(), n)
    } else {
        let ha = 2.0 * (((e - 1.0) / (e + 1.0)).sqrt() * (ta / 2.0).tan()).atanh();
        let n = (mu / (-el.semi_major_axis).powi(3)).sqrt();
        (e * ha.sinh() - ha, n)
    }
}

fn true_anomaly_from_mean(m: f64, e: f64) -> f64 {
    if e < 1.0 {
        let m = m.rem_euclid(TAU);
        let mut ea = if e < 0.8 { m } else { PI };
        for _ in 0..KEPLER_MAX_ITER {
            let delta = (ea - e * ea.sin() - m) / (1.0 - e * ea.cos());
            ea -= delta;
            if delta.abs() < KEPLER_TOL {
                break;
            }
        }
        2.0 * ((1.0 + e).sqrt() * (ea / 2.0).sin()).atan2((1.0 - e).sqrt() * (ea / 2.0).cos())
    } else {
        let mut ha = (m / e).asinh();
        for _ in 0..KEPLER_MAX_ITER {
            let delta = (e * ha.sinh() - ha - m) / (e * ha.cosh() - 1.0);
            ha -= delta;
            if delta.abs() < KEPLER_TOL {
                break;
            }
        }
        2.0 * (((e + 1.0) / (e - 1.0)).sqrt() * (ha / 2.0).tanh()).atan()
    }
}
