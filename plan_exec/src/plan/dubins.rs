//! # Dubins Curves
//!
//! Shortest paths between two oriented positions for a vehicle which can only drive forwards with
//! a bounded turning radius. Every such path is made of three primitives, each either a left arc
//! (L), a straight line (S) or a right arc (R), giving the six words LSL, LSR, RSL, RSR, RLR and
//! LRL.
//!
//! Primitive lengths are stored normalised by the turning radius, so arc primitives are angles in
//! radians.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use util::maths::mod_2pi;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Round-off allowance used when deciding whether a word is feasible and when snapping primitive
/// lengths which land just below a full turn back to zero.
const TOLERANCE: f64 = 1e-9;

/// All path words, in the order they are tested.
const WORDS: [DubinsWord; 6] = [
    DubinsWord::Lsl,
    DubinsWord::Lsr,
    DubinsWord::Rsl,
    DubinsWord::Rsr,
    DubinsWord::Rlr,
    DubinsWord::Lrl,
];

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A 2D position plus a yaw angle.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Configuration {
    pub x_m: f64,
    pub y_m: f64,
    pub yaw_rad: f64,
}

/// A single Dubins curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DubinsPath {
    /// Initial configuration
    pub start: Configuration,

    /// Normalised lengths of each of the three primitives
    pub params: [f64; 3],

    /// Turning radius
    pub rho_m: f64,

    pub word: DubinsWord,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DubinsWord {
    Lsl,
    Lsr,
    Rsl,
    Rsr,
    Rlr,
    Lrl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Primitive {
    Left,
    Straight,
    Right,
}

#[derive(Debug, thiserror::Error)]
pub enum DubinsError {
    #[error("Turning radius must be positive and finite, got {0}")]
    InvalidRadius(f64),

    #[error("Configuration contains a non-finite value")]
    NonFiniteConfiguration,

    #[error("No Dubins word connects the two configurations")]
    NoPath,

    #[error("Distance {0} m is outside the curve, which has length {1} m")]
    OutsideCurve(f64, f64),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Configuration {
    pub fn new(x_m: f64, y_m: f64, yaw_rad: f64) -> Self {
        Self { x_m, y_m, yaw_rad }
    }

    fn is_finite(&self) -> bool {
        self.x_m.is_finite() && self.y_m.is_finite() && self.yaw_rad.is_finite()
    }
}

impl DubinsWord {
    fn primitives(&self) -> [Primitive; 3] {
        use Primitive::*;
        match self {
            DubinsWord::Lsl => [Left, Straight, Left],
            DubinsWord::Lsr => [Left, Straight, Right],
            DubinsWord::Rsl => [Right, Straight, Left],
            DubinsWord::Rsr => [Right, Straight, Right],
            DubinsWord::Rlr => [Right, Left, Right],
            DubinsWord::Lrl => [Left, Right, Left],
        }
    }

    /// Compute the normalised primitive lengths of this word, or `None` if the word cannot connect
    /// the two configurations.
    fn solve(&self, ir: &Intermediate) -> Option<[f64; 3]> {
        let Intermediate {
            alpha,
            beta,
            d,
            sa,
            sb,
            ca,
            cb,
            c_ab,
            d_sq,
        } = *ir;

        match self {
            DubinsWord::Lsl => {
                let tmp0 = d + sa - sb;
                let p_sq = 2.0 + d_sq - 2.0 * c_ab + 2.0 * d * (sa - sb);
                if p_sq < -TOLERANCE {
                    return None;
                }
                let tmp1 = (cb - ca).atan2(tmp0);
                Some([mod_2pi(tmp1 - alpha), p_sq.max(0.0).sqrt(), mod_2pi(beta - tmp1)])
            }
            DubinsWord::Rsr => {
                let tmp0 = d - sa + sb;
                let p_sq = 2.0 + d_sq - 2.0 * c_ab + 2.0 * d * (sb - sa);
                if p_sq < -TOLERANCE {
                    return None;
                }
                let tmp1 = (ca - cb).atan2(tmp0);
                Some([mod_2pi(alpha - tmp1), p_sq.max(0.0).sqrt(), mod_2pi(tmp1 - beta)])
            }
            DubinsWord::Lsr => {
                let p_sq = -2.0 + d_sq + 2.0 * c_ab + 2.0 * d * (sa + sb);
                if p_sq < -TOLERANCE {
                    return None;
                }
                let p = p_sq.max(0.0).sqrt();
                let tmp0 = (-ca - cb).atan2(d + sa + sb) - (-2.0f64).atan2(p);
                Some([mod_2pi(tmp0 - alpha), p, mod_2pi(tmp0 - mod_2pi(beta))])
            }
            DubinsWord::Rsl => {
                let p_sq = -2.0 + d_sq + 2.0 * c_ab - 2.0 * d * (sa + sb);
                if p_sq < -TOLERANCE {
                    return None;
                }
                let p = p_sq.max(0.0).sqrt();
                let tmp0 = (ca + cb).atan2(d - sa - sb) - 2.0f64.atan2(p);
                Some([mod_2pi(alpha - tmp0), p, mod_2pi(beta - tmp0)])
            }
            DubinsWord::Rlr => {
                let tmp0 = (6.0 - d_sq + 2.0 * c_ab + 2.0 * d * (sa - sb)) / 8.0;
                if tmp0.abs() > 1.0 + TOLERANCE {
                    return None;
                }
                let tmp0 = tmp0.clamp(-1.0, 1.0);
                let phi = (ca - cb).atan2(d - sa + sb);
                let p = mod_2pi(std::f64::consts::TAU - tmp0.acos());
                let t = mod_2pi(alpha - phi + mod_2pi(p / 2.0));
                Some([t, p, mod_2pi(alpha - beta - t + mod_2pi(p))])
            }
            DubinsWord::Lrl => {
                let tmp0 = (6.0 - d_sq + 2.0 * c_ab + 2.0 * d * (sb - sa)) / 8.0;
                if tmp0.abs() > 1.0 + TOLERANCE {
                    return None;
                }
                let tmp0 = tmp0.clamp(-1.0, 1.0);
                let phi = (ca - cb).atan2(d + sa - sb);
                let p = mod_2pi(std::f64::consts::TAU - tmp0.acos());
                let t = mod_2pi(-alpha - phi + p / 2.0);
                Some([t, p, mod_2pi(mod_2pi(beta) - alpha - t + mod_2pi(p))])
            }
        }
    }
}

/// Values shared by all words, computed in the frame where the start is at the origin and the
/// goal lies on the +ve x axis, scaled so the turning radius is one.
#[derive(Clone, Copy)]
struct Intermediate {
    alpha: f64,
    beta: f64,
    d: f64,
    sa: f64,
    sb: f64,
    ca: f64,
    cb: f64,
    c_ab: f64,
    d_sq: f64,
}

impl Intermediate {
    fn new(q0: &Configuration, q1: &Configuration, rho_m: f64) -> Self {
        let dx = q1.x_m - q0.x_m;
        let dy = q1.y_m - q0.y_m;
        let d = (dx * dx + dy * dy).sqrt() / rho_m;

        // Heading of the line between the two points is only defined when they're apart
        let theta = if d > 0.0 { mod_2pi(dy.atan2(dx)) } else { 0.0 };
        let alpha = mod_2pi(q0.yaw_rad - theta);
        let beta = mod_2pi(q1.yaw_rad - theta);

        Self {
            alpha,
            beta,
            d,
            sa: alpha.sin(),
            sb: beta.sin(),
            ca: alpha.cos(),
            cb: beta.cos(),
            c_ab: (alpha - beta).cos(),
            d_sq: d * d,
        }
    }
}

impl DubinsPath {
    /// Find the shortest Dubins path between the two configurations.
    pub fn shortest(
        q0: Configuration,
        q1: Configuration,
        rho_m: f64,
    ) -> Result<Self, DubinsError> {
        if !(rho_m > 0.0 && rho_m.is_finite()) {
            return Err(DubinsError::InvalidRadius(rho_m));
        }
        if !q0.is_finite() || !q1.is_finite() {
            return Err(DubinsError::NonFiniteConfiguration);
        }

        let ir = Intermediate::new(&q0, &q1, rho_m);

        let mut best: Option<(DubinsWord, [f64; 3], f64)> = None;
        for word in WORDS.iter() {
            if let Some(params) = word.solve(&ir) {
                let params = [snap(params[0]), snap(params[1]), snap(params[2])];
                let cost = params.iter().sum::<f64>();
                if best.map_or(true, |(_, _, c)| cost < c) {
                    best = Some((*word, params, cost));
                }
            }
        }

        match best {
            Some((word, params, _)) => Ok(Self {
                start: q0,
                params,
                rho_m,
                word,
            }),
            None => Err(DubinsError::NoPath),
        }
    }

    /// Total length of the curve in meters.
    pub fn length_m(&self) -> f64 {
        self.params.iter().sum::<f64>() * self.rho_m
    }

    /// Returns true if the curve contains no turning, i.e. is a single straight line.
    pub fn is_straight(&self) -> bool {
        self.params[0].abs() < 1e-9 && self.params[2].abs() < 1e-9
    }

    /// Sample the configuration at the given distance along the curve.
    pub fn sample(&self, dist_m: f64) -> Result<Configuration, DubinsError> {
        let length_m = self.length_m();

        // Allow a little slack at the end of the curve for round-off in callers' arithmetic
        if !(0.0..=length_m + 1e-9).contains(&dist_m) {
            return Err(DubinsError::OutsideCurve(dist_m, length_m));
        }

        let t_prime = dist_m.min(length_m) / self.rho_m;
        let primitives = self.word.primitives();

        // Work in the normalised frame centred on the start position
        let qi = Configuration::new(0.0, 0.0, self.start.yaw_rad);
        let [p1, p2, _] = self.params;
        let q1 = step(p1, &qi, primitives[0]);
        let q2 = step(p2, &q1, primitives[1]);

        let q = if t_prime < p1 {
            step(t_prime, &qi, primitives[0])
        } else if t_prime < p1 + p2 {
            step(t_prime - p1, &q1, primitives[1])
        } else {
            step(t_prime - p1 - p2, &q2, primitives[2])
        };

        Ok(Configuration {
            x_m: q.x_m * self.rho_m + self.start.x_m,
            y_m: q.y_m * self.rho_m + self.start.y_m,
            yaw_rad: mod_2pi(q.yaw_rad),
        })
    }

    /// The configuration at the end of the curve.
    pub fn end(&self) -> Configuration {
        // Sampling at the curve's own length is always in bounds
        self.sample(self.length_m()).unwrap_or(self.start)
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Turn primitive lengths a hair under a full turn into zero. These come from angle wrapping of
/// values which should have been exactly zero.
fn snap(param: f64) -> f64 {
    if std::f64::consts::TAU - param < TOLERANCE {
        0.0
    } else {
        param
    }
}

/// Advance a normalised configuration along a single primitive by the normalised distance `t`.
fn step(t: f64, qi: &Configuration, primitive: Primitive) -> Configuration {
    let st = qi.yaw_rad.sin();
    let ct = qi.yaw_rad.cos();

    let (dx, dy, dyaw) = match primitive {
        Primitive::Left => ((qi.yaw_rad + t).sin() - st, -(qi.yaw_rad + t).cos() + ct, t),
        Primitive::Right => (-(qi.yaw_rad - t).sin() + st, (qi.yaw_rad - t).cos() - ct, -t),
        Primitive::Straight => (ct * t, st * t, 0.0),
    };

    Configuration {
        x_m: qi.x_m + dx,
        y_m: qi.y_m + dy,
        yaw_rad: qi.yaw_rad + dyaw,
    }
}
