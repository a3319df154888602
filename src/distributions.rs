use rand::Rng;
use rand::rngs::SmallRng;
use rand_distr::{Beta, Distribution, Exp, Gamma};
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::utils::{ln_beta_pdf, ln_gamma};

/// Continuous prior distributions attached to parameters.
///
/// In settings files these are written as a single-key map, e.g.
/// `gamma_distribution: {shape: 2.0, scale: 0.5}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContinuousDistribution {
    GammaDistribution {
        shape: f64,
        scale: f64,
        #[serde(default)]
        offset: f64,
    },
    ExponentialDistribution {
        rate: f64,
        #[serde(default)]
        offset: f64,
    },
    UniformDistribution {
        min: f64,
        max: f64,
    },
    BetaDistribution {
        alpha: f64,
        beta: f64,
    },
}

impl ContinuousDistribution {
    pub fn gamma(shape: f64, scale: f64) -> Self {
        Self::GammaDistribution {
            shape,
            scale,
            offset: 0.0,
        }
    }

    pub fn exponential(rate: f64) -> Self {
        Self::ExponentialDistribution { rate, offset: 0.0 }
    }

    pub fn uniform(min: f64, max: f64) -> Self {
        Self::UniformDistribution { min, max }
    }

    pub fn beta(alpha: f64, beta: f64) -> Self {
        Self::BetaDistribution { alpha, beta }
    }

    pub fn validate(&self) -> Result<()> {
        let ok = match *self {
            Self::GammaDistribution { shape, scale, .. } => shape > 0.0 && scale > 0.0,
            Self::ExponentialDistribution { rate, .. } => rate > 0.0,
            Self::UniformDistribution { min, max } => min < max,
            Self::BetaDistribution { alpha, beta } => alpha > 0.0 && beta > 0.0,
        };
        if !ok {
            return Err(ModelError::config(format!("invalid distribution: {self}")));
        }
        Ok(())
    }

    pub fn ln_pdf(&self, x: f64) -> f64 {
        match *self {
            Self::GammaDistribution {
                shape,
                scale,
                offset,
            } => {
                let y = x - offset;
                if y <= 0.0 {
                    return f64::NEG_INFINITY;
                }
                (shape - 1.0) * y.ln() - y / scale - ln_gamma(shape) - shape * scale.ln()
            }
            Self::ExponentialDistribution { rate, offset } => {
                let y = x - offset;
                if y < 0.0 {
                    return f64::NEG_INFINITY;
                }
                rate.ln() - rate * y
            }
            Self::UniformDistribution { min, max } => {
                if x < min || x > max {
                    return f64::NEG_INFINITY;
                }
                -(max - min).ln()
            }
            Self::BetaDistribution { alpha, beta } => ln_beta_pdf(x, alpha, beta),
        }
    }

    pub fn mean(&self) -> f64 {
        match *self {
            Self::GammaDistribution {
                shape,
                scale,
                offset,
            } => shape * scale + offset,
            Self::ExponentialDistribution { rate, offset } => 1.0 / rate + offset,
            Self::UniformDistribution { min, max } => (min + max) / 2.0,
            Self::BetaDistribution { alpha, beta } => alpha / (alpha + beta),
        }
    }

    pub fn variance(&self) -> f64 {
        match *self {
            Self::GammaDistribution { shape, scale, .. } => shape * scale * scale,
            Self::ExponentialDistribution { rate, .. } => 1.0 / (rate * rate),
            Self::UniformDistribution { min, max } => (max - min).powi(2) / 12.0,
            Self::BetaDistribution { alpha, beta } => {
                let s = alpha + beta;
                alpha * beta / (s * s * (s + 1.0))
            }
        }
    }

    /// Lower bound of the support.
    pub fn min(&self) -> f64 {
        match *self {
            Self::GammaDistribution { offset, .. } => offset,
            Self::ExponentialDistribution { offset, .. } => offset,
            Self::UniformDistribution { min, .. } => min,
            Self::BetaDistribution { .. } => 0.0,
        }
    }

    /// Upper bound of the support.
    pub fn max(&self) -> f64 {
        match *self {
            Self::UniformDistribution { max, .. } => max,
            Self::BetaDistribution { .. } => 1.0,
            _ => f64::INFINITY,
        }
    }

    pub fn draw(&self, rng: &mut SmallRng) -> f64 {
        match *self {
            Self::GammaDistribution {
                shape,
                scale,
                offset,
            } => match Gamma::new(shape, scale) {
                Ok(g) => g.sample(rng) + offset,
                Err(_) => f64::NAN,
            },
            Self::ExponentialDistribution { rate, offset } => match Exp::new(rate) {
                Ok(e) => e.sample(rng) + offset,
                Err(_) => f64::NAN,
            },
            Self::UniformDistribution { min, max } => rng.gen_range(min..max),
            Self::BetaDistribution { alpha, beta } => match Beta::new(alpha, beta) {
                Ok(b) => b.sample(rng),
                Err(_) => f64::NAN,
            },
        }
    }
}

impl std::fmt::Display for ContinuousDistribution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::GammaDistribution {
                shape,
                scale,
                offset,
            } => {
                if offset != 0.0 {
                    write!(f, "gamma(shape = {shape}, scale = {scale}, offset = {offset})")
                } else {
                    write!(f, "gamma(shape = {shape}, scale = {scale})")
                }
            }
            Self::ExponentialDistribution { rate, offset } => {
                if offset != 0.0 {
                    write!(f, "exp(rate = {rate}, offset = {offset})")
                } else {
                    write!(f, "exp(rate = {rate})")
                }
            }
            Self::UniformDistribution { min, max } => write!(f, "uniform({min}, {max})"),
            Self::BetaDistribution { alpha, beta } => write!(f, "beta({alpha}, {beta})"),
        }
    }
}
