use rand::rngs::SmallRng;

use crate::random::{uniform, uniform_range};

/// Target acceptance rate of the Robbins-Monro tuning.
pub const TARGET_ACCEPTANCE: f64 = 0.44;

/// Multiplicative proposal `x · exp(λ(2u - 1))`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleKernel {
    pub scale: f64,
}

impl ScaleKernel {
    pub fn new(scale: f64) -> Self {
        Self { scale }
    }

    /// Draws a multiplier; the log Hastings ratio of scaling one value by
    /// it is `ln m`.
    pub fn draw_multiplier(&self, rng: &mut SmallRng) -> f64 {
        (self.scale * (2.0 * uniform(rng) - 1.0)).exp()
    }
}

/// Symmetric sliding window `x + U(-w, w)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowKernel {
    pub window: f64,
}

impl WindowKernel {
    pub fn new(window: f64) -> Self {
        Self { window }
    }

    pub fn draw_addend(&self, rng: &mut SmallRng) -> f64 {
        uniform_range(rng, -self.window, self.window)
    }
}

/// Tuning parameter carried by an operator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Kernel {
    Scale(ScaleKernel),
    Window(WindowKernel),
    /// Nothing to tune (Gibbs and reversible-jump moves).
    None,
}

impl Kernel {
    pub fn tuning_parameter(&self) -> Option<f64> {
        match self {
            Self::Scale(k) => Some(k.scale),
            Self::Window(k) => Some(k.window),
            Self::None => None,
        }
    }

    /// `ln θ' = ln θ + (1/count)(min(α, 1) - 0.44)`.
    pub fn optimize(&mut self, ln_acceptance: f64, count: u64) {
        if count == 0 {
            return;
        }
        let alpha = if ln_acceptance.is_nan() {
            0.0
        } else {
            ln_acceptance.min(0.0).exp()
        };
        let delta = (alpha - TARGET_ACCEPTANCE) / count as f64;
        let tune = |p: &mut f64| {
            let next = (p.ln() + delta).exp();
            if next.is_finite() && next > 0.0 {
                *p = next;
            }
        };
        match self {
            Self::Scale(k) => tune(&mut k.scale),
            Self::Window(k) => tune(&mut k.window),
            Self::None => {}
        }
    }
}
