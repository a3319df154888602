use crate::distributions::ContinuousDistribution;
use crate::error::{ModelError, Result};

/// A scalar model parameter with an undo slot and an optional prior.
///
/// `stored_value` holds the last committed value; operators call [`store`]
/// before proposing and [`restore`] when the proposal is rejected.
///
/// [`store`]: Parameter::store
/// [`restore`]: Parameter::restore
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    value: f64,
    stored_value: f64,
    prior: Option<ContinuousDistribution>,
    fixed: bool,
    min: f64,
    max: f64,
}

impl Parameter {
    pub fn new(value: f64, prior: Option<ContinuousDistribution>, fixed: bool) -> Self {
        Self {
            value,
            stored_value: value,
            prior,
            fixed,
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
        }
    }

    /// A parameter constrained to be > 0.
    pub fn positive(
        value: f64,
        prior: Option<ContinuousDistribution>,
        fixed: bool,
    ) -> Result<Self> {
        if !(value > 0.0) {
            return Err(ModelError::config(format!(
                "positive parameter initialised with {value}"
            )));
        }
        let mut p = Self::new(value, prior, fixed);
        p.min = 0.0;
        Ok(p)
    }

    /// A parameter constrained to (0, 1).
    pub fn probability(
        value: f64,
        prior: Option<ContinuousDistribution>,
        fixed: bool,
    ) -> Result<Self> {
        if !(value > 0.0 && value < 1.0) {
            return Err(ModelError::config(format!(
                "probability parameter initialised with {value}"
            )));
        }
        let mut p = Self::new(value, prior, fixed);
        p.min = 0.0;
        p.max = 1.0;
        Ok(p)
    }

    pub fn fixed_value(value: f64) -> Self {
        Self::new(value, None, true)
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn stored_value(&self) -> f64 {
        self.stored_value
    }

    pub fn set_value(&mut self, value: f64) {
        self.value = value;
    }

    /// Multiplies the current value by `multiplier`.
    pub fn update(&mut self, multiplier: f64) {
        self.value *= multiplier;
    }

    pub fn store(&mut self) {
        self.stored_value = self.value;
    }

    pub fn restore(&mut self) {
        self.value = self.stored_value;
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    pub fn fix(&mut self) {
        self.fixed = true;
    }

    pub fn estimate(&mut self) {
        self.fixed = false;
    }

    pub fn prior(&self) -> Option<&ContinuousDistribution> {
        self.prior.as_ref()
    }

    pub fn set_prior(&mut self, prior: ContinuousDistribution) {
        self.prior = Some(prior);
    }

    /// Whether `value` lies inside the parameter's hard bounds.
    pub fn in_bounds(&self, value: f64) -> bool {
        value > self.min && value < self.max
    }

    /// Log prior density of the current value, zero when fixed or prior-less.
    pub fn relative_prior_ln_pdf(&self) -> f64 {
        self.prior_ln_pdf_of(self.value)
    }

    pub fn prior_ln_pdf_of(&self, value: f64) -> f64 {
        if self.fixed {
            return 0.0;
        }
        match &self.prior {
            Some(p) => p.ln_pdf(value),
            None => 0.0,
        }
    }
}
