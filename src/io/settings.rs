use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::distributions::ContinuousDistribution;
use crate::error::{ModelError, Result};
use crate::parameter::Parameter;

fn default_true() -> bool {
    true
}

fn default_ploidy() -> u32 {
    2
}

fn default_weight() -> f64 {
    1.0
}

fn default_delay() -> u64 {
    1000
}

fn default_debug_frequency() -> u64 {
    0
}

/// Starting value, estimate flag and prior of one parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSettings {
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default = "default_true")]
    pub estimate: bool,
    #[serde(default)]
    pub prior: Option<ContinuousDistribution>,
}

impl ParameterSettings {
    pub fn fixed(value: f64) -> Self {
        Self {
            value: Some(value),
            estimate: false,
            prior: None,
        }
    }

    pub fn estimated(value: Option<f64>, prior: ContinuousDistribution) -> Self {
        Self {
            value,
            estimate: true,
            prior: Some(prior),
        }
    }

    pub fn validate(&self, name: &str) -> Result<()> {
        if let Some(p) = &self.prior {
            p.validate()?;
        }
        if self.estimate && self.prior.is_none() {
            return Err(ModelError::config(format!(
                "{name} is estimated but has no prior"
            )));
        }
        if !self.estimate && self.value.is_none() {
            return Err(ModelError::config(format!(
                "{name} is fixed but has no value"
            )));
        }
        Ok(())
    }

    /// Starting value: the configured one, else the prior mean.
    pub fn initial_value(&self) -> Option<f64> {
        self.value.or_else(|| self.prior.as_ref().map(|p| p.mean()))
    }

    fn build(
        &self,
        name: &str,
        make: fn(f64, Option<ContinuousDistribution>, bool) -> Result<Parameter>,
    ) -> Result<Parameter> {
        self.validate(name)?;
        let value = self
            .initial_value()
            .ok_or_else(|| ModelError::config(format!("{name} has no starting value")))?;
        make(value, self.prior.clone(), !self.estimate)
            .map_err(|e| ModelError::config(format!("{name}: {e}")))
    }

    pub fn to_positive_parameter(&self, name: &str) -> Result<Parameter> {
        self.build(name, Parameter::positive)
    }

    pub fn to_probability_parameter(&self, name: &str) -> Result<Parameter> {
        self.build(name, Parameter::probability)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonParameterSettings {
    pub population_size: ParameterSettings,
    /// Overrides `population_size` for the ancestral population.
    #[serde(default)]
    pub root_population_size: Option<ParameterSettings>,
    pub freq_1: ParameterSettings,
    pub mutation_rate: ParameterSettings,
}

impl Default for ComparisonParameterSettings {
    fn default() -> Self {
        Self {
            population_size: ParameterSettings::estimated(
                None,
                ContinuousDistribution::gamma(1.0, 0.01),
            ),
            root_population_size: None,
            freq_1: ParameterSettings::fixed(0.5),
            mutation_rate: ParameterSettings::fixed(1.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstantSiteCounts {
    pub green: u32,
    pub red: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonSettings {
    /// Allele-count table for this comparison.
    pub path: PathBuf,
    /// Columns of the table to use; all columns when absent.
    #[serde(default)]
    pub populations: Option<Vec<String>>,
    #[serde(default = "default_ploidy")]
    pub ploidy: u32,
    #[serde(default)]
    pub markers_are_dominant: bool,
    #[serde(default)]
    pub constant_sites_removed: bool,
    /// Explicit numbers of constant sites removed before counting patterns.
    #[serde(default)]
    pub constant_site_counts: Option<ConstantSiteCounts>,
    #[serde(default)]
    pub equal_population_sizes: bool,
    #[serde(default)]
    pub parameters: Option<ComparisonParameterSettings>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventModelSettings {
    DirichletProcess {
        concentration: ParameterSettings,
    },
    PitmanYorProcess {
        concentration: ParameterSettings,
        discount: ParameterSettings,
    },
    UniformPartition {
        split_weight: ParameterSettings,
    },
    /// Fixed assignment of comparisons to events (standardized labels).
    /// Defaults to one event per comparison.
    Fixed {
        #[serde(default)]
        event_indices: Option<Vec<usize>>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorSettings {
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub scale: Option<f64>,
    #[serde(default)]
    pub window: Option<f64>,
    #[serde(default)]
    pub number_of_auxiliary_categories: Option<usize>,
}

impl Default for OperatorSettings {
    fn default() -> Self {
        Self {
            weight: 1.0,
            scale: None,
            window: None,
            number_of_auxiliary_categories: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorScheduleSettings {
    #[serde(default = "default_true")]
    pub auto_optimize: bool,
    #[serde(default = "default_delay")]
    pub auto_optimize_delay: u64,
    /// Per-operator overrides keyed by operator name.
    #[serde(default)]
    pub operators: BTreeMap<String, OperatorSettings>,
}

impl Default for OperatorScheduleSettings {
    fn default() -> Self {
        Self {
            auto_optimize: true,
            auto_optimize_delay: default_delay(),
            operators: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McmcSettings {
    pub chain_length: u64,
    pub sample_frequency: u64,
    /// Recompute the likelihood from scratch every this many generations
    /// (0 disables the check).
    #[serde(default = "default_debug_frequency")]
    pub debug_check_frequency: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSettings {
    pub event_model_prior: EventModelSettings,
    pub event_time_prior: ContinuousDistribution,
    pub mcmc_settings: McmcSettings,
    #[serde(default)]
    pub operator_settings: OperatorScheduleSettings,
    #[serde(default)]
    pub global_comparison_settings: ComparisonParameterSettings,
    pub comparisons: Vec<ComparisonSettings>,
}

impl CollectionSettings {
    /// Parameter settings of comparison `i`, falling back to the global block.
    pub fn comparison_parameters(&self, i: usize) -> &ComparisonParameterSettings {
        self.comparisons[i]
            .parameters
            .as_ref()
            .unwrap_or(&self.global_comparison_settings)
    }

    pub fn operator(&self, name: &str) -> OperatorSettings {
        self.operator_settings
            .operators
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.comparisons.is_empty() {
            return Err(ModelError::config("no comparisons configured"));
        }
        self.event_time_prior.validate()?;
        if self.mcmc_settings.sample_frequency == 0 {
            return Err(ModelError::config("sample_frequency must be > 0"));
        }
        match &self.event_model_prior {
            EventModelSettings::DirichletProcess { concentration } => {
                concentration.validate("concentration")?;
            }
            EventModelSettings::PitmanYorProcess {
                concentration,
                discount,
            } => {
                concentration.validate("concentration")?;
                discount.validate("discount")?;
            }
            EventModelSettings::UniformPartition { split_weight } => {
                split_weight.validate("split_weight")?;
            }
            EventModelSettings::Fixed { event_indices } => {
                if let Some(idx) = event_indices
                    && idx.len() != self.comparisons.len()
                {
                    return Err(ModelError::config(format!(
                        "fixed event model lists {} indices for {} comparisons",
                        idx.len(),
                        self.comparisons.len()
                    )));
                }
            }
        }
        for (name, op) in &self.operator_settings.operators {
            if op.weight < 0.0 {
                return Err(ModelError::config(format!(
                    "operator {name} has negative weight"
                )));
            }
        }
        Ok(())
    }

    /// Resolves relative data paths against the settings file's directory.
    pub fn resolve_paths(&mut self, base_dir: &Path) {
        for c in &mut self.comparisons {
            if c.path.is_relative() {
                c.path = base_dir.join(&c.path);
            }
        }
    }
}

pub fn load_settings(path: &Path) -> Result<CollectionSettings> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut settings: CollectionSettings = serde_yaml::from_reader(reader)?;
    if let Some(dir) = path.parent() {
        settings.resolve_paths(dir);
    }
    settings.validate()?;
    Ok(settings)
}

pub fn parse_settings(text: &str) -> Result<CollectionSettings> {
    let settings: CollectionSettings = serde_yaml::from_str(text)?;
    settings.validate()?;
    Ok(settings)
}
