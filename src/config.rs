//! Pipeline configuration: defaults, optional TOML file and `CLTV_*` environment overrides

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;
use crate::stats::NelderMeadOptions;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Analysis date; tenure is measured up to midnight of this day
    pub reference_date: NaiveDate,
    /// Only customers buying from this country are scored (`None` = all)
    pub country: Option<String>,
    /// Horizon for the short-range purchase forecast, in weeks
    pub short_horizon_weeks: f64,
    /// Horizon for the mid-range purchase forecast, in weeks
    pub mid_horizon_weeks: f64,
    /// Primary CLTV horizon in months; drives `clv`, `scaled_clv` and `segment`
    pub horizon_months: u32,
    /// Additional CLTV horizons, each an independent run
    pub extra_horizons: Vec<u32>,
    /// Monthly discount rate
    pub discount_rate: f64,
    /// Number of quantile tiers
    pub segments: usize,
    pub bgnbd_penalizer: f64,
    pub gamma_gamma_penalizer: f64,
    pub outliers: OutlierSettings,
    pub solver: SolverSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            reference_date: NaiveDate::from_ymd_opt(2011, 12, 11).unwrap_or_default(),
            country: Some("United Kingdom".to_string()),
            short_horizon_weeks: 1.0,
            mid_horizon_weeks: 4.0,
            horizon_months: 6,
            extra_horizons: vec![1, 12],
            discount_rate: 0.01,
            segments: 4,
            bgnbd_penalizer: 0.001,
            gamma_gamma_penalizer: 0.01,
            outliers: OutlierSettings::default(),
            solver: SolverSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlierSettings {
    pub lower_quantile: f64,
    pub upper_quantile: f64,
    pub fence_multiplier: f64,
}

impl Default for OutlierSettings {
    fn default() -> Self {
        Self {
            lower_quantile: 0.01,
            upper_quantile: 0.99,
            fence_multiplier: 1.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    pub max_iters: usize,
    pub tolerance: f64,
    pub max_restarts: usize,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_iters: 10_000,
            tolerance: 1e-10,
            max_restarts: 5,
        }
    }
}

impl SolverSettings {
    pub fn options(&self) -> NelderMeadOptions {
        NelderMeadOptions {
            max_iters: self.max_iters,
            f_tolerance: self.tolerance,
            x_tolerance: self.tolerance.sqrt(),
            max_restarts: self.max_restarts,
            ..NelderMeadOptions::default()
        }
    }
}

impl PipelineConfig {
    /// Layer an optional config file and `CLTV_*` environment variables
    /// (`__` separates nested keys) over the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// `env` replaces the process environment when given.
    fn load_with_env(path: Option<&Path>, env: Option<config::Map<String, String>>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("CLTV")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn reference_datetime(&self) -> NaiveDateTime {
        // midnight
        self.reference_date.and_time(NaiveTime::default())
    }

    /// Primary horizon first, then the extra horizons without duplicates.
    pub fn horizons(&self) -> Vec<u32> {
        let mut horizons = vec![self.horizon_months];
        for &months in &self.extra_horizons {
            if !horizons.contains(&months) {
                horizons.push(months);
            }
        }
        horizons
    }

    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        let outliers = &self.outliers;
        if !(0.0..=1.0).contains(&outliers.lower_quantile)
            || !(0.0..=1.0).contains(&outliers.upper_quantile)
        {
            errors.push("outlier quantiles must be within [0, 1]".to_string());
        }
        if outliers.lower_quantile > outliers.upper_quantile {
            errors.push("outliers.lower_quantile must be <= outliers.upper_quantile".to_string());
        }
        if !(outliers.fence_multiplier >= 0.0) {
            errors.push("outliers.fence_multiplier must be >= 0".to_string());
        }

        if !(self.short_horizon_weeks > 0.0) || !(self.mid_horizon_weeks > 0.0) {
            errors.push("purchase forecast horizons must be > 0 weeks".to_string());
        }
        if self.horizons().contains(&0) {
            errors.push("CLTV horizons must be > 0 months".to_string());
        }
        if !(self.discount_rate > -1.0) || !self.discount_rate.is_finite() {
            errors.push("discount_rate must be a finite value > -1".to_string());
        }
        if !(1..=26).contains(&self.segments) {
            errors.push("segments must be between 1 and 26".to_string());
        }
        if !(self.bgnbd_penalizer >= 0.0) || !(self.gamma_gamma_penalizer >= 0.0) {
            errors.push("penalizer coefficients must be >= 0".to_string());
        }
        if self.solver.max_iters == 0 {
            errors.push("solver.max_iters must be > 0".to_string());
        }
        if !(self.solver.tolerance > 0.0) {
            errors.push("solver.tolerance must be > 0".to_string());
        }
        if let Some(country) = &self.country {
            if country.trim().is_empty() {
                errors.push("country must not be blank".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
