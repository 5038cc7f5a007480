//! Gamma-Gamma model of average transaction value

use ndarray::{Array1, Zip};
use serde::Serialize;
use tracing::{info, warn};

use super::{Fit, Predict};
use crate::error::{CltvError, Result};
use crate::rfm::{CustomerFeatures, RfmData};
use crate::stats::{ln_gamma, nelder_mead, NelderMeadOptions};

const MODEL: &str = "gamma-gamma";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GammaGammaFitter {
    pub penalizer: f64,
    pub solver: NelderMeadOptions,
}

impl Default for GammaGammaFitter {
    fn default() -> Self {
        Self::new(0.01)
    }
}

impl GammaGammaFitter {
    pub fn new(penalizer: f64) -> Self {
        Self {
            penalizer,
            solver: NelderMeadOptions::default(),
        }
    }

    pub fn solver(mut self, solver: NelderMeadOptions) -> Self {
        self.solver = solver;
        self
    }
}

/// Fitted Gamma-Gamma parameters.
///
/// Spend per transaction is Gamma(p, nu) with nu ~ Gamma(q, v) across customers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GammaGammaModel {
    pub p: f64,
    pub q: f64,
    pub v: f64,
}

/// Mean negative log-likelihood plus `penalizer · Σθ²`.
pub fn negative_log_likelihood(
    params: &[f64; 3],
    frequency: &Array1<f64>,
    monetary: &Array1<f64>,
    penalizer: f64,
) -> f64 {
    let [p, q, v] = *params;
    let total = Zip::from(frequency)
        .and(monetary)
        .fold(0.0, |acc, &x, &m| {
            let px = p * x;
            acc + ln_gamma(px + q) - ln_gamma(px) - ln_gamma(q)
                + q * v.ln()
                + (px - 1.0) * m.ln()
                + px * x.ln()
                - (px + q) * (x * m + v).ln()
        });
    let penalty = p * p + q * q + v * v;
    -total / frequency.len() as f64 + penalizer * penalty
}

impl Fit for GammaGammaFitter {
    type Model = GammaGammaModel;

    fn fit(&self, rfm: &RfmData) -> Result<GammaGammaModel> {
        if rfm.is_empty() {
            return Err(CltvError::EmptyCohort {
                stage: "gamma-gamma fit",
            });
        }

        let objective = |log_params: &[f64]| {
            let params = [log_params[0].exp(), log_params[1].exp(), log_params[2].exp()];
            negative_log_likelihood(&params, &rfm.frequency, &rfm.monetary, self.penalizer)
        };
        let minimum = nelder_mead(objective, &[0.1; 3], &self.solver).map_err(|e| {
            CltvError::NonConvergence {
                model: MODEL,
                reason: e.to_string(),
            }
        })?;

        let model = GammaGammaModel {
            p: minimum.x[0].exp(),
            q: minimum.x[1].exp(),
            v: minimum.x[2].exp(),
        };
        if ![model.p, model.q, model.v]
            .iter()
            .all(|p| p.is_finite() && *p > 0.0)
        {
            return Err(CltvError::NonConvergence {
                model: MODEL,
                reason: format!("parameters are not finite and positive: {:?}", model),
            });
        }
        if model.q <= 1.0 {
            warn!(
                q = model.q,
                "gamma-gamma population mean is undefined for q <= 1; \
                 expected profit falls back to observed monetary value"
            );
        }

        info!(
            p = model.p,
            q = model.q,
            v = model.v,
            objective = minimum.value,
            iterations = minimum.iterations,
            "fitted gamma-gamma model"
        );
        Ok(model)
    }
}

impl GammaGammaModel {
    /// Posterior mean spend per transaction: a credibility-weighted blend of
    /// the population mean and the customer's observed average.
    pub fn conditional_expected_average_profit(&self, frequency: f64, monetary: f64) -> f64 {
        let GammaGammaModel { p, q, v } = *self;
        if q <= 1.0 {
            return monetary;
        }
        let population_mean = v * p / (q - 1.0);
        let weight = p * frequency / (p * frequency + q - 1.0);
        (1.0 - weight) * population_mean + weight * monetary
    }
}

impl Predict for GammaGammaModel {
    fn predict(&self, _horizon: f64, customer: &CustomerFeatures) -> f64 {
        self.conditional_expected_average_profit(customer.frequency, customer.monetary)
    }
}
