//! BG/NBD (Beta-Geometric / Negative Binomial) purchase frequency model
//!
//! While active, a customer purchases as a Poisson process whose rate is
//! Gamma(r, alpha) distributed across customers. After every purchase the
//! customer drops out with a probability that is Beta(a, b) distributed.

use ndarray::{Array1, Zip};
use serde::Serialize;
use tracing::info;

use super::{Fit, Predict};
use crate::error::{CltvError, Result};
use crate::rfm::{CustomerFeatures, RfmData};
use crate::stats::{ln_gamma, ln_hyp2f1, log_add_exp, nelder_mead, NelderMeadOptions};

const MODEL: &str = "bg/nbd";

/// Fits [`BetaGeoModel`] by penalized maximum likelihood.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BetaGeoFitter {
    /// L2 penalty on the natural-scale parameters
    pub penalizer: f64,
    pub solver: NelderMeadOptions,
}

impl Default for BetaGeoFitter {
    fn default() -> Self {
        Self::new(0.001)
    }
}

impl BetaGeoFitter {
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

/// Fitted BG/NBD parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BetaGeoModel {
    /// Shape of the purchase-rate Gamma prior
    pub r: f64,
    /// Scale of the purchase-rate Gamma prior, in the cohort's time unit
    pub alpha: f64,
    /// Dropout Beta prior
    pub a: f64,
    pub b: f64,
}

fn customer_log_likelihood(params: &[f64; 4], x: f64, t_x: f64, t: f64) -> f64 {
    let [r, alpha, a, b] = *params;
    let a1 = ln_gamma(r + x) - ln_gamma(r) + r * alpha.ln();
    let a2 = ln_gamma(a + b) + ln_gamma(b + x) - ln_gamma(b) - ln_gamma(a + b + x);
    let a3 = -(r + x) * (alpha + t).ln();
    let a4 = if x > 0.0 {
        a.ln() - (b + x - 1.0).ln() - (r + x) * (alpha + t_x).ln()
    } else {
        f64::NEG_INFINITY
    };
    a1 + a2 + log_add_exp(a3, a4)
}

/// Mean negative log-likelihood plus `penalizer · Σθ²`.
pub fn negative_log_likelihood(
    params: &[f64; 4],
    frequency: &Array1<f64>,
    recency: &Array1<f64>,
    t: &Array1<f64>,
    penalizer: f64,
) -> f64 {
    let total = Zip::from(frequency)
        .and(recency)
        .and(t)
        .fold(0.0, |acc, &x, &t_x, &tenure| {
            acc + customer_log_likelihood(params, x, t_x, tenure)
        });
    let penalty: f64 = params.iter().map(|p| p * p).sum();
    -total / frequency.len() as f64 + penalizer * penalty
}

impl Fit for BetaGeoFitter {
    type Model = BetaGeoModel;

    fn fit(&self, rfm: &RfmData) -> Result<BetaGeoModel> {
        if rfm.is_empty() {
            return Err(CltvError::EmptyCohort { stage: "bg/nbd fit" });
        }
        let max_t = rfm.t.fold(0.0_f64, |m, &v| m.max(v));
        if !(max_t > 0.0) || !max_t.is_finite() {
            return Err(CltvError::InvalidInput(
                "bg/nbd fit needs at least one customer with positive tenure".to_string(),
            ));
        }

        // Optimise on a time axis where the longest tenure is 10 units.
        let scale = 10.0 / max_t;
        let recency = &rfm.recency * scale;
        let tenure = &rfm.t * scale;

        let objective = |log_params: &[f64]| {
            let params = [
                log_params[0].exp(),
                log_params[1].exp(),
                log_params[2].exp(),
                log_params[3].exp(),
            ];
            negative_log_likelihood(&params, &rfm.frequency, &recency, &tenure, self.penalizer)
        };
        let minimum = nelder_mead(objective, &[0.1; 4], &self.solver).map_err(|e| {
            CltvError::NonConvergence {
                model: MODEL,
                reason: e.to_string(),
            }
        })?;

        let model = BetaGeoModel {
            r: minimum.x[0].exp(),
            alpha: minimum.x[1].exp() / scale,
            a: minimum.x[2].exp(),
            b: minimum.x[3].exp(),
        };
        if ![model.r, model.alpha, model.a, model.b]
            .iter()
            .all(|p| p.is_finite() && *p > 0.0)
        {
            return Err(CltvError::NonConvergence {
                model: MODEL,
                reason: format!("parameters are not finite and positive: {:?}", model),
            });
        }

        info!(
            r = model.r,
            alpha = model.alpha,
            a = model.a,
            b = model.b,
            objective = minimum.value,
            iterations = minimum.iterations,
            "fitted bg/nbd model"
        );
        Ok(model)
    }
}

impl BetaGeoModel {
    /// Expected number of purchases during the next `t` periods for a
    /// customer with `frequency` purchases, the last one `recency` periods
    /// after the first, observed for `tenure` periods.
    pub fn conditional_expected_purchases(
        &self,
        t: f64,
        frequency: f64,
        recency: f64,
        tenure: f64,
    ) -> f64 {
        if t <= 0.0 {
            return 0.0;
        }
        let BetaGeoModel { r, alpha, a, b } = *self;
        let x = frequency;

        let z = t / (alpha + tenure + t);
        let ln_hyp = ln_hyp2f1(r + x, b + x, a + b + x - 1.0, z);

        let first = (a + b + x - 1.0) / (a - 1.0);
        let second =
            1.0 - (ln_hyp + (r + x) * ((alpha + tenure) / (alpha + t + tenure)).ln()).exp();

        let denominator = if x > 0.0 {
            1.0 + (a / (b + x - 1.0)) * ((alpha + tenure) / (alpha + recency)).powf(r + x)
        } else {
            1.0
        };
        first * second / denominator
    }
}

impl Predict for BetaGeoModel {
    fn predict(&self, horizon: f64, customer: &CustomerFeatures) -> f64 {
        self.conditional_expected_purchases(
            horizon,
            customer.frequency,
            customer.recency,
            customer.t,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rfm::TimeUnit;

    fn cohort() -> RfmData {
        let rows = [(1, 2.0, 1.0, 20.0), (2, 5.0, 5.0, 50.0), (3, 10.0, 9.0, 100.0)]
            .iter()
            .map(|&(id, frequency, recency, monetary)| CustomerFeatures {
                customer_id: id,
                recency,
                t: 10.0,
                frequency,
                monetary,
            })
            .collect();
        RfmData::from_customers(rows, TimeUnit::Weeks).unwrap()
    }

    fn reference_model() -> BetaGeoModel {
        BetaGeoModel {
            r: 0.243,
            alpha: 4.414,
            a: 0.793,
            b: 2.426,
        }
    }

    #[test]
    fn test_negative_log_likelihood_reference_value() {
        let rfm = cohort();
        let m = reference_model();
        let value =
            negative_log_likelihood(&[m.r, m.alpha, m.a, m.b], &rfm.frequency, &rfm.recency, &rfm.t, 0.0);
        assert!((value - 11.282_217_904_393_365).abs() < 1e-9);

        let penalized =
            negative_log_likelihood(&[m.r, m.alpha, m.a, m.b], &rfm.frequency, &rfm.recency, &rfm.t, 0.1);
        let penalty = 0.1 * (m.r * m.r + m.alpha * m.alpha + m.a * m.a + m.b * m.b);
        assert!((penalized - value - penalty).abs() < 1e-9);
    }

    #[test]
    fn test_conditional_expected_purchases_reference_values() {
        let m = reference_model();
        let short = m.conditional_expected_purchases(4.0, 5.0, 5.0, 10.0);
        assert!((short - 0.626_062_363_389_915_6).abs() < 1e-9);
        let long = m.conditional_expected_purchases(52.0, 2.0, 30.0, 38.86);
        assert!((long - 1.546_775_827_020_805_4).abs() < 1e-9);
    }

    #[test]
    fn test_prediction_grows_with_horizon() {
        let m = reference_model();
        assert_eq!(m.conditional_expected_purchases(0.0, 5.0, 5.0, 10.0), 0.0);
        let mut previous = 0.0;
        for weeks in [1.0, 4.0, 13.0, 26.0, 52.0] {
            let value = m.conditional_expected_purchases(weeks, 5.0, 5.0, 10.0);
            assert!(value > previous);
            previous = value;
        }
    }

    #[test]
    fn test_fit_small_cohort() {
        let rfm = cohort();
        let model = BetaGeoFitter::new(0.001).fit(&rfm).unwrap();
        for p in [model.r, model.alpha, model.a, model.b] {
            assert!(p.is_finite() && p > 0.0);
        }

        let predictions = model.predict_all(4.0, &rfm);
        assert_eq!(predictions.len(), 3);
        assert!(predictions.iter().all(|p| p.is_finite() && *p >= 0.0));
        // more frequent and more recent buyers are expected to buy more
        assert!(predictions[2] > predictions[1]);
        assert!(predictions[1] > predictions[0]);
    }

    #[test]
    fn test_fit_reports_non_convergence() {
        let fitter = BetaGeoFitter::new(0.001).solver(NelderMeadOptions {
            max_iters: 2,
            ..NelderMeadOptions::default()
        });
        let result = fitter.fit(&cohort());
        assert!(matches!(result, Err(CltvError::NonConvergence { .. })));
    }

    #[test]
    fn test_fit_empty_cohort() {
        let empty = RfmData::from_customers(Vec::new(), TimeUnit::Weeks).unwrap();
        let result = BetaGeoFitter::default().fit(&empty);
        assert!(matches!(result, Err(CltvError::EmptyCohort { .. })));
    }
}
