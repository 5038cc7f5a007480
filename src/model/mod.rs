//! Probabilistic customer models behind a common fit / predict contract
//!
//! A model family is split into a parameter builder implementing [`Fit`]
//! and the fitted model implementing [`Predict`]. Fitted models are plain
//! values owned by one pipeline run; nothing is cached between runs.

pub mod bgnbd;
pub mod gamma_gamma;

use ndarray::Array1;

use crate::error::Result;
use crate::rfm::{CustomerFeatures, RfmData};

pub use bgnbd::{BetaGeoFitter, BetaGeoModel};
pub use gamma_gamma::{GammaGammaFitter, GammaGammaModel};

/// Estimates model parameters from a cohort's features.
pub trait Fit {
    type Model: Predict;

    fn fit(&self, rfm: &RfmData) -> Result<Self::Model>;
}

/// Per-customer prediction from fitted parameters.
///
/// `horizon` is expressed in the cohort's [`TimeUnit`](crate::rfm::TimeUnit);
/// models without a time dimension ignore it. Predictions for one customer
/// never depend on any other customer.
pub trait Predict {
    fn predict(&self, horizon: f64, customer: &CustomerFeatures) -> f64;

    fn predict_all(&self, horizon: f64, rfm: &RfmData) -> Array1<f64> {
        rfm.iter()
            .map(|customer| self.predict(horizon, &customer))
            .collect()
    }
}
