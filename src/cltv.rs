//! Discounted lifetime value and min-max normalization

use ndarray::{Array1, ArrayView1};
use serde::Serialize;
use tracing::debug;

use crate::error::{CltvError, Result};
use crate::model::Predict;
use crate::rfm::{CustomerFeatures, RfmData};

/// Horizon and discounting for one CLTV run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CltvOptions {
    pub months: u32,
    /// Per-month discount rate
    pub discount_rate: f64,
}

impl Default for CltvOptions {
    fn default() -> Self {
        Self {
            months: 6,
            discount_rate: 0.01,
        }
    }
}

/// Discounted expected profit of one customer.
///
/// # Arguments
/// * `purchases` - Fitted purchase-count model; `predict(t)` is cumulative over `t`
/// * `profit` - Fitted spend model
/// * `customer` - Feature row, in `unit` periods
/// * `periods_per_month` - Length of one month in the feature time unit
/// * `options` - Horizon and discount rate
///
/// # Returns
/// * Sum over months `i = 1..=months` of
///   `profit × (E[Y(i·f)] − E[Y((i−1)·f)]) / (1 + d)^i`, floored at zero.
///   A NaN or infinite sum is returned as is.
pub fn customer_value<P, M>(
    purchases: &P,
    profit: &M,
    customer: &CustomerFeatures,
    periods_per_month: f64,
    options: &CltvOptions,
) -> f64
where
    P: Predict + ?Sized,
    M: Predict + ?Sized,
{
    let spend = profit.predict(0.0, customer);
    let mut previous = 0.0;
    let mut value = 0.0;
    for month in 1..=options.months {
        let cumulative = purchases.predict(month as f64 * periods_per_month, customer);
        let expected = cumulative - previous;
        previous = cumulative;
        value += spend * expected / (1.0 + options.discount_rate).powi(month as i32);
    }
    if value.is_finite() {
        value.max(0.0)
    } else {
        value
    }
}

/// CLTV for every customer of the cohort.
///
/// Fails with [`CltvError::NonFinite`] on the first customer whose value is
/// NaN or infinite.
pub fn customer_lifetime_value<P, M>(
    purchases: &P,
    profit: &M,
    rfm: &RfmData,
    options: &CltvOptions,
) -> Result<Array1<f64>>
where
    P: Predict + ?Sized,
    M: Predict + ?Sized,
{
    let periods_per_month = rfm.unit.periods_per_month();
    let values = rfm
        .iter()
        .map(|customer| {
            let value = customer_value(purchases, profit, &customer, periods_per_month, options);
            if value.is_finite() {
                Ok(value)
            } else {
                Err(CltvError::NonFinite {
                    what: "clv",
                    customer_id: customer.customer_id,
                })
            }
        })
        .collect::<Result<Array1<f64>>>()?;

    debug!(
        months = options.months,
        discount_rate = options.discount_rate,
        customers = values.len(),
        "computed clv"
    );
    Ok(values)
}

/// Min-max scaler fit on one run's scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MinMaxScaler {
    pub min: f64,
    pub max: f64,
}

impl MinMaxScaler {
    pub fn fit(values: ArrayView1<'_, f64>) -> Result<Self> {
        if values.is_empty() {
            return Err(CltvError::EmptyCohort { stage: "normalization" });
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(CltvError::InvalidInput(
                "cannot normalize non-finite scores".to_string(),
            ));
        }
        let min = values.fold(f64::INFINITY, |m, &v| m.min(v));
        let max = values.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
        if max == min {
            return Err(CltvError::DegenerateScores {
                count: values.len(),
                value: min,
            });
        }
        Ok(Self { min, max })
    }

    /// `(x − min) / (max − min)`, clamped to `[0, 1]` for values outside the fitted range.
    pub fn scale(&self, value: f64) -> f64 {
        ((value - self.min) / (self.max - self.min)).clamp(0.0, 1.0)
    }

    pub fn transform(&self, values: ArrayView1<'_, f64>) -> Array1<f64> {
        values.mapv(|v| self.scale(v))
    }

    pub fn fit_transform(values: ArrayView1<'_, f64>) -> Result<(Self, Array1<f64>)> {
        let scaler = Self::fit(values)?;
        Ok((scaler, scaler.transform(values)))
    }
}
