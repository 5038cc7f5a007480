//! Transaction filtering and quantile-fence outlier capping

use tracing::{debug, info};

use crate::config::OutlierSettings;
use crate::data::{RawTransaction, Transaction};
use crate::stats::{quantile_sorted, sorted};

/// Row counts dropped by [`filter_transactions`], attributed to the first failing check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStats {
    pub kept: usize,
    pub missing_customer: usize,
    pub cancelled: usize,
    pub non_positive_quantity: usize,
    pub non_positive_price: usize,
}

impl FilterStats {
    pub fn dropped(&self) -> usize {
        self.missing_customer + self.cancelled + self.non_positive_quantity + self.non_positive_price
    }
}

/// Drop rows without a customer, cancellations, and rows whose quantity or
/// price is not strictly positive (missing values included).
pub fn filter_transactions(raw: Vec<RawTransaction>) -> (Vec<Transaction>, FilterStats) {
    let mut stats = FilterStats::default();
    let mut kept = Vec::with_capacity(raw.len());

    for row in raw {
        let Some(customer_id) = row.customer_id else {
            stats.missing_customer += 1;
            continue;
        };
        if row.is_cancellation() {
            stats.cancelled += 1;
            continue;
        }
        // NaN fails both comparisons, so missing values are dropped here too
        if !(row.quantity > 0.0) {
            stats.non_positive_quantity += 1;
            continue;
        }
        if !(row.price > 0.0) {
            stats.non_positive_price += 1;
            continue;
        }
        kept.push(Transaction {
            invoice: row.invoice,
            customer_id,
            quantity: row.quantity,
            price: row.price,
            invoice_date: row.invoice_date,
            country: row.country,
        });
    }

    stats.kept = kept.len();
    info!(
        kept = stats.kept,
        missing_customer = stats.missing_customer,
        cancelled = stats.cancelled,
        non_positive_quantity = stats.non_positive_quantity,
        non_positive_price = stats.non_positive_price,
        "filtered transactions"
    );
    (kept, stats)
}

/// Clamp interval derived from a column's empirical distribution.
///
/// `lower = Q1 - k·IQR` and `upper = Q3 + k·IQR` where Q1 and Q3 are the
/// configured low/high percentiles (1st and 99th by default).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutlierFence {
    pub lower: f64,
    pub upper: f64,
}

impl OutlierFence {
    /// Fit the fence on `values`. Returns `None` for an empty column.
    pub fn fit(values: &[f64], settings: &OutlierSettings) -> Option<Self> {
        let ordered = sorted(values);
        let q1 = quantile_sorted(&ordered, settings.lower_quantile)?;
        let q3 = quantile_sorted(&ordered, settings.upper_quantile)?;
        let iqr = q3 - q1;
        Some(Self {
            lower: q1 - settings.fence_multiplier * iqr,
            upper: q3 + settings.fence_multiplier * iqr,
        })
    }

    pub fn clamp(&self, value: f64) -> f64 {
        if value < self.lower {
            self.lower
        } else if value > self.upper {
            self.upper
        } else {
            value
        }
    }

    pub fn apply(&self, values: &[f64]) -> Vec<f64> {
        values.iter().map(|&v| self.clamp(v)).collect()
    }
}

/// Fit a fence on `values` and return the capped column.
pub fn cap_values(values: &[f64], settings: &OutlierSettings) -> Vec<f64> {
    match OutlierFence::fit(values, settings) {
        Some(fence) => fence.apply(values),
        None => Vec::new(),
    }
}

/// Cap quantity and price independently, each against its own fence.
pub fn cap_outliers(transactions: Vec<Transaction>, settings: &OutlierSettings) -> Vec<Transaction> {
    let quantities: Vec<f64> = transactions.iter().map(|t| t.quantity).collect();
    let prices: Vec<f64> = transactions.iter().map(|t| t.price).collect();
    let (Some(quantity_fence), Some(price_fence)) = (
        OutlierFence::fit(&quantities, settings),
        OutlierFence::fit(&prices, settings),
    ) else {
        return transactions;
    };

    debug!(
        quantity_lower = quantity_fence.lower,
        quantity_upper = quantity_fence.upper,
        price_lower = price_fence.lower,
        price_upper = price_fence.upper,
        "outlier fences"
    );

    let mut capped = 0usize;
    let out: Vec<Transaction> = transactions
        .into_iter()
        .map(|mut t| {
            let quantity = quantity_fence.clamp(t.quantity);
            let price = price_fence.clamp(t.price);
            if quantity != t.quantity || price != t.price {
                capped += 1;
            }
            t.quantity = quantity;
            t.price = price;
            t
        })
        .collect();
    debug!(rows = capped, "capped outlier rows");
    out
}
