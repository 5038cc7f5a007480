//! Per-customer recency / tenure / frequency / monetary features

use chrono::NaiveDateTime;
use ndarray::Array1;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

use crate::data::Transaction;
use crate::error::{CltvError, Result};

/// Unit in which recency and tenure are expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Hours,
    Days,
    Weeks,
    Months,
}

impl TimeUnit {
    /// Length of one month expressed in this unit.
    pub fn periods_per_month(self) -> f64 {
        match self {
            TimeUnit::Hours => 30.0 * 24.0,
            TimeUnit::Days => 30.0,
            TimeUnit::Weeks => 4.345,
            TimeUnit::Months => 1.0,
        }
    }

    /// Length of one week expressed in this unit.
    pub fn periods_per_week(self) -> f64 {
        match self {
            TimeUnit::Hours => 7.0 * 24.0,
            TimeUnit::Days => 7.0,
            TimeUnit::Weeks => 1.0,
            TimeUnit::Months => 1.0 / 4.345,
        }
    }
}

/// Feature row for a single customer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CustomerFeatures {
    pub customer_id: i64,
    /// Time between first and last purchase
    pub recency: f64,
    /// Time between first purchase and the reference date
    pub t: f64,
    /// Number of distinct purchase events
    pub frequency: f64,
    /// Average revenue per purchase event
    pub monetary: f64,
}

/// Column-oriented feature set for the scored cohort.
///
/// Every row satisfies `0 <= recency <= t`, `frequency > 1` and `monetary > 0`.
#[derive(Debug, Clone, PartialEq)]
pub struct RfmData {
    pub customer_ids: Vec<i64>,
    pub recency: Array1<f64>,
    pub t: Array1<f64>,
    pub frequency: Array1<f64>,
    pub monetary: Array1<f64>,
    pub unit: TimeUnit,
}

impl RfmData {
    /// Build a feature set from rows, rejecting any row that breaks the invariants.
    pub fn from_customers(rows: Vec<CustomerFeatures>, unit: TimeUnit) -> Result<Self> {
        for row in &rows {
            let valid = row.recency >= 0.0
                && row.recency <= row.t
                && row.frequency > 1.0
                && row.monetary > 0.0
                && row.t.is_finite()
                && row.monetary.is_finite();
            if !valid {
                return Err(CltvError::InvalidInput(format!(
                    "customer {} has inconsistent features \
                     (recency={}, T={}, frequency={}, monetary={})",
                    row.customer_id, row.recency, row.t, row.frequency, row.monetary
                )));
            }
        }

        Ok(Self {
            customer_ids: rows.iter().map(|r| r.customer_id).collect(),
            recency: rows.iter().map(|r| r.recency).collect(),
            t: rows.iter().map(|r| r.t).collect(),
            frequency: rows.iter().map(|r| r.frequency).collect(),
            monetary: rows.iter().map(|r| r.monetary).collect(),
            unit,
        })
    }

    pub fn len(&self) -> usize {
        self.customer_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.customer_ids.is_empty()
    }

    pub fn customer(&self, index: usize) -> CustomerFeatures {
        CustomerFeatures {
            customer_id: self.customer_ids[index],
            recency: self.recency[index],
            t: self.t[index],
            frequency: self.frequency[index],
            monetary: self.monetary[index],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = CustomerFeatures> + '_ {
        (0..self.len()).map(|i| self.customer(i))
    }
}

#[derive(Debug)]
struct CustomerActivity<'a> {
    first: NaiveDateTime,
    last: NaiveDateTime,
    invoices: HashSet<&'a str>,
    revenue: f64,
}

/// Aggregates filtered transactions into weekly RFM features as of a reference date.
#[derive(Debug, Clone)]
pub struct RfmBuilder {
    reference_date: NaiveDateTime,
    country: Option<String>,
}

impl RfmBuilder {
    pub fn new(reference_date: NaiveDateTime) -> Self {
        Self {
            reference_date,
            country: None,
        }
    }

    /// Restrict the cohort to transactions from one country.
    pub fn with_country(mut self, country: Option<String>) -> Self {
        self.country = country;
        self
    }

    /// Group by customer and keep repeat purchasers with positive spend.
    ///
    /// Transactions dated after the reference date are outside the snapshot
    /// and ignored.
    pub fn build(&self, transactions: &[Transaction]) -> Result<RfmData> {
        let mut activity: BTreeMap<i64, CustomerActivity<'_>> = BTreeMap::new();
        let mut after_reference = 0usize;

        for tx in transactions {
            if let Some(country) = &self.country {
                if &tx.country != country {
                    continue;
                }
            }
            if tx.invoice_date > self.reference_date {
                after_reference += 1;
                continue;
            }
            let entry = activity
                .entry(tx.customer_id)
                .or_insert_with(|| CustomerActivity {
                    first: tx.invoice_date,
                    last: tx.invoice_date,
                    invoices: HashSet::new(),
                    revenue: 0.0,
                });
            entry.first = entry.first.min(tx.invoice_date);
            entry.last = entry.last.max(tx.invoice_date);
            entry.invoices.insert(tx.invoice.as_str());
            entry.revenue += tx.revenue();
        }

        if after_reference > 0 {
            debug!(rows = after_reference, "ignored transactions after the reference date");
        }

        let customers = activity.len();
        let rows: Vec<CustomerFeatures> = activity
            .into_iter()
            .filter_map(|(customer_id, a)| {
                let frequency = a.invoices.len() as f64;
                let monetary = a.revenue / frequency;
                if frequency <= 1.0 || !(monetary > 0.0) {
                    return None;
                }
                let recency_days = (a.last - a.first).num_days() as f64;
                let tenure_days = (self.reference_date - a.first).num_days() as f64;
                Some(CustomerFeatures {
                    customer_id,
                    recency: recency_days / 7.0,
                    t: tenure_days / 7.0,
                    frequency,
                    monetary,
                })
            })
            .collect();

        if rows.is_empty() {
            return Err(CltvError::EmptyCohort {
                stage: "rfm aggregation (no repeat purchasers)",
            });
        }
        info!(
            customers,
            repeat_customers = rows.len(),
            "built rfm features"
        );
        RfmData::from_customers(rows, TimeUnit::Weeks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn tx(invoice: &str, customer: i64, when: NaiveDateTime, quantity: f64, price: f64) -> Transaction {
        Transaction {
            invoice: invoice.to_string(),
            customer_id: customer,
            quantity,
            price,
            invoice_date: when,
            country: "United Kingdom".to_string(),
        }
    }

    fn reference() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2011, 12, 11)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_build_weekly_features() {
        let transactions = vec![
            tx("1", 7, at(2011, 1, 2), 2.0, 5.0),
            tx("1", 7, at(2011, 1, 2), 1.0, 10.0),
            tx("2", 7, at(2011, 1, 16), 4.0, 5.0),
            tx("3", 7, at(2011, 3, 13), 1.0, 40.0),
        ];

        let rfm = RfmBuilder::new(reference()).build(&transactions).unwrap();
        assert_eq!(rfm.len(), 1);
        let customer = rfm.customer(0);
        assert_eq!(customer.customer_id, 7);
        assert_eq!(customer.frequency, 3.0);
        // (20 + 20 + 40) / 3 invoices
        assert!((customer.monetary - 80.0 / 3.0).abs() < 1e-12);
        // 2011-01-02 -> 2011-03-13 is 70 days
        assert!((customer.recency - 10.0).abs() < 1e-12);
        // 2011-01-02 12:00 -> 2011-12-11 00:00 is 342 whole days
        assert!((customer.t - 342.0 / 7.0).abs() < 1e-12);
        assert_eq!(rfm.unit, TimeUnit::Weeks);
    }

    #[test]
    fn test_single_purchase_customers_are_excluded() {
        let transactions = vec![
            tx("1", 1, at(2011, 5, 1), 1.0, 3.0),
            tx("1", 1, at(2011, 5, 1), 2.0, 3.0),
            tx("2", 2, at(2011, 5, 1), 1.0, 3.0),
            tx("3", 2, at(2011, 6, 1), 1.0, 3.0),
        ];

        let rfm = RfmBuilder::new(reference()).build(&transactions).unwrap();
        assert_eq!(rfm.customer_ids, vec![2]);
    }

    #[test]
    fn test_no_repeat_purchasers_is_fatal() {
        let transactions = vec![tx("1", 1, at(2011, 5, 1), 1.0, 3.0)];
        let result = RfmBuilder::new(reference()).build(&transactions);
        assert!(matches!(result, Err(CltvError::EmptyCohort { .. })));
    }

    #[test]
    fn test_country_filter_and_snapshot() {
        let mut french = tx("9", 3, at(2011, 2, 1), 1.0, 3.0);
        french.country = "France".to_string();
        let mut french_again = tx("10", 3, at(2011, 4, 1), 1.0, 3.0);
        french_again.country = "France".to_string();
        let transactions = vec![
            french,
            french_again,
            tx("1", 1, at(2011, 5, 1), 1.0, 3.0),
            tx("2", 1, at(2011, 6, 1), 1.0, 3.0),
            // after the reference date: not part of the snapshot
            tx("3", 1, at(2012, 1, 5), 1.0, 3.0),
        ];

        let rfm = RfmBuilder::new(reference())
            .with_country(Some("United Kingdom".to_string()))
            .build(&transactions)
            .unwrap();
        assert_eq!(rfm.customer_ids, vec![1]);
        assert_eq!(rfm.frequency[0], 2.0);
        assert!(rfm.recency[0] <= rfm.t[0]);

        let everyone = RfmBuilder::new(reference()).build(&transactions).unwrap();
        assert_eq!(everyone.customer_ids, vec![1, 3]);
    }

    #[test]
    fn test_from_customers_rejects_inconsistent_rows() {
        let row = CustomerFeatures {
            customer_id: 1,
            recency: 12.0,
            t: 10.0,
            frequency: 3.0,
            monetary: 10.0,
        };
        assert!(RfmData::from_customers(vec![row], TimeUnit::Weeks).is_err());

        let single = CustomerFeatures {
            recency: 1.0,
            frequency: 1.0,
            ..row
        };
        assert!(RfmData::from_customers(vec![single], TimeUnit::Weeks).is_err());
    }

    #[test]
    fn test_periods_per_month() {
        assert_eq!(TimeUnit::Weeks.periods_per_month(), 4.345);
        assert_eq!(TimeUnit::Days.periods_per_month(), 30.0);
        assert_eq!(TimeUnit::Months.periods_per_month(), 1.0);
        assert_eq!(TimeUnit::Hours.periods_per_month(), 720.0);
        assert_eq!(TimeUnit::Weeks.periods_per_week(), 1.0);
        assert_eq!(TimeUnit::Days.periods_per_week(), 7.0);
    }
}
