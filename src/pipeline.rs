//! End-to-end scoring run: filter, cap, aggregate, fit, value, normalize, segment

use ndarray::Array1;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::cltv::{customer_lifetime_value, customer_value, CltvOptions, MinMaxScaler};
use crate::config::PipelineConfig;
use crate::data::{RawTransaction, TransactionSource};
use crate::error::{CltvError, Result};
use crate::model::{BetaGeoFitter, BetaGeoModel, Fit, GammaGammaFitter, GammaGammaModel, Predict};
use crate::preprocess::{cap_outliers, filter_transactions, FilterStats};
use crate::rfm::{CustomerFeatures, RfmBuilder, RfmData};
use crate::segment::{Segment, Segmentation, Segmenter};
use crate::stats::pearson;

/// Frequency / monetary correlation above which the Gamma-Gamma
/// independence assumption is reported as doubtful.
const INDEPENDENCE_WARNING: f64 = 0.3;

/// One output row per scored customer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CltvRecord {
    pub customer_id: i64,
    pub recency: f64,
    #[serde(rename = "T")]
    pub t: f64,
    pub frequency: u32,
    pub monetary: f64,
    pub expected_purchases_short_horizon: f64,
    pub expected_purchases_mid_horizon: f64,
    pub expected_average_profit: f64,
    pub clv: f64,
    pub scaled_clv: f64,
    pub segment: Segment,
}

/// CLTV of every customer for one horizon, with the scaler fit on it.
#[derive(Debug, Clone, PartialEq)]
pub struct HorizonScores {
    pub months: u32,
    pub clv: Array1<f64>,
    pub scaled_clv: Array1<f64>,
    pub scaler: MinMaxScaler,
}

/// Column means for one segment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentSummary {
    pub segment: Segment,
    pub customers: usize,
    pub recency: f64,
    pub t: f64,
    pub frequency: f64,
    pub monetary: f64,
    pub expected_purchases_short_horizon: f64,
    pub expected_purchases_mid_horizon: f64,
    pub expected_average_profit: f64,
    pub clv: f64,
    pub scaled_clv: f64,
}

/// Scores for a customer outside the fitted cohort.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CustomerPrediction {
    pub expected_purchases_short_horizon: f64,
    pub expected_purchases_mid_horizon: f64,
    pub expected_average_profit: f64,
    pub clv: f64,
    pub scaled_clv: f64,
    pub segment: Segment,
}

/// Everything one run produced. Models and scalers live only as long as the report.
#[derive(Debug, Clone)]
pub struct CltvReport {
    pub filter_stats: Option<FilterStats>,
    pub features: RfmData,
    pub purchase_model: BetaGeoModel,
    pub monetary_model: GammaGammaModel,
    /// Pearson correlation of frequency and monetary; `None` when undefined
    pub frequency_monetary_correlation: Option<f64>,
    pub records: Vec<CltvRecord>,
    /// Horizon driving `clv`, `scaled_clv` and `segment`
    pub primary: HorizonScores,
    pub extra_horizons: Vec<HorizonScores>,
    pub segmentation: Segmentation,
    short_horizon: f64,
    mid_horizon: f64,
    discount_rate: f64,
}

impl CltvReport {
    /// Primary horizon first.
    pub fn horizons(&self) -> impl Iterator<Item = &HorizonScores> {
        std::iter::once(&self.primary).chain(self.extra_horizons.iter())
    }

    pub fn horizon(&self, months: u32) -> Option<&HorizonScores> {
        self.horizons().find(|h| h.months == months)
    }

    /// Per-segment means, highest segment first. Empty segments are omitted.
    pub fn segment_summaries(&self) -> Vec<SegmentSummary> {
        let mut groups: BTreeMap<usize, Vec<&CltvRecord>> = BTreeMap::new();
        for record in &self.records {
            groups.entry(record.segment.tier).or_default().push(record);
        }

        groups
            .into_iter()
            .map(|(tier, rows)| {
                SegmentSummary {
                    segment: Segment { tier },
                    customers: rows.len(),
                    recency: mean_of(&rows, |r| r.recency),
                    t: mean_of(&rows, |r| r.t),
                    frequency: mean_of(&rows, |r| r.frequency as f64),
                    monetary: mean_of(&rows, |r| r.monetary),
                    expected_purchases_short_horizon: mean_of(&rows, |r| r.expected_purchases_short_horizon),
                    expected_purchases_mid_horizon: mean_of(&rows, |r| r.expected_purchases_mid_horizon),
                    expected_average_profit: mean_of(&rows, |r| r.expected_average_profit),
                    clv: mean_of(&rows, |r| r.clv),
                    scaled_clv: mean_of(&rows, |r| r.scaled_clv),
                }
            })
            .collect()
    }

    /// The `n` records with the largest `key`, ties broken by ascending customer id.
    pub fn top_by<F>(&self, n: usize, key: F) -> Vec<&CltvRecord>
    where
        F: Fn(&CltvRecord) -> f64,
    {
        let mut ranked: Vec<&CltvRecord> = self.records.iter().collect();
        ranked.sort_by(|a, b| {
            key(*b)
                .total_cmp(&key(*a))
                .then(a.customer_id.cmp(&b.customer_id))
        });
        ranked.truncate(n);
        ranked
    }

    pub fn top_by_short_horizon_purchases(&self, n: usize) -> Vec<&CltvRecord> {
        self.top_by(n, |r| r.expected_purchases_short_horizon)
    }

    pub fn top_by_mid_horizon_purchases(&self, n: usize) -> Vec<&CltvRecord> {
        self.top_by(n, |r| r.expected_purchases_mid_horizon)
    }

    pub fn top_by_clv(&self, n: usize) -> Vec<&CltvRecord> {
        self.top_by(n, |r| r.clv)
    }

    /// `(customer_id, clv, scaled_clv)` of the `n` most valuable customers over `horizon`.
    pub fn top_for_horizon(&self, horizon: &HorizonScores, n: usize) -> Vec<(i64, f64, f64)> {
        let mut ranked: Vec<(i64, f64, f64)> = self
            .features
            .customer_ids
            .iter()
            .zip(horizon.clv.iter().zip(horizon.scaled_clv.iter()))
            .map(|(&id, (&clv, &scaled))| (id, clv, scaled))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.truncate(n);
        ranked
    }

    /// Score a customer with this run's models, scaler and score ranking.
    pub fn predict_customer(&self, customer: &CustomerFeatures) -> Result<CustomerPrediction> {
        let options = CltvOptions {
            months: self.primary.months,
            discount_rate: self.discount_rate,
        };
        let clv = customer_value(
            &self.purchase_model,
            &self.monetary_model,
            customer,
            self.features.unit.periods_per_month(),
            &options,
        );
        if !clv.is_finite() {
            return Err(CltvError::NonFinite {
                what: "clv",
                customer_id: customer.customer_id,
            });
        }
        let scaled_clv = self.primary.scaler.scale(clv);

        Ok(CustomerPrediction {
            expected_purchases_short_horizon: self.purchase_model.predict(self.short_horizon, customer),
            expected_purchases_mid_horizon: self.purchase_model.predict(self.mid_horizon, customer),
            expected_average_profit: self.monetary_model.predict(0.0, customer),
            clv,
            scaled_clv,
            segment: self.segmentation.tier_for(scaled_clv, customer.customer_id),
        })
    }
}

fn mean_of<F>(rows: &[&CltvRecord], f: F) -> f64
where
    F: Fn(&CltvRecord) -> f64,
{
    rows.iter().map(|r| f(*r)).sum::<f64>() / rows.len() as f64
}

/// Batch CLTV scoring with a validated configuration.
#[derive(Debug, Clone)]
pub struct CltvPipeline {
    config: PipelineConfig,
}

impl CltvPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|errors| CltvError::Config(errors.join("; ")))?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Read the source, score the cohort and return the full report.
    pub fn run<S>(&self, source: &S) -> Result<CltvReport>
    where
        S: TransactionSource + ?Sized,
    {
        let raw = source.read_transactions()?;
        info!(rows = raw.len(), "read transactions");
        let (features, stats) = self.prepare(raw)?;
        let mut report = self.score(features)?;
        report.filter_stats = Some(stats);
        Ok(report)
    }

    /// Filter, cap and aggregate raw rows into the cohort's features.
    pub fn prepare(&self, raw: Vec<RawTransaction>) -> Result<(RfmData, FilterStats)> {
        let (transactions, stats) = filter_transactions(raw);
        if transactions.is_empty() {
            return Err(CltvError::EmptyCohort { stage: "transaction filter" });
        }
        let capped = cap_outliers(transactions, &self.config.outliers);
        let features = RfmBuilder::new(self.config.reference_datetime())
            .with_country(self.config.country.clone())
            .build(&capped)?;
        Ok((features, stats))
    }

    /// Fit both models on `features` and derive every score.
    pub fn score(&self, features: RfmData) -> Result<CltvReport> {
        let config = &self.config;
        if features.is_empty() {
            return Err(CltvError::EmptyCohort { stage: "scoring" });
        }

        let correlation = pearson(&features.frequency.to_vec(), &features.monetary.to_vec());
        match correlation {
            Some(rho) if rho.abs() > INDEPENDENCE_WARNING => warn!(
                correlation = rho,
                "frequency and monetary value are correlated; gamma-gamma estimates may be biased"
            ),
            Some(rho) => info!(correlation = rho, "frequency / monetary correlation"),
            None => info!("frequency / monetary correlation is undefined"),
        }

        let solver = config.solver.options();
        let purchase_model = BetaGeoFitter::new(config.bgnbd_penalizer)
            .solver(solver)
            .fit(&features)?;
        let monetary_model = GammaGammaFitter::new(config.gamma_gamma_penalizer)
            .solver(solver)
            .fit(&features)?;

        let short_horizon = config.short_horizon_weeks * features.unit.periods_per_week();
        let mid_horizon = config.mid_horizon_weeks * features.unit.periods_per_week();
        let short = purchase_model.predict_all(short_horizon, &features);
        let mid = purchase_model.predict_all(mid_horizon, &features);
        let profit = monetary_model.predict_all(0.0, &features);

        let mut horizons = config
            .horizons()
            .into_iter()
            .map(|months| -> Result<HorizonScores> {
                let options = CltvOptions {
                    months,
                    discount_rate: config.discount_rate,
                };
                let clv = customer_lifetime_value(&purchase_model, &monetary_model, &features, &options)?;
                let (scaler, scaled_clv) = MinMaxScaler::fit_transform(clv.view())?;
                info!(months, min = scaler.min, max = scaler.max, "scored horizon");
                Ok(HorizonScores {
                    months,
                    clv,
                    scaled_clv,
                    scaler,
                })
            })
            .collect::<Result<Vec<HorizonScores>>>()?
            .into_iter();
        let primary = horizons.next().ok_or_else(|| {
            CltvError::Config("at least one CLTV horizon is required".to_string())
        })?;
        let extra_horizons: Vec<HorizonScores> = horizons.collect();

        let segmentation = Segmenter::new(config.segments)?
            .assign(&features.customer_ids, primary.scaled_clv.view())?;

        let records = (0..features.len())
            .map(|i| {
                let customer = features.customer(i);
                CltvRecord {
                    customer_id: customer.customer_id,
                    recency: customer.recency,
                    t: customer.t,
                    frequency: customer.frequency as u32,
                    monetary: customer.monetary,
                    expected_purchases_short_horizon: short[i],
                    expected_purchases_mid_horizon: mid[i],
                    expected_average_profit: profit[i],
                    clv: primary.clv[i],
                    scaled_clv: primary.scaled_clv[i],
                    segment: segmentation.segments[i],
                }
            })
            .collect();

        Ok(CltvReport {
            filter_stats: None,
            features,
            purchase_model,
            monetary_model,
            frequency_monetary_correlation: correlation,
            records,
            primary,
            extra_horizons,
            segmentation,
            short_horizon,
            mid_horizon,
            discount_rate: config.discount_rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rfm::TimeUnit;

    fn three_customers() -> RfmData {
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

    #[test]
    fn test_most_frequent_customer_ranks_highest() {
        let pipeline = CltvPipeline::new(PipelineConfig::default()).unwrap();
        let report = pipeline.score(three_customers()).unwrap();

        assert_eq!(report.primary.months, 6);
        assert_eq!(report.records.len(), 3);
        let best = report.top_by_clv(1)[0];
        assert_eq!(best.customer_id, 3);
        assert_eq!(best.segment.label(), "A");
        assert_eq!(best.scaled_clv, 1.0);
        assert!(report.records.iter().all(|r| r.clv >= 0.0));
        assert!(report
            .records
            .iter()
            .all(|r| (0.0..=1.0).contains(&r.scaled_clv)));
        assert_eq!(report.records[0].scaled_clv, 0.0);
    }

    #[test]
    fn test_every_horizon_is_scored() {
        let pipeline = CltvPipeline::new(PipelineConfig::default()).unwrap();
        let report = pipeline.score(three_customers()).unwrap();

        let months: Vec<u32> = report.horizons().map(|h| h.months).collect();
        assert_eq!(months, vec![6, 1, 12]);
        let one = report.horizon(1).unwrap();
        let twelve = report.horizon(12).unwrap();
        for i in 0..3 {
            assert!(twelve.clv[i] > one.clv[i]);
        }
        assert_eq!(report.top_for_horizon(twelve, 1)[0].0, 3);
    }

    #[test]
    fn test_expected_purchases_are_per_customer() {
        let pipeline = CltvPipeline::new(PipelineConfig::default()).unwrap();
        let report = pipeline.score(three_customers()).unwrap();

        for record in &report.records {
            let i = report
                .features
                .customer_ids
                .iter()
                .position(|&id| id == record.customer_id)
                .unwrap();
            let customer = report.features.customer(i);
            assert_eq!(
                record.expected_purchases_mid_horizon,
                report.purchase_model.predict(4.0, &customer)
            );
            assert!(record.expected_purchases_mid_horizon > record.expected_purchases_short_horizon);
        }
    }

    #[test]
    fn test_segment_summaries() {
        let pipeline = CltvPipeline::new(PipelineConfig {
            segments: 3,
            ..PipelineConfig::default()
        })
        .unwrap();
        let report = pipeline.score(three_customers()).unwrap();

        let summaries = report.segment_summaries();
        assert_eq!(summaries.len(), 3);
        assert_eq!(summaries[0].segment.label(), "A");
        assert_eq!(summaries[0].customers, 1);
        assert_eq!(summaries[0].frequency, 10.0);
        assert_eq!(summaries[2].frequency, 2.0);
    }

    #[test]
    fn test_predict_customer_uses_run_scaler() {
        let pipeline = CltvPipeline::new(PipelineConfig::default()).unwrap();
        let report = pipeline.score(three_customers()).unwrap();

        let best = report.features.customer(2);
        let prediction = report.predict_customer(&best).unwrap();
        assert!((prediction.clv - report.records[2].clv).abs() < 1e-9);
        assert_eq!(prediction.segment.label(), "A");

        let huge = CustomerFeatures {
            customer_id: 0,
            recency: 10.0,
            t: 10.0,
            frequency: 40.0,
            monetary: 5_000.0,
        };
        let prediction = report.predict_customer(&huge).unwrap();
        assert_eq!(prediction.scaled_clv, 1.0);
        assert_eq!(prediction.segment.label(), "A");
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = PipelineConfig {
            segments: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            CltvPipeline::new(config),
            Err(CltvError::Config(_))
        ));
    }

    #[test]
    fn test_no_transactions_left() {
        let pipeline = CltvPipeline::new(PipelineConfig::default()).unwrap();
        let result = pipeline.run(&Vec::<RawTransaction>::new());
        assert!(matches!(result, Err(CltvError::EmptyCohort { .. })));
    }
}
