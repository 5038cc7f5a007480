//! CltvForge: batch customer lifetime value scoring
//!
//! Transactions are filtered and outlier-capped, aggregated into per-customer
//! recency / frequency / monetary features, and scored with a BG/NBD purchase
//! model and a Gamma-Gamma spend model. The discounted CLTV is min-max scaled
//! and cut into quantile tiers.

pub mod cli;
pub mod cltv;
pub mod config;
pub mod data;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod preprocess;
pub mod rfm;
pub mod segment;
pub mod stats;

// Re-export public items for easier access
pub use cli::Args;
pub use cltv::{customer_lifetime_value, CltvOptions, MinMaxScaler};
pub use config::PipelineConfig;
pub use data::{CsvScoreSink, CsvTransactionSource, ScoreSink, TransactionSource};
pub use error::{CltvError, Result};
pub use model::{BetaGeoFitter, BetaGeoModel, Fit, GammaGammaFitter, GammaGammaModel, Predict};
pub use pipeline::{CltvPipeline, CltvRecord, CltvReport, CustomerPrediction, HorizonScores};
pub use rfm::{CustomerFeatures, RfmBuilder, RfmData, TimeUnit};
pub use segment::{Segment, Segmenter};
