//! Command-line interface definitions and argument parsing

use anyhow::{anyhow, bail};
use chrono::NaiveDate;
use clap::Parser;
use std::path::PathBuf;

use crate::config::PipelineConfig;
use crate::rfm::CustomerFeatures;

/// Customer lifetime value scoring with BG/NBD and Gamma-Gamma models
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the input transactions CSV file
    #[arg(short, long, default_value = "data.csv")]
    pub input: PathBuf,

    /// Output path for the scored customer table (replaced on every run)
    #[arg(short, long, default_value = "cltv_scores.csv")]
    pub output: PathBuf,

    /// Optional TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Only score customers from this country
    #[arg(long, conflicts_with = "all_countries")]
    pub country: Option<String>,

    /// Score customers from every country
    #[arg(long)]
    pub all_countries: bool,

    /// Analysis reference date (YYYY-MM-DD)
    #[arg(long)]
    pub reference_date: Option<String>,

    /// Primary CLTV horizon in months
    #[arg(short, long)]
    pub months: Option<u32>,

    /// Monthly discount rate
    #[arg(long)]
    pub discount_rate: Option<f64>,

    /// Number of segments
    #[arg(short = 'k', long)]
    pub segments: Option<usize>,

    /// Number of customers listed in each ranking
    #[arg(long, default_value = "10")]
    pub top: usize,

    /// Prediction mode: provide frequency, recency, T and monetary as a comma-separated string
    /// Example: --predict "8,30.5,40,120.0" (recency and T in weeks)
    #[arg(short, long)]
    pub predict: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Apply command-line overrides on top of the loaded configuration.
    pub fn apply_overrides(&self, config: &mut PipelineConfig) -> anyhow::Result<()> {
        if self.all_countries {
            config.country = None;
        } else if let Some(country) = &self.country {
            config.country = Some(country.clone());
        }
        if let Some(date) = &self.reference_date {
            config.reference_date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
                .map_err(|e| anyhow!("Invalid reference date {:?}: {}", date, e))?;
        }
        if let Some(months) = self.months {
            config.horizon_months = months;
        }
        if let Some(rate) = self.discount_rate {
            config.discount_rate = rate;
        }
        if let Some(segments) = self.segments {
            config.segments = segments;
        }
        Ok(())
    }

    /// Parse customer values from the predict string
    /// Expected format: "frequency,recency,T,monetary"
    pub fn parse_customer_values(&self) -> anyhow::Result<Option<CustomerFeatures>> {
        let Some(ref predict_str) = self.predict else {
            return Ok(None);
        };

        let parts: Vec<&str> = predict_str.split(',').collect();
        if parts.len() != 4 {
            bail!("Predict values must be in format 'frequency,recency,T,monetary'");
        }

        let names = ["frequency", "recency", "T", "monetary"];
        let mut values = [0.0; 4];
        for ((value, part), name) in values.iter_mut().zip(&parts).zip(names) {
            *value = part
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| anyhow!("Invalid {} value: {}", name, part))?;
        }
        let [frequency, recency, t, monetary] = values;

        if frequency < 0.0 || recency < 0.0 || monetary <= 0.0 {
            bail!("frequency and recency must be >= 0 and monetary > 0");
        }
        if recency > t {
            bail!("recency ({}) cannot exceed T ({})", recency, t);
        }

        Ok(Some(CustomerFeatures {
            customer_id: 0,
            recency,
            t,
            frequency,
            monetary,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> Args {
        Args::parse_from(["cltvforge"])
    }

    #[test]
    fn test_defaults() {
        let args = args();
        assert_eq!(args.input, PathBuf::from("data.csv"));
        assert_eq!(args.output, PathBuf::from("cltv_scores.csv"));
        assert_eq!(args.top, 10);
        assert!(args.predict.is_none());
    }

    #[test]
    fn test_parse_customer_values() {
        let mut args = args();
        args.predict = Some("8, 30.5, 40, 120.0".to_string());

        let customer = args.parse_customer_values().unwrap().unwrap();
        assert_eq!(customer.frequency, 8.0);
        assert_eq!(customer.recency, 30.5);
        assert_eq!(customer.t, 40.0);
        assert_eq!(customer.monetary, 120.0);

        args.predict = None;
        assert!(args.parse_customer_values().unwrap().is_none());

        args.predict = Some("invalid".to_string());
        assert!(args.parse_customer_values().is_err());

        args.predict = Some("8,30,40,abc".to_string());
        assert!(args.parse_customer_values().is_err());

        // recency longer than tenure
        args.predict = Some("8,50,40,10".to_string());
        assert!(args.parse_customer_values().is_err());
    }

    #[test]
    fn test_apply_overrides() {
        let args = Args::parse_from([
            "cltvforge",
            "--reference-date",
            "2011-06-30",
            "--months",
            "12",
            "--discount-rate",
            "0.02",
            "-k",
            "5",
            "--country",
            "France",
        ]);
        let mut config = PipelineConfig::default();
        args.apply_overrides(&mut config).unwrap();

        assert_eq!(
            config.reference_date,
            NaiveDate::from_ymd_opt(2011, 6, 30).unwrap()
        );
        assert_eq!(config.horizon_months, 12);
        assert_eq!(config.discount_rate, 0.02);
        assert_eq!(config.segments, 5);
        assert_eq!(config.country.as_deref(), Some("France"));

        let all = Args::parse_from(["cltvforge", "--all-countries"]);
        all.apply_overrides(&mut config).unwrap();
        assert!(config.country.is_none());
    }

    #[test]
    fn test_invalid_reference_date() {
        let args = Args::parse_from(["cltvforge", "--reference-date", "11/12/2011"]);
        let mut config = PipelineConfig::default();
        assert!(args.apply_overrides(&mut config).is_err());
    }
}
