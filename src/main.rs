//! CltvForge: customer lifetime value scoring CLI
//!
//! This is the main entrypoint that orchestrates data loading, model fitting,
//! scoring, segmentation, and single-customer prediction.

use anyhow::{bail, Result};
use clap::Parser;
use cltvforge::pipeline::CltvReport;
use cltvforge::{
    Args, CltvPipeline, CsvScoreSink, CsvTransactionSource, CustomerFeatures, PipelineConfig,
    ScoreSink,
};
use std::time::Instant;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();
    init_tracing(args.verbose);

    let mut config = PipelineConfig::load(args.config.as_deref())?;
    args.apply_overrides(&mut config)?;
    if let Err(errors) = config.validate() {
        bail!("Invalid configuration:\n  - {}", errors.join("\n  - "));
    }

    // Check if in prediction mode
    if let Some(customer) = args.parse_customer_values()? {
        run_prediction_mode(&args, config, customer)?;
    } else {
        run_full_pipeline(&args, config)?;
    }

    Ok(())
}

/// Logs go to stderr; `RUST_LOG` wins over `--verbose`.
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Fit on the input data, then score a single hypothetical customer
fn run_prediction_mode(args: &Args, config: PipelineConfig, customer: CustomerFeatures) -> Result<()> {
    println!("=== Prediction Mode ===");
    println!(
        "Input values: frequency={}, recency={}, T={}, monetary={}",
        customer.frequency, customer.recency, customer.t, customer.monetary
    );

    let start_time = Instant::now();
    info!(input = %args.input.display(), "fitting models for prediction");

    let pipeline = CltvPipeline::new(config)?;
    let report = pipeline.run(&CsvTransactionSource::new(&args.input))?;
    let prediction = report.predict_customer(&customer)?;

    let elapsed = start_time.elapsed();
    let config = pipeline.config();

    println!("\n✓ Predicted Segment: {}", prediction.segment);
    println!("  Processing time: {:.2}s", elapsed.as_secs_f64());
    println!(
        "\n  Expected purchases ({} week(s)): {:.3}",
        config.short_horizon_weeks, prediction.expected_purchases_short_horizon
    );
    println!(
        "  Expected purchases ({} week(s)): {:.3}",
        config.mid_horizon_weeks, prediction.expected_purchases_mid_horizon
    );
    println!("  Expected average profit: {:.2}", prediction.expected_average_profit);
    println!(
        "  CLTV ({} months): {:.2} (scaled {:.3})",
        report.primary.months, prediction.clv, prediction.scaled_clv
    );

    let sizes = report.segmentation.sizes();
    let size = sizes.get(prediction.segment.tier).copied().unwrap_or(0);
    let total = report.records.len();
    println!(
        "\nSegment {} holds {} customers ({:.1}% of total)",
        prediction.segment,
        size,
        size as f64 / total as f64 * 100.0
    );

    Ok(())
}

/// Run the full scoring pipeline and write the scored table
fn run_full_pipeline(args: &Args, config: PipelineConfig) -> Result<()> {
    println!("=== Full CLTV Pipeline ===\n");

    let start_time = Instant::now();
    info!(input = %args.input.display(), "reading transactions");

    let pipeline = CltvPipeline::new(config)?;
    let report = pipeline.run(&CsvTransactionSource::new(&args.input))?;

    println!("✓ Customers scored: {}", report.records.len());
    if let Some(stats) = report.filter_stats {
        println!(
            "  Transactions kept: {} (dropped {})",
            stats.kept,
            stats.dropped()
        );
    }

    print_models(&report);
    print_segments(&report);
    print_rankings(&report, args.top);

    CsvScoreSink::new(&args.output).write_scores(&report.records)?;

    let total_time = start_time.elapsed();
    println!("\n=== Pipeline Complete ===");
    println!("Total processing time: {:.2}s", total_time.as_secs_f64());
    println!("Scores saved to: {}", args.output.display());

    Ok(())
}

fn print_models(report: &CltvReport) {
    let bg = &report.purchase_model;
    let gg = &report.monetary_model;
    println!("\n=== Models ===");
    println!(
        "BG/NBD: r={:.4}, alpha={:.4}, a={:.4}, b={:.4}",
        bg.r, bg.alpha, bg.a, bg.b
    );
    println!("Gamma-Gamma: p={:.4}, q={:.4}, v={:.4}", gg.p, gg.q, gg.v);
    match report.frequency_monetary_correlation {
        Some(rho) => println!("Frequency / monetary correlation: {:.3}", rho),
        None => println!("Frequency / monetary correlation: undefined"),
    }
}

fn print_segments(report: &CltvReport) {
    println!("\n=== Segment Statistics ({} months) ===", report.primary.months);
    println!(
        "{:<8} {:>9} {:>9} {:>9} {:>9} {:>10} {:>9} {:>12} {:>7}",
        "segment", "customers", "recency", "T", "freq", "monetary", "profit", "clv", "scaled"
    );
    let total = report.records.len() as f64;
    for s in report.segment_summaries() {
        println!(
            "{:<8} {:>9} {:>9.2} {:>9.2} {:>9.2} {:>10.2} {:>9.2} {:>12.2} {:>7.3}   ({:.1}%)",
            s.segment.label(),
            s.customers,
            s.recency,
            s.t,
            s.frequency,
            s.monetary,
            s.expected_average_profit,
            s.clv,
            s.scaled_clv,
            s.customers as f64 / total * 100.0
        );
    }
    let boundaries: Vec<String> = report
        .segmentation
        .boundaries
        .iter()
        .map(|b| format!("{:.4}", b))
        .collect();
    println!("Tier cut scores (highest scaled clv below A): [{}]", boundaries.join(", "));
}

fn print_rankings(report: &CltvReport, top: usize) {
    if top == 0 {
        return;
    }

    println!("\n=== Top {} by expected purchases (short horizon) ===", top);
    for r in report.top_by_short_horizon_purchases(top) {
        println!("{:>10}  {:.3}", r.customer_id, r.expected_purchases_short_horizon);
    }

    println!("\n=== Top {} by expected purchases (mid horizon) ===", top);
    for r in report.top_by_mid_horizon_purchases(top) {
        println!("{:>10}  {:.3}", r.customer_id, r.expected_purchases_mid_horizon);
    }

    for horizon in report.horizons() {
        println!("\n=== Top {} by CLTV ({} months) ===", top, horizon.months);
        for (customer_id, clv, scaled) in report.top_for_horizon(horizon, top) {
            println!("{:>10}  {:>12.2}  {:.3}", customer_id, clv, scaled);
        }
    }
}
