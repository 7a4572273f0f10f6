use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use knowlex::eval::{evaluate, load_cases, EvalReport, EvalSummary};
use knowlex::{logging, ServiceArgs};

#[derive(Parser, Debug)]
#[command(
    name = "knowlex-eval",
    about = "Measure clause retrieval quality against a labeled query set"
)]
struct EvalCli {
    /// Path to the evaluation JSONL file.
    #[arg(long, env = "KNOWLEX_EVAL_DATA", default_value = "data/eval.jsonl")]
    cases: PathBuf,

    /// Optional JSON report output path.
    #[arg(long, env = "KNOWLEX_EVAL_REPORT")]
    report_json: Option<PathBuf>,

    #[command(flatten)]
    service: ServiceArgs,
}

fn main() -> Result<()> {
    logging::init();
    let cli = EvalCli::parse();
    let cases = load_cases(&cli.cases)?;
    anyhow::ensure!(!cases.is_empty(), "evaluation file contains no cases");
    let pipeline = cli.service.build_pipeline()?;
    let report = evaluate(&pipeline, cases, render_eval_progress)?;
    println!();
    render_summary(&report.summary);
    if let Some(path) = cli.report_json {
        write_report(&report, &path)?;
        println!("wrote JSON report to {:?}", path);
    }
    Ok(())
}

fn render_summary(summary: &EvalSummary) {
    println!("--- Retrieval Evaluation Summary ---");
    println!("cases: {}", summary.total_cases);
    println!("top_n: {}", summary.top_n);
    println!("hit rate: {:.3}", summary.hit_rate);
    match summary.mean_recall {
        Some(recall) => println!("mean recall: {:.3}", recall),
        None => println!("mean recall: n/a"),
    }
    println!("mean reciprocal rank: {:.3}", summary.mean_reciprocal_rank);
    println!("avg pipeline latency (ms): {:.2}", summary.avg_latency_ms);
}

fn write_report(report: &EvalReport, path: &PathBuf) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {:?}", path))?;
    serde_json::to_writer_pretty(file, report).context("failed to write JSON report")?;
    Ok(())
}

fn render_eval_progress(done: usize, total: usize) {
    if total == 0 {
        return;
    }
    let pct = (done as f64 / total as f64) * 100.0;
    print!("\rEvaluating {done}/{total} ({pct:.1}%)");
    let _ = io::stdout().flush();
}
