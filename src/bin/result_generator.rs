use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use knowlex::{logging, Pipeline, RetrievalResult, ServiceArgs};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Parser, Debug)]
#[command(
    name = "knowlex-results",
    about = "Answer a JSON Lines question file and write one retrieval result per line"
)]
struct ResultsCli {
    /// Input file with one `{"id": ..., "query": ...}` object per line.
    #[arg(long, env = "KNOWLEX_QUESTIONS", default_value = "test_questions.jsonl")]
    questions: PathBuf,

    /// Output JSON Lines file.
    #[arg(long, env = "KNOWLEX_RESULTS", default_value = "output/results.jsonl")]
    output: PathBuf,

    #[command(flatten)]
    service: ServiceArgs,
}

#[derive(Debug, Deserialize)]
struct Question {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    query: Option<String>,
}

#[derive(Debug, Serialize)]
struct AnswerLine<'a> {
    id: &'a str,
    answer: &'a RetrievalResult,
}

fn main() -> Result<()> {
    logging::init();
    let cli = ResultsCli::parse();
    let questions = load_questions(&cli.questions)?;
    println!("loaded {} questions from {:?}", questions.len(), cli.questions);
    let pipeline = cli.service.build_pipeline()?;
    if let Some(parent) = cli.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {:?}", parent))?;
    }
    let file =
        File::create(&cli.output).with_context(|| format!("failed to create {:?}", cli.output))?;
    let written = write_answers(&pipeline, &questions, BufWriter::new(file))?;
    println!();
    println!("wrote {written} answers to {:?}", cli.output);
    Ok(())
}

fn load_questions(path: &PathBuf) -> Result<Vec<Question>> {
    let file = File::open(path).with_context(|| format!("question file not found: {:?}", path))?;
    let mut questions = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", idx + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let question: Question = serde_json::from_str(&line)
            .with_context(|| format!("invalid question record at line {}", idx + 1))?;
        questions.push(question);
    }
    Ok(questions)
}

fn write_answers<W: Write>(pipeline: &Pipeline, questions: &[Question], mut out: W) -> Result<usize> {
    let total = questions.len();
    let mut written = 0usize;
    for (idx, question) in questions.iter().enumerate() {
        let (Some(id), Some(query)) = (question.id.as_deref(), question.query.as_deref()) else {
            warn!(line = idx + 1, "skipping question without id or query");
            continue;
        };
        if id.is_empty() || query.trim().is_empty() {
            warn!(line = idx + 1, "skipping question without id or query");
            continue;
        }
        let answer = pipeline
            .run(query)
            .with_context(|| format!("question {id} failed"))?;
        serde_json::to_writer(&mut out, &AnswerLine { id, answer: &answer })
            .context("failed to serialize answer")?;
        out.write_all(b"\n").context("failed to write answer")?;
        written += 1;
        render_progress(idx + 1, total);
    }
    out.flush().context("failed to flush results")?;
    Ok(written)
}

fn render_progress(done: usize, total: usize) {
    if total == 0 {
        return;
    }
    let pct = (done as f64 / total as f64) * 100.0;
    print!("\rAnswering {done}/{total} ({pct:.1}%)");
    let _ = io::stdout().flush();
}
