//! Offline retrieval quality measurement against labeled locations.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::model::{LocationKey, ScoredCandidate};
use crate::pipeline::Pipeline;

/// One labeled query.
#[derive(Debug, Clone, Deserialize)]
pub struct EvalCase {
    /// Question text.
    pub query: String,
    /// Pages that contain a correct answer.
    #[serde(default)]
    pub relevant: Vec<LocationKey>,
    /// Free-form annotation.
    #[serde(default)]
    pub notes: Option<String>,
}

/// One returned clause, annotated with whether it hit a labeled page.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedClauseReport {
    /// Source document.
    pub doc_name: String,
    /// Page number.
    pub page: u32,
    /// Clause identifier.
    pub clause_id: String,
    /// Cross-encoder score.
    pub rerank_score: f32,
    /// 1-based rank after rerank.
    pub rank: usize,
    /// Whether the location is labeled relevant.
    pub hit: bool,
    /// First characters of the clause.
    pub text_preview: String,
}

/// Per-query outcome.
#[derive(Debug, Serialize)]
pub struct CaseReport {
    /// Question text.
    pub query: String,
    /// Labeled pages.
    pub relevant: Vec<LocationKey>,
    /// Annotation copied from the case.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Share of labeled pages retrieved; `None` without labels.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recall: Option<f64>,
    /// Rank of the first hit.
    pub best_rank: Option<usize>,
    /// Wall time of the pipeline run.
    pub latency_ms: f64,
    /// Images returned alongside the clauses.
    pub image_count: usize,
    /// Returned clauses.
    pub retrieved: Vec<RetrievedClauseReport>,
}

/// Aggregate metrics.
#[derive(Debug, Serialize)]
pub struct EvalSummary {
    /// Number of evaluated cases.
    pub total_cases: usize,
    /// Share of cases with at least one hit.
    pub hit_rate: f64,
    /// Mean recall over labeled cases.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_recall: Option<f64>,
    /// Mean reciprocal rank of the first hit.
    pub mean_reciprocal_rank: f64,
    /// Mean pipeline latency.
    pub avg_latency_ms: f64,
    /// Clauses kept per query.
    pub top_n: usize,
}

/// Full evaluation output.
#[derive(Debug, Serialize)]
pub struct EvalReport {
    /// Aggregates.
    pub summary: EvalSummary,
    /// Per-case details.
    pub cases: Vec<CaseReport>,
}

/// Reads JSON Lines cases, skipping blank lines.
pub fn load_cases(path: &Path) -> Result<Vec<EvalCase>> {
    let file = File::open(path).with_context(|| format!("failed to open {:?}", path))?;
    let reader = BufReader::new(file);
    let mut cases = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read evaluation line {}", idx + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let case: EvalCase = serde_json::from_str(&line)
            .with_context(|| format!("invalid evaluation record at line {}", idx + 1))?;
        cases.push(case);
    }
    Ok(cases)
}

/// Runs every case through `pipeline`, calling `on_progress(done, total)` after each.
/// A fatal pipeline error aborts the evaluation.
pub fn evaluate<F>(pipeline: &Pipeline, cases: Vec<EvalCase>, mut on_progress: F) -> Result<EvalReport>
where
    F: FnMut(usize, usize),
{
    let total = cases.len();
    let mut reports = Vec::with_capacity(total);
    for (idx, case) in cases.into_iter().enumerate() {
        let start = Instant::now();
        let result = pipeline
            .run(&case.query)
            .with_context(|| format!("case {} ({:?}) failed", idx + 1, case.query))?;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        let mut report = build_case_report(case, &result.clauses);
        report.latency_ms = latency_ms;
        report.image_count = result.images.len();
        reports.push(report);
        on_progress(idx + 1, total);
    }
    Ok(EvalReport {
        summary: summarize(&reports, pipeline.config().top_n),
        cases: reports,
    })
}

fn build_case_report(case: EvalCase, clauses: &[ScoredCandidate]) -> CaseReport {
    let relevant: HashSet<&LocationKey> = case.relevant.iter().collect();
    let mut matched = HashSet::new();
    let mut best_rank = None;
    let mut retrieved = Vec::with_capacity(clauses.len());
    for (idx, candidate) in clauses.iter().enumerate() {
        let location = candidate.chunk.location();
        let hit = relevant.contains(&location);
        if hit {
            best_rank.get_or_insert(idx + 1);
            matched.insert(location);
        }
        retrieved.push(RetrievedClauseReport {
            doc_name: candidate.chunk.source_document.clone(),
            page: candidate.chunk.page_number,
            clause_id: candidate.chunk.clause_identifier.clone(),
            rerank_score: candidate.rerank_score,
            rank: idx + 1,
            hit,
            text_preview: snippet(&candidate.chunk.content),
        });
    }
    let recall = if relevant.is_empty() {
        None
    } else {
        Some(matched.len() as f64 / relevant.len() as f64)
    };
    CaseReport {
        query: case.query,
        relevant: case.relevant,
        notes: case.notes,
        recall,
        best_rank,
        latency_ms: 0.0,
        image_count: 0,
        retrieved,
    }
}

fn summarize(reports: &[CaseReport], top_n: usize) -> EvalSummary {
    let total_cases = reports.len();
    let mean = |sum: f64, count: usize| if count == 0 { 0.0 } else { sum / count as f64 };
    let hits = reports.iter().filter(|r| r.best_rank.is_some()).count();
    let rr_sum: f64 = reports
        .iter()
        .filter_map(|r| r.best_rank)
        .map(|rank| 1.0 / rank as f64)
        .sum();
    let recalls: Vec<f64> = reports.iter().filter_map(|r| r.recall).collect();
    let latency_sum: f64 = reports.iter().map(|r| r.latency_ms).sum();
    EvalSummary {
        total_cases,
        hit_rate: mean(hits as f64, total_cases),
        mean_recall: if recalls.is_empty() {
            None
        } else {
            Some(recalls.iter().sum::<f64>() / recalls.len() as f64)
        },
        mean_reciprocal_rank: mean(rr_sum, total_cases),
        avg_latency_ms: mean(latency_sum, total_cases),
        top_n,
    }
}

fn snippet(text: &str) -> String {
    const MAX_CHARS: usize = 120;
    if text.chars().count() <= MAX_CHARS {
        return text.to_string();
    }
    let mut out: String = text.chars().take(MAX_CHARS).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TextChunk;
    use std::io::Write;

    fn clause(doc: &str, page: u32) -> ScoredCandidate {
        ScoredCandidate {
            chunk: TextChunk {
                content: "条文".repeat(100),
                source_document: doc.into(),
                page_number: page,
                clause_identifier: String::new(),
                embedding: Vec::new(),
            },
            coarse_rank: 1,
            rerank_score: 0.0,
        }
    }

    #[test]
    fn report_tracks_first_hit_and_recall() {
        let case = EvalCase {
            query: "q".into(),
            relevant: vec![LocationKey::new("B", 2), LocationKey::new("C", 9)],
            notes: None,
        };
        let report = build_case_report(case, &[clause("A", 1), clause("B", 2), clause("B", 2)]);
        assert_eq!(report.best_rank, Some(2));
        assert_eq!(report.recall, Some(0.5));
        assert!(report.retrieved[2].hit);
        assert!(report.retrieved[0].text_preview.ends_with('…'));
    }

    #[test]
    fn summary_averages_over_cases() {
        let hit = build_case_report(
            EvalCase {
                query: "a".into(),
                relevant: vec![LocationKey::new("A", 1)],
                notes: None,
            },
            &[clause("X", 1), clause("A", 1)],
        );
        let miss = build_case_report(
            EvalCase {
                query: "b".into(),
                relevant: Vec::new(),
                notes: None,
            },
            &[clause("X", 1)],
        );
        let summary = summarize(&[hit, miss], 3);
        assert_eq!(summary.total_cases, 2);
        assert_eq!(summary.hit_rate, 0.5);
        assert_eq!(summary.mean_reciprocal_rank, 0.25);
        assert_eq!(summary.mean_recall, Some(1.0));
    }

    #[test]
    fn loads_cases_skipping_blank_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"query":"地下室穿墙管渗漏","relevant":[{{"doc_name":"GB50108.pdf","page":12}}]}}"#
        )
        .unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"query":"防水等级"}}"#).unwrap();
        let cases = load_cases(file.path()).unwrap();
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].relevant, vec![LocationKey::new("GB50108.pdf", 12)]);
        assert!(cases[1].relevant.is_empty());
    }
}
