//! Context assembly: fused evidence to labelled text blocks under a budget.
//!
//! ```text
//! Articles:
//! [Source: deadlines.pdf] Early decision closes November 1.
//!
//! [Source: aid.pdf] File the FAFSA by ...
//!
//! Database:
//! [Source: Alpha College (Admission rate: 42%, ...)] Located in ...
//! ```
//!
//! When the rendered text exceeds the budget, the hit with the greatest rank
//! position across both collections is dropped first; on a tie the record
//! goes before the article. Both collections are truncated from the tail, so
//! what remains is always a prefix of each.

use tracing::debug;

use super::fusion::FusedEvidenceSet;
use crate::retrieval::{HitPayload, RetrievalHit};

pub const ARTICLES_HEADER: &str = "Articles:";
pub const RECORDS_HEADER: &str = "Database:";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssembledContext {
    pub text: String,
    pub articles_included: usize,
    pub records_included: usize,
    /// Hits removed to fit the budget.
    pub dropped: usize,
}

impl AssembledContext {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}

/// Human-readable source label for one hit.
pub fn label(hit: &RetrievalHit) -> String {
    match &hit.payload {
        HitPayload::Article { document_name } => document_name.clone(),
        HitPayload::Record(summary) => {
            let mut stats = Vec::new();
            if let Some(rate) = summary.admission_rate {
                stats.push(format!("Admission rate: {}", percent(rate)));
            }
            if let Some(rate) = summary.graduation_rate {
                stats.push(format!("Graduation rate: {}", percent(rate)));
            }
            if let Some(n) = summary.enrollment {
                stats.push(format!("Enrollment: {n}"));
            }
            if stats.is_empty() {
                summary.name.clone()
            } else {
                format!("{} ({})", summary.name, stats.join(", "))
            }
        }
    }
}

fn percent(fraction: f64) -> String {
    format!("{:.0}%", fraction * 100.0)
}

pub fn render_line(hit: &RetrievalHit) -> String {
    format!("[Source: {}] {}", label(hit), hit.rendered_text)
}

/// Render `evidence` into at most `max_chars` characters.
pub fn assemble(evidence: &FusedEvidenceSet, max_chars: usize) -> AssembledContext {
    let article_lines: Vec<String> = evidence.articles.iter().map(render_line).collect();
    let record_lines: Vec<String> = evidence.records.iter().map(render_line).collect();

    let (mut na, mut nr) = (article_lines.len(), record_lines.len());
    let mut text = render(&article_lines[..na], &record_lines[..nr]);
    let mut dropped = 0usize;

    while text.chars().count() > max_chars && na + nr > 0 {
        // Compare the last remaining position of each collection.
        let drop_record = match (na, nr) {
            (_, 0) => false,
            (0, _) => true,
            (na, nr) => nr >= na,
        };
        if drop_record {
            nr -= 1;
        } else {
            na -= 1;
        }
        dropped += 1;
        text = render(&article_lines[..na], &record_lines[..nr]);
    }

    if dropped > 0 {
        debug!(dropped, kept_articles = na, kept_records = nr, max_chars, "evidence trimmed to budget");
    }

    AssembledContext { text, articles_included: na, records_included: nr, dropped }
}

fn render(articles: &[String], records: &[String]) -> String {
    let mut sections = Vec::with_capacity(2);
    if !articles.is_empty() {
        sections.push(format!("{ARTICLES_HEADER}\n{}", articles.join("\n\n")));
    }
    if !records.is_empty() {
        sections.push(format!("{RECORDS_HEADER}\n{}", records.join("\n\n")));
    }
    sections.join("\n\n")
}
