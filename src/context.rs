//! Renders ranked search hits into the text block handed to the prompt builder.
//!
//! Each hit becomes
//!
//! ```text
//! ### Source: <file name> (score=0.9731)
//! <chunk text>
//! ```
//!
//! and hits are separated by a blank line. Input order is preserved and nothing
//! is dropped, merged or shortened: `k` was already fixed by the caller.

use std::path::Path;

use crate::search::ScoredRecord;

/// Digits after the decimal point in rendered scores.
pub const SCORE_PRECISION: usize = 4;

/// Render `hits` in the order given. An empty slice renders as `""`.
pub fn assemble(hits: &[ScoredRecord]) -> String {
    hits.iter()
        .map(render_hit)
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn render_hit(hit: &ScoredRecord) -> String {
    format!(
        "### Source: {} (score={:.prec$})\n{}",
        display_source(&hit.record.source_location),
        hit.score,
        hit.record.text,
        prec = SCORE_PRECISION
    )
}

/// Final path component of `source_location`, or the whole string when it has
/// none (logical names, `..`).
fn display_source(source_location: &str) -> &str {
    Path::new(source_location)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(source_location)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EmbeddingRecord;

    fn hit(source: &str, text: &str, score: f32) -> ScoredRecord {
        ScoredRecord {
            score,
            record: EmbeddingRecord {
                id: 0,
                source_location: source.into(),
                text: text.into(),
                vector: vec![],
            },
        }
    }

    #[test]
    fn test_assemble_preserves_rank_order_and_provenance() {
        let hits = vec![
            hit("projects/app/beta.py", "def beta(): pass", 0.999_96),
            hit("projects/app/alpha.md", "# Alpha", 0.123_44),
        ];
        assert_eq!(
            assemble(&hits),
            "### Source: beta.py (score=1.0000)\ndef beta(): pass\n\n\
             ### Source: alpha.md (score=0.1234)\n# Alpha"
        );
    }

    #[test]
    fn test_assemble_keeps_duplicates_and_negative_scores() {
        let hits = vec![hit("notes", "same", -0.5), hit("notes", "same", -0.5)];
        let block = assemble(&hits);
        assert_eq!(block.matches("### Source: notes (score=-0.5000)").count(), 2);
    }

    #[test]
    fn test_assemble_empty() {
        assert_eq!(assemble(&[]), "");
    }
}
