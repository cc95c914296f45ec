//! Idempotent upsert of a named, delimited block inside a larger text blob.
//!
//! A block is `START\n<body>\nEND` with both markers on their own lines. The
//! merger only ever rewrites the first matching region; all other text,
//! including blocks owned by other writers, is left byte-identical.

use regex::Regex;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerPair {
    pub start: &'static str,
    pub end: &'static str,
}

impl MarkerPair {
    pub const fn new(start: &'static str, end: &'static str) -> Self {
        MarkerPair { start, end }
    }

    fn pattern(&self) -> Regex {
        let src = format!(r"(?ms)^{}\n(.*?)\n{}$", regex::escape(self.start), regex::escape(self.end));
        Regex::new(&src).expect("escaped marker literals always compile")
    }

    fn render(&self, body: &str) -> String {
        format!("{}\n{}\n{}", self.start, body, self.end)
    }
}

/// Stand-alone target list artifact.
pub const TARGET_LIST: MarkerPair = MarkerPair::new("PT_TARGET_LIST_START", "PT_TARGET_LIST_END");
/// Scanner targets embedded in the product type description.
pub const SCANNER_TARGETS: MarkerPair = MarkerPair::new("PT_ACUNETIX_TARGETS_START", "PT_ACUNETIX_TARGETS_END");
/// Owned by the state-machine workflows; never written here.
pub const STATE_JSON: MarkerPair = MarkerPair::new("PT_STATE_JSON_START", "PT_STATE_JSON_END");

/// Replace the first `markers` block in `blob` with `body`, or append a new block.
///
/// An empty blob becomes exactly the block. A non-empty blob gets the block after a
/// blank line. Markers only count when they fill a whole line, so a line such as
/// `END trailing` is not a marker and the block is appended instead.
pub fn upsert(blob: &str, markers: MarkerPair, body: &str) -> String {
    let block = markers.render(body);
    if let Some(found) = markers.pattern().find(blob) {
        let mut out = String::with_capacity(blob.len() + block.len());
        out.push_str(&blob[..found.start()]);
        out.push_str(&block);
        out.push_str(&blob[found.end()..]);
        return out;
    }
    if blob.is_empty() {
        block
    } else if blob.ends_with('\n') {
        format!("{blob}\n{block}")
    } else {
        format!("{blob}\n\n{block}")
    }
}

/// Body of the single `markers` block in `blob`.
///
/// Strict: fails when the block is absent, when a marker appears more than once, or
/// when the markers are not on their own lines.
pub fn extract(blob: &str, markers: MarkerPair) -> Result<String> {
    let starts = count_marker_lines(blob, markers.start);
    let ends = count_marker_lines(blob, markers.end);
    if starts > 1 || ends > 1 {
        return Err(Error::format(format!(
            "{} block occurs more than once ({starts} start, {ends} end markers)",
            markers.start
        )));
    }
    let caps = markers
        .pattern()
        .captures(blob)
        .ok_or_else(|| Error::format(format!("{}/{} markers are missing or malformed", markers.start, markers.end)))?;
    Ok(caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default())
}

/// [`upsert`] followed by the round-trip self-check that must pass before the
/// result is written anywhere durable.
pub fn upsert_verified(blob: &str, markers: MarkerPair, body: &str) -> Result<String> {
    let merged = upsert(blob, markers, body);
    let recovered = extract(&merged, markers)?;
    if recovered != body {
        return Err(Error::format(format!(
            "{} self-check failed: recovered body differs from the intended body",
            markers.start
        )));
    }
    Ok(merged)
}

fn count_marker_lines(blob: &str, marker: &str) -> usize {
    blob.lines().filter(|l| *l == marker).count()
}
