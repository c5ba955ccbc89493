//! Fenced query-block discovery in markdown documents
//!
//! Locates ```` ```dynomark ```` fenced regions and exposes them either as an
//! ordered sequence or by the cursor line they enclose. This is a locator for
//! embedded query text, not a markdown parser: nested or malformed fences are
//! out of contract.

use once_cell::sync::Lazy;
use regex::Regex;

/// Matches an opening dynomark fence (trailing blanks tolerated), the
/// inner text, and the nearest bare closing fence. Non-greedy, so an
/// unterminated block never matches.
static FENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"```dynomark[ \t\r]*\n((?s:.*?))\n```")
        .expect("fence regex is valid")
});

/// A fenced query block found in a document snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryBlock {
    /// Inner text with surrounding whitespace trimmed, ready to hand to the engine
    pub query: String,
    /// The exact fenced text as it appears in the document, fences included.
    /// Compile mode substitutes on this, not on stored offsets.
    pub raw: String,
    /// 0-based line of the opening fence
    pub start_line: usize,
    /// 0-based line of the closing fence
    pub end_line: usize,
}

impl QueryBlock {
    /// Whether `line` falls within this block's fence span (inclusive)
    pub fn contains_line(&self, line: usize) -> bool {
        line >= self.start_line && line <= self.end_line
    }
}

/// Scans `text` for dynomark blocks, yielding them lazily in document order.
///
/// Both query modes go through this one scanner so they cannot drift apart in
/// what they accept as a fence.
pub fn blocks(text: &str) -> impl Iterator<Item = QueryBlock> + '_ {
    FENCE_RE.captures_iter(text).map(move |caps| {
        let whole = caps.get(0).expect("capture group 0 is the whole match");
        let inner = caps.get(1).expect("fence regex has one capture group");
        let start_line = count_newlines(&text[..whole.start()]);
        let end_line = count_newlines(&text[..whole.end()]);
        QueryBlock {
            query: inner.as_str().trim().to_string(),
            raw: whole.as_str().to_string(),
            start_line,
            end_line,
        }
    })
}

/// Every dynomark block in the document, in order of occurrence.
pub fn extract_blocks(text: &str) -> Vec<QueryBlock> {
    blocks(text).collect()
}

/// The block whose fence span contains `line`, if any.
///
/// # Arguments
/// * `text` - Full document snapshot
/// * `line` - 0-based cursor line
pub fn block_at_line(text: &str, line: usize) -> Option<QueryBlock> {
    blocks(text).find(|block| block.contains_line(line))
}

fn count_newlines(text: &str) -> usize {
    text.bytes().filter(|b| *b == b'\n').count()
}
