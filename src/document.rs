//! Rope-backed storage for open editor documents
//!
//! Commands never read the live buffer; they take a point-in-time `String`
//! snapshot and operate on that, so concurrent edits cannot shift block
//! positions mid-run.

use ropey::Rope;
use tower_lsp::lsp_types::{Position, TextDocumentContentChangeEvent, Url};
use tracing::warn;

#[derive(Debug)]
pub struct DocumentState {
    pub uri: Url,
    pub text: Rope,
    pub version: i32,
}

#[derive(Debug)]
pub struct LspDocument {
    pub id: u32,
    pub state: tokio::sync::RwLock<DocumentState>,
}

fn position_to_char(position: &Position, text: &Rope) -> usize {
    let line = (position.line as usize).min(text.len_lines().saturating_sub(1));
    let line_start = text.line_to_char(line);
    let line_len = text.line(line).len_chars();
    line_start + (position.character as usize).min(line_len)
}

impl DocumentState {
    /// Applies LSP content changes in order. Changes carrying a range edit in
    /// place; a change without a range replaces the whole text.
    pub fn apply(&mut self, changes: Vec<TextDocumentContentChangeEvent>, version: i32) {
        if version <= self.version {
            warn!(
                "Ignoring stale changes for {} (version {} <= {})",
                self.uri, version, self.version
            );
            return;
        }
        for change in changes {
            if let Some(range) = change.range {
                let start = position_to_char(&range.start, &self.text);
                let end = position_to_char(&range.end, &self.text);
                if start <= end && end <= self.text.len_chars() {
                    self.text.remove(start..end);
                    self.text.insert(start, &change.text);
                } else {
                    warn!(
                        "Discarding out-of-bounds change {}..{} for {}",
                        start, end, self.uri
                    );
                }
            } else {
                self.text = Rope::from_str(&change.text);
            }
        }
        self.version = version;
    }
}

impl LspDocument {
    pub fn new(id: u32, uri: Url, text: &str, version: i32) -> Self {
        LspDocument {
            id,
            state: tokio::sync::RwLock::new(DocumentState {
                uri,
                text: Rope::from_str(text),
                version,
            }),
        }
    }

    pub async fn uri(&self) -> Url {
        self.state.read().await.uri.clone()
    }

    /// Point-in-time copy of the buffer.
    pub async fn snapshot(&self) -> String {
        self.state.read().await.text.to_string()
    }

    pub async fn version(&self) -> i32 {
        self.state.read().await.version
    }

    pub async fn num_lines(&self) -> usize {
        self.state.read().await.text.len_lines()
    }

    pub async fn apply(&self, changes: Vec<TextDocumentContentChangeEvent>, version: i32) {
        self.state.write().await.apply(changes, version);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower_lsp::lsp_types::Range;

    fn create_test_document(text: &str) -> LspDocument {
        LspDocument::new(1, Url::parse("file:///notes.md").unwrap(), text, 0)
    }

    #[tokio::test]
    async fn test_apply_full_change() {
        let doc = create_test_document("initial text");
        doc.apply(
            vec![TextDocumentContentChangeEvent {
                range: None,
                range_length: None,
                text: "new text".to_string(),
            }],
            1,
        )
        .await;
        assert_eq!(doc.snapshot().await, "new text");
        assert_eq!(doc.version().await, 1);
    }

    #[tokio::test]
    async fn test_apply_incremental_change() {
        let doc = create_test_document("hello world");
        doc.apply(
            vec![TextDocumentContentChangeEvent {
                range: Some(Range {
                    start: Position { line: 0, character: 6 },
                    end: Position { line: 0, character: 11 },
                }),
                range_length: None,
                text: "there".to_string(),
            }],
            1,
        )
        .await;
        assert_eq!(doc.snapshot().await, "hello there");
    }

    #[tokio::test]
    async fn test_stale_version_is_ignored() {
        let doc = create_test_document("first");
        doc.apply(
            vec![TextDocumentContentChangeEvent {
                range: None,
                range_length: None,
                text: "second".to_string(),
            }],
            2,
        )
        .await;
        doc.apply(
            vec![TextDocumentContentChangeEvent {
                range: None,
                range_length: None,
                text: "stale".to_string(),
            }],
            1,
        )
        .await;
        assert_eq!(doc.snapshot().await, "second", "Stale change must not apply");
        assert_eq!(doc.version().await, 2);
    }

    #[tokio::test]
    async fn test_multiline_edit() {
        let doc = create_test_document("a\nb\nc\n");
        doc.apply(
            vec![TextDocumentContentChangeEvent {
                range: Some(Range {
                    start: Position { line: 1, character: 0 },
                    end: Position { line: 1, character: 1 },
                }),
                range_length: None,
                text: "B".to_string(),
            }],
            1,
        )
        .await;
        assert_eq!(doc.snapshot().await, "a\nB\nc\n");
    }
}
