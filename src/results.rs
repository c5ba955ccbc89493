//! Delivery of engine output back into the editor
//!
//! Two mutually exclusive modes. Single-block runs land in one logical
//! virtual document whose content is replaced per run and announced with a
//! change notification, so the client can peek it next to the source block.
//! Compile runs substitute every block's result into a working copy of the
//! whole document, which the client opens as a new unsaved file.

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tower_lsp::lsp_types::notification::Notification;
use tower_lsp::lsp_types::{Location, Url};
use tracing::debug;

use crate::blocks::QueryBlock;

/// URI of the single logical results document.
pub const RESULTS_URI: &str = "dynomark-results:///results.md";

/// The virtual read-only results document. One per server; each single-block
/// run overwrites the previous content rather than appending.
#[derive(Debug, Default)]
pub struct ResultsChannel {
    content: RwLock<String>,
}

impl ResultsChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uri() -> Url {
        Url::parse(RESULTS_URI).expect("results URI is valid")
    }

    /// Replaces the document content. The caller follows up with a
    /// [`ResultsDidChange`] notification to the observing client.
    pub async fn replace(&self, content: String) {
        debug!("Replacing results document content ({} bytes)", content.len());
        *self.content.write().await = content;
    }

    pub async fn content(&self) -> String {
        self.content.read().await.clone()
    }
}

/// Server-to-client notice that the results document changed and where to
/// anchor its peek view in the source document.
#[derive(Debug)]
pub enum ResultsDidChange {}

impl Notification for ResultsDidChange {
    type Params = ResultsDidChangeParams;
    const METHOD: &'static str = "dynomark/resultsDidChange";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsDidChangeParams {
    /// URI of the virtual results document
    pub uri: Url,
    /// Closing-fence position of the block that produced the results
    pub anchor: Location,
}

/// Client-to-server pull of the current results content, the read side of
/// the virtual document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsContentParams {
    pub uri: Url,
}

/// Payload handed back for `dynomark.compileDocument`: the compiled text the
/// client should open as a new unsaved document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledDocument {
    pub content: String,
    pub language_id: String,
}

/// Replaces `block`'s original fenced text in `working` with `result`,
/// fences removed.
///
/// The match is an exact literal substring search against the current
/// working copy; earlier substitutions change text length, so positions
/// recorded at extraction time are useless here and content is the only
/// reliable key. Returns `false` when the fenced text can no longer be
/// found (already consumed by an identical earlier block, or overlapping
/// with a prior replacement); the caller skips that block with a warning.
pub fn substitute_block(working: &mut String, block: &QueryBlock, result: &str) -> bool {
    if !working.contains(block.raw.as_str()) {
        return false;
    }
    *working = working.replacen(block.raw.as_str(), result, 1);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::extract_blocks;
    use indoc::indoc;

    #[tokio::test]
    async fn test_results_channel_replaces_content() {
        let channel = ResultsChannel::new();
        channel.replace("first run".to_string()).await;
        channel.replace("second run".to_string()).await;
        assert_eq!(channel.content().await, "second run", "Content replaced, not appended");
    }

    #[test]
    fn test_substitute_removes_fences() {
        let text = "before\n```dynomark\nSELECT x\n```\nafter\n";
        let block = extract_blocks(text).remove(0);
        let mut working = text.to_string();
        assert!(substitute_block(&mut working, &block, "result line"));
        assert_eq!(working, "before\nresult line\nafter\n");
    }

    #[test]
    fn test_substitution_round_trip_leaves_no_fences() {
        let text = indoc! {r#"
            # Doc

            ```dynomark
            LIST FROM #a
            ```

            ```dynomark
            TASK WHERE done
            ```
        "#};
        let blocks = extract_blocks(text);
        let mut working = text.to_string();
        for (i, block) in blocks.iter().enumerate() {
            assert!(substitute_block(&mut working, block, &format!("result {}", i)));
        }
        assert!(
            extract_blocks(&working).is_empty(),
            "Compiled text must contain no remaining dynomark fences"
        );
        assert!(working.contains("result 0"));
        assert!(working.contains("result 1"));
    }

    #[test]
    fn test_identical_blocks_substitute_in_order() {
        let text = "```dynomark\nSELECT x\n```\nmiddle\n```dynomark\nSELECT x\n```\n";
        let blocks = extract_blocks(text);
        assert_eq!(blocks.len(), 2);
        let mut working = text.to_string();
        assert!(substitute_block(&mut working, &blocks[0], "one"));
        assert!(substitute_block(&mut working, &blocks[1], "two"));
        assert_eq!(working, "one\nmiddle\ntwo\n");
    }

    #[test]
    fn test_consumed_block_reports_failure() {
        let text = "```dynomark\nSELECT x\n```\n";
        let blocks = extract_blocks(text);
        let mut working = text.to_string();
        assert!(substitute_block(&mut working, &blocks[0], "gone"));
        assert!(
            !substitute_block(&mut working, &blocks[0], "again"),
            "A block whose fenced text is gone must be reported, not substituted"
        );
        assert_eq!(working, "gone\n");
    }

    #[test]
    fn test_each_substitution_applies_to_prior_result() {
        // The second block sits after the first; replacing the first changes
        // every later offset, so only content matching can find the second.
        let text = "```dynomark\na much longer first query body\n```\nx\n```dynomark\nb\n```\n";
        let blocks = extract_blocks(text);
        let mut working = text.to_string();
        assert!(substitute_block(&mut working, &blocks[0], ""));
        assert!(substitute_block(&mut working, &blocks[1], "B"));
        assert_eq!(working, "\nx\nB\n");
    }
}
