//! tower-lsp backend wiring the block extractor, engine, and result sink
//! together behind two `workspace/executeCommand` commands.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::RwLock;
use tower_lsp::lsp_types::{
    DidChangeTextDocumentParams, DidCloseTextDocumentParams, DidOpenTextDocumentParams,
    DidSaveTextDocumentParams, ExecuteCommandOptions, ExecuteCommandParams, InitializeParams,
    InitializeResult, InitializedParams, Location, MessageActionItem, MessageType, Position,
    Range, ServerCapabilities, ServerInfo, TextDocumentSyncCapability, TextDocumentSyncKind, Url,
};
use tower_lsp::{Client, LanguageServer, jsonrpc};
use tracing::{debug, info, warn};

use crate::blocks::{self, QueryBlock};
use crate::document::LspDocument;
use crate::engine::{
    EngineError, EngineLocation, MAX_ATTEMPTS, fetch_engine, resolve_engine, run_with_retry,
};
use crate::results::{
    CompiledDocument, ResultsChannel, ResultsContentParams, ResultsDidChange,
    ResultsDidChangeParams, substitute_block,
};

/// Runs the block under the cursor and shows the result in a peek view.
pub const CMD_RUN_BLOCK: &str = "dynomark.runBlock";
/// Replaces every block in the document with its result in a new unsaved copy.
pub const CMD_COMPILE_DOCUMENT: &str = "dynomark.compileDocument";

const DOWNLOAD_ACTION: &str = "Download dynomark";

/// Arguments for `dynomark.runBlock`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunBlockArgs {
    uri: Url,
    /// 0-based cursor line
    line: u32,
}

/// Arguments for `dynomark.compileDocument`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompileArgs {
    uri: Url,
}

#[derive(Debug)]
pub struct DynomarkBackend {
    client: Client,
    documents_by_uri: Arc<RwLock<HashMap<Url, Arc<LspDocument>>>>,
    serial_document_id: Arc<AtomicU32>,
    /// Private storage directory holding the downloaded engine
    storage_dir: PathBuf,
    results: Arc<ResultsChannel>,
}

impl DynomarkBackend {
    pub fn new(client: Client, storage_dir: PathBuf) -> Self {
        DynomarkBackend {
            client,
            documents_by_uri: Arc::new(RwLock::new(HashMap::new())),
            serial_document_id: Arc::new(AtomicU32::new(0)),
            storage_dir,
            results: Arc::new(ResultsChannel::new()),
        }
    }

    fn next_document_id(&self) -> u32 {
        self.serial_document_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn document(&self, uri: &Url) -> Option<Arc<LspDocument>> {
        self.documents_by_uri.read().await.get(uri).cloned()
    }

    async fn show_error(&self, message: impl Into<String>) {
        self.client
            .show_message(MessageType::ERROR, message.into())
            .await;
    }

    /// Read side of the virtual results document, registered as the custom
    /// method `dynomark/resultsContent`.
    pub async fn results_content(&self, params: ResultsContentParams) -> jsonrpc::Result<String> {
        if params.uri != ResultsChannel::uri() {
            return Err(jsonrpc::Error::invalid_params(format!(
                "not a results document: {}",
                params.uri
            )));
        }
        Ok(self.results.content().await)
    }

    /// Resolves the engine, or walks the user through downloading it.
    ///
    /// Returns `None` when no engine is usable for this invocation. After a
    /// confirmed download the path is announced and the user re-triggers the
    /// command; there is no implicit re-dispatch.
    async fn resolve_or_offer_download(&self) -> Option<EngineLocation> {
        match resolve_engine(&self.storage_dir).await {
            Ok(location) => Some(location),
            Err(EngineError::NotAvailable) => {
                self.offer_download().await;
                None
            }
            Err(other) => {
                self.show_error(other.to_string()).await;
                None
            }
        }
    }

    async fn offer_download(&self) {
        let action = MessageActionItem {
            title: DOWNLOAD_ACTION.to_string(),
            properties: Default::default(),
        };
        let choice = self
            .client
            .show_message_request(
                MessageType::ERROR,
                "dynomark is not available on this system.".to_string(),
                Some(vec![action]),
            )
            .await;
        match choice {
            Ok(Some(item)) if item.title == DOWNLOAD_ACTION => {
                match fetch_engine(&self.storage_dir).await {
                    Ok(path) => {
                        self.client
                            .show_message(
                                MessageType::INFO,
                                format!("dynomark downloaded to {}", path.display()),
                            )
                            .await;
                    }
                    Err(e) => {
                        self.show_error(format!("Failed to download dynomark: {}", e))
                            .await;
                    }
                }
            }
            Ok(_) => debug!("Download declined"),
            Err(e) => warn!("showMessageRequest failed: {}", e),
        }
    }

    /// Surfaces engine stderr as a non-fatal warning, success or not.
    async fn surface_stderr(&self, stderr: &Option<String>) {
        if let Some(stderr) = stderr {
            self.client
                .show_message(MessageType::WARNING, format!("dynomark: {}", stderr))
                .await;
        }
    }

    async fn run_block(&self, arguments: Vec<Value>) -> jsonrpc::Result<Option<Value>> {
        let args: RunBlockArgs = match parse_args(arguments) {
            Ok(args) => args,
            Err(message) => {
                self.show_error(message).await;
                return Ok(None);
            }
        };

        let Some(document) = self.document(&args.uri).await else {
            self.show_error(format!("No open document for {}", args.uri))
                .await;
            return Ok(None);
        };
        let text = document.snapshot().await;

        let Some(block) = blocks::block_at_line(&text, args.line as usize) else {
            self.client
                .show_message(
                    MessageType::INFO,
                    "Cursor is not inside a dynomark code block.",
                )
                .await;
            return Ok(None);
        };

        let Some(engine) = self.resolve_or_offer_download().await else {
            return Ok(None);
        };

        // Relative paths in the query resolve against the host document.
        let working_dir = args
            .uri
            .to_file_path()
            .ok()
            .and_then(|path| path.parent().map(PathBuf::from));

        match run_with_retry(&engine, &block.query, working_dir.as_deref(), MAX_ATTEMPTS).await {
            Ok(output) => {
                self.surface_stderr(&output.stderr).await;
                let Some(anchor) = self.anchor_for(&document, &block).await else {
                    self.show_error("Cannot anchor results: block end is outside the document.")
                        .await;
                    return Ok(None);
                };
                self.results.replace(output.stdout).await;
                self.client
                    .send_notification::<ResultsDidChange>(ResultsDidChangeParams {
                        uri: ResultsChannel::uri(),
                        anchor,
                    })
                    .await;
                info!(
                    "Ran block at lines {}..={} of {}",
                    block.start_line, block.end_line, args.uri
                );
                Ok(None)
            }
            Err(error) => {
                self.show_error(format!("Error running dynomark: {}", error))
                    .await;
                Ok(None)
            }
        }
    }

    /// Peek anchor at the block's closing fence, if that line still exists.
    async fn anchor_for(&self, document: &LspDocument, block: &QueryBlock) -> Option<Location> {
        if block.end_line >= document.num_lines().await {
            return None;
        }
        let position = Position::new(block.end_line as u32, 0);
        Some(Location {
            uri: document.uri().await,
            range: Range {
                start: position,
                end: position,
            },
        })
    }

    async fn compile_document(&self, arguments: Vec<Value>) -> jsonrpc::Result<Option<Value>> {
        let args: CompileArgs = match parse_args(arguments) {
            Ok(args) => args,
            Err(message) => {
                self.show_error(message).await;
                return Ok(None);
            }
        };

        let Some(document) = self.document(&args.uri).await else {
            self.show_error(format!("No open document for {}", args.uri))
                .await;
            return Ok(None);
        };
        let text = document.snapshot().await;
        let query_blocks = blocks::extract_blocks(&text);
        info!(
            "Compiling {} with {} dynomark blocks",
            args.uri,
            query_blocks.len()
        );

        let Some(engine) = self.resolve_or_offer_download().await else {
            return Ok(None);
        };

        // Blocks run one at a time, in document order: at most one engine
        // process in flight, and every substitution lands on the text the
        // previous ones produced. Compile runs keep the server's own working
        // directory; only single-block runs anchor to the document's.
        let mut working = text.clone();
        for (index, block) in query_blocks.iter().enumerate() {
            match run_with_retry(&engine, &block.query, None, MAX_ATTEMPTS).await {
                Ok(output) => {
                    self.surface_stderr(&output.stderr).await;
                    if !substitute_block(&mut working, block, &output.stdout) {
                        warn!(
                            "Block {} (lines {}..={}) not found for substitution",
                            index + 1,
                            block.start_line,
                            block.end_line
                        );
                        self.client
                            .show_message(
                                MessageType::WARNING,
                                format!(
                                    "Skipped block {}: its original text was not found for substitution.",
                                    index + 1
                                ),
                            )
                            .await;
                    }
                }
                Err(error) => {
                    self.client
                        .show_message(
                            MessageType::WARNING,
                            format!("Block {} failed: {}", index + 1, error),
                        )
                        .await;
                }
            }
        }

        let compiled = CompiledDocument {
            content: working,
            language_id: "markdown".to_string(),
        };
        serde_json::to_value(compiled)
            .map(Some)
            .map_err(|e| jsonrpc::Error::invalid_params(e.to_string()))
    }
}

fn parse_args<T: DeserializeOwned>(arguments: Vec<Value>) -> Result<T, String> {
    let first = arguments
        .into_iter()
        .next()
        .ok_or_else(|| "Missing command arguments".to_string())?;
    serde_json::from_value(first).map_err(|e| format!("Malformed command arguments: {}", e))
}

#[tower_lsp::async_trait]
impl LanguageServer for DynomarkBackend {
    async fn initialize(&self, _params: InitializeParams) -> jsonrpc::Result<InitializeResult> {
        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Kind(
                    TextDocumentSyncKind::INCREMENTAL,
                )),
                execute_command_provider: Some(ExecuteCommandOptions {
                    commands: vec![CMD_RUN_BLOCK.to_string(), CMD_COMPILE_DOCUMENT.to_string()],
                    work_done_progress_options: Default::default(),
                }),
                ..Default::default()
            },
            server_info: Some(ServerInfo {
                name: "dynomark-language-server".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
            ..Default::default()
        })
    }

    async fn initialized(&self, _params: InitializedParams) {
        info!("Server initialized");
    }

    async fn shutdown(&self) -> jsonrpc::Result<()> {
        info!("Received shutdown request");
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let uri = params.text_document.uri;
        let version = params.text_document.version;
        let id = self.next_document_id();
        let document = Arc::new(LspDocument::new(
            id,
            uri.clone(),
            &params.text_document.text,
            version,
        ));
        self.documents_by_uri
            .write()
            .await
            .insert(uri.clone(), document);
        info!("Opened document: URI={}, id={}, version={}", uri, id, version);
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;
        let version = params.text_document.version;
        if let Some(document) = self.document(&uri).await {
            document.apply(params.content_changes, version).await;
            debug!("Updated document: URI={}, version={}", uri, version);
        } else {
            warn!("Change for unknown document: URI={}", uri);
        }
    }

    async fn did_save(&self, params: DidSaveTextDocumentParams) {
        debug!("textDocument/didSave: URI={}", params.text_document.uri);
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        if let Some(document) = self.documents_by_uri.write().await.remove(&uri) {
            info!("Closed document: URI={}, id={}", uri, document.id);
        } else {
            warn!("Close for unknown document: URI={}", uri);
        }
    }

    async fn execute_command(
        &self,
        params: ExecuteCommandParams,
    ) -> jsonrpc::Result<Option<Value>> {
        info!("workspace/executeCommand: {}", params.command);
        match params.command.as_str() {
            CMD_RUN_BLOCK => self.run_block(params.arguments).await,
            CMD_COMPILE_DOCUMENT => self.compile_document(params.arguments).await,
            other => {
                warn!("Unknown command: {}", other);
                Ok(None)
            }
        }
    }
}
