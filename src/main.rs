use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tower_lsp::{LspService, Server};
use tracing::info;

use dynomark_language_server::backend::DynomarkBackend;
use dynomark_language_server::logging::init_logger;

/// LSP integration for the dynomark markdown query engine
#[derive(Parser, Debug)]
#[command(name = "dynomark-language-server")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Runs dynomark query blocks embedded in markdown documents")]
struct Args {
    /// Log level for stderr output (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Disable ANSI colors in stderr output
    #[arg(long)]
    no_color: bool,

    /// Disable the DEBUG-level session log file
    #[arg(long)]
    no_file_log: bool,

    /// Directory holding the downloaded engine binary
    /// (defaults to the server's private data directory)
    #[arg(long)]
    storage_dir: Option<PathBuf>,
}

fn default_storage_dir() -> anyhow::Result<PathBuf> {
    let data_dir = dirs::data_local_dir().context("unable to determine user data directory")?;
    Ok(data_dir.join("dynomark-language-server"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let _guard = init_logger(args.no_color, args.log_level.as_deref(), !args.no_file_log)
        .context("failed to initialize logging")?;

    let storage_dir = match args.storage_dir {
        Some(dir) => dir,
        None => default_storage_dir()?,
    };
    info!(
        "dynomark-language-server {} starting (storage: {})",
        env!("CARGO_PKG_VERSION"),
        storage_dir.display()
    );

    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let (service, socket) = LspService::build(|client| DynomarkBackend::new(client, storage_dir))
        .custom_method("dynomark/resultsContent", DynomarkBackend::results_content)
        .finish();

    Server::new(stdin, stdout, socket).serve(service).await;

    info!("Server exited");
    Ok(())
}
