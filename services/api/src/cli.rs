use crate::commands::{run_batch, run_catalog, run_dispatch, BatchArgs, CatalogArgs, DispatchArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use flood_dispatch::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "Flood Dispatch",
    about = "Allocate flood-response resources across zones from the command line or over HTTP",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Run a single allocation and print the result
    Dispatch(DispatchArgs),
    /// Show the zones and resource types of the current catalog
    Catalog(CatalogArgs),
    /// Run every scenario of a batch plan and write results to disk
    Batch(BatchArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Dispatch(args) => run_dispatch(args).await,
        Command::Catalog(args) => run_catalog(args),
        Command::Batch(args) => run_batch(args).await,
    }
}
