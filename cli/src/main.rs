mod commands;
mod util;

use clap::{Parser, Subcommand};
use datum_mcp_runtime::McpCommands;
use datum_mcp_runtime::util::{LogFormat, init_logging};

use commands::discovery::{ApiResourcesArgs, ApiVersionsArgs};
use commands::get::GetArgs;
use commands::validate::ValidateArgs;

#[derive(Parser)]
#[command(
    name = "datumctl",
    version,
    about = "Datum Cloud CLI: inspect and manage control-plane resources"
)]
struct Cli {
    /// Log output format (logs always go to stderr)
    #[arg(long, env = "DATUM_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Model Context Protocol server for agents
    Mcp {
        #[command(subcommand)]
        command: McpCommands,
    },
    /// Show one resource or list a kind
    Get(GetArgs),
    /// List the resource types the control plane serves
    ApiResources(ApiResourcesArgs),
    /// List the group/versions the control plane serves
    ApiVersions(ApiVersionsArgs),
    /// Validate a manifest with server-side dry-run creates
    Validate(ValidateArgs),
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_logging(cli.log_format);

    let code = match cli.command {
        Commands::Mcp { command } => datum_mcp_runtime::run(command).await,
        Commands::Get(args) => commands::get::run(args).await,
        Commands::ApiResources(args) => commands::discovery::run_api_resources(args).await,
        Commands::ApiVersions(args) => commands::discovery::run_api_versions(args).await,
        Commands::Validate(args) => commands::validate::run(args).await,
    };
    std::process::exit(code);
}
