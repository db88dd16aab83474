use clap::Parser;

use datum_mcp_runtime::util::{LogFormat, init_logging};
use datum_mcp_runtime::{McpCommands, run};

#[derive(Parser)]
#[command(
    name = "datum-mcp",
    version,
    about = "Datum MCP server: control-plane tools over stdio"
)]
struct Cli {
    /// Log output format (logs always go to stderr)
    #[arg(long, env = "DATUM_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: McpCommands,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_logging(cli.log_format);

    let code = run(cli.command).await;
    std::process::exit(code);
}
