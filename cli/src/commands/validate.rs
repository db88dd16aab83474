use clap::Args;
use datum_mcp_runtime::TargetArgs;
use datum_mcp_runtime::validate::validate_manifest;
use serde_json::json;

use crate::util::{exit_error, pretty, read_input, report_error};

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Manifest file (use '-' for stdin)
    #[arg(long, short = 'f')]
    pub filename: String,
    #[command(flatten)]
    pub target: TargetArgs,
}

/// Exit code 0 when every document passes, 1 at the first rejection.
pub async fn run(args: ValidateArgs) -> i32 {
    let text = read_input(&args.filename).unwrap_or_else(|e| exit_error(&e, None));
    let state = match args.target.session_state().await {
        Ok(state) => state,
        Err(err) => return report_error(&err),
    };
    let session = state.snapshot().await;
    match validate_manifest(&session, &text).await {
        Ok(report) => {
            println!("{}", pretty(&json!(report)));
            if report.valid { 0 } else { 1 }
        }
        Err(err) => report_error(&err),
    }
}
