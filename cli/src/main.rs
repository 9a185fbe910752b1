mod arg_parser;
mod commands;

use arg_parser::{ArgParser, SubCommand};
use commands::OutputMode;

use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let args = ArgParser::parse();
    init_tracing(args.json);

    let code = match args.sub_command {
        SubCommand::Run { job_file } => {
            let mode = if args.json {
                OutputMode::Events
            } else {
                OutputMode::Terminal
            };
            commands::run(&job_file, &args.runtime, mode).await
        }
        SubCommand::Kill { base_path } => commands::kill(&base_path).await,
        SubCommand::Status { base_path } => commands::status(&base_path).await,
    };
    ExitCode::from(code)
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        // stdout belongs to the script
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}
