use std::process::ExitCode;

use clap::Parser;

use hashhedge_lib::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    hashhedge_lib::init_logging();

    match hashhedge_lib::run(Cli::parse()).await {
        Ok(output) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&output).unwrap_or_else(|_| output.to_string())
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{e}");
            eprintln!("{}", serde_json::json!({ "error": e.to_string() }));
            ExitCode::FAILURE
        }
    }
}
