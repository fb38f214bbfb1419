use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    switchboard_cli::run().await
}
