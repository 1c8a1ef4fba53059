mod app;
mod cli;
mod output;

use std::process::ExitCode;

use app::App;
use clap::Parser;
use cli::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    app::init_logger(cli.verbose);

    let app = App::new(cli);
    match app.run().await {
        Some(diagnostic) if diagnostic.is_clean() => ExitCode::SUCCESS,
        // Findings and interrupted runs were already reported
        _ => ExitCode::FAILURE,
    }
}
