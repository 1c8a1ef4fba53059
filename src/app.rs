use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use log::LevelFilter;
use std::time::Duration;
use tokio::signal;

use crate::cli::{Cli, OutputFormat};
use crate::output::OutputHandler;
use starttls_check::{Checker, CheckerConfig, Diagnostic, tls};

pub struct App {
    cli: Cli,
    output_handler: OutputHandler,
}

// RUST_LOG is read first; --verbose raises this crate to debug on top of it
pub fn init_logger(verbose: bool) {
    let mut builder = env_logger::Builder::from_default_env();
    if verbose {
        builder.filter_module("starttls_check", LevelFilter::Debug);
    }
    builder.format_timestamp(None);
    // A second init (tests, embedding) is harmless
    let _ = builder.try_init();
}

impl App {
    pub fn new(cli: Cli) -> Self {
        let output_handler = OutputHandler::new(cli.output, cli.is_color);
        Self { cli, output_handler }
    }

    fn checker(&self) -> Checker {
        let mut config = CheckerConfig::default()
            .with_timeout(Duration::from_secs(self.cli.timeout.max(1)));
        if let Some(helo) = &self.cli.helo {
            config = config.with_helo_name(helo.clone());
        }
        if self.cli.insecure {
            config = config.with_tls_config(Some(tls::insecure_client_config()));
        }
        Checker::new(config)
    }

    fn spinner(&self, address: &str) -> Option<ProgressBar> {
        if self.output_handler.format != OutputFormat::Standard || self.cli.verbose {
            return None;
        }
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(format!("Checking {address}..."));
        pb.enable_steady_tick(Duration::from_millis(100));
        Some(pb)
    }

    // Run the single check. Returns None if interrupted.
    pub async fn run(&self) -> Option<Diagnostic> {
        let address = self.cli.target_address();
        let hostname = self.cli.hostname.clone().unwrap_or_default();

        self.output_handler
            .print_target_info(&address, &hostname, self.cli.timeout, self.cli.insecure);

        let checker = self.checker();
        let spinner = self.spinner(&address);

        let diagnostic = tokio::select! {
            biased;
            _ = signal::ctrl_c() => {
                if let Some(pb) = &spinner {
                    pb.finish_and_clear();
                }
                eprintln!("\n{} Interrupted, aborting check.", "[!]".red().bold());
                return None;
            }
            diagnostic = checker.check(&hostname, &address) => diagnostic,
        };

        if let Some(pb) = spinner {
            pb.finish_and_clear();
        }

        self.output_handler
            .print_result(&address, &hostname, &diagnostic, self.cli.verbose);
        Some(diagnostic)
    }
}
