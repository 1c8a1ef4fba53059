use clap::{Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(
    about = "Check an SMTP server for STARTTLS support and a usable certificate",
    long_about = "Connects to an SMTP server, negotiates STARTTLS and reports whether the certificate it presents would be accepted. Exits 0 when nothing was found, 1 otherwise."
)]
pub struct Cli {
    /// Address to connect to
    #[arg(help = "SMTP server address as host:port (port defaults to 25)")]
    pub address: String,

    /// Name the certificate must be valid for
    #[arg(
        short = 'n',
        long,
        help = "Hostname to verify the certificate against (defaults to the address host)"
    )]
    pub hostname: Option<String>,

    /// HELO/EHLO domain
    #[arg(short = 'l', long)]
    pub helo: Option<String>,

    /// Connection and read timeout in seconds
    #[arg(long, default_value = "10")]
    pub timeout: u64,

    /// Skip certificate chain verification
    #[arg(
        short = 'k',
        long,
        help = "Accept any certificate chain; expiry and hostname are still checked"
    )]
    pub insecure: bool,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "standard")]
    pub output: OutputFormat,

    /// Verbose output mode
    #[arg(short, long)]
    pub verbose: bool,

    /// Colorful output (disable for logging to files)
    #[arg(
        short = 'C',
        long = "no-color",
        default_value = "true",
        action = clap::ArgAction::SetFalse
    )]
    pub is_color: bool,
}

impl Cli {
    // A bare host gets the SMTP port
    pub fn target_address(&self) -> String {
        let addr = self.address.trim();
        let has_port = if addr.starts_with('[') {
            addr.contains("]:")
        } else {
            addr.matches(':').count() == 1
        };
        if has_port {
            addr.to_string()
        } else if addr.contains(':') && !addr.starts_with('[') {
            format!("[{addr}]:25")
        } else {
            format!("{addr}:25")
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, ValueEnum)]
pub enum OutputFormat {
    /// Standard colored output
    Standard,
    /// JSON format
    Json,
}
