//! Command-line contract of the agent.
//!
//! The flags are short-only and their semantics are stable: the controlling
//! library builds these argument vectors programmatically and ships them to
//! every target, so any change here is a protocol change.

use std::time::Duration;

use clap::{Args, Parser, Subcommand};

/// Fault-injection agent for HTTP and gRPC traffic.
#[derive(Parser, Debug)]
#[command(name = "xk6-disruptor-agent", version, about, long_about = None)]
pub struct Cli {
    /// The protocol to disrupt
    #[command(subcommand)]
    pub command: Command,
}

/// Protocol selector.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Disrupt the HTTP requests reaching the target port
    Http(HttpArgs),

    /// Disrupt the gRPC requests reaching the target port
    Grpc(GrpcArgs),
}

/// Flags shared by both protocols.
#[derive(Args, Clone, Debug)]
pub struct CommonArgs {
    /// Duration of the disruption (e.g. "60s")
    #[arg(short = 'd', value_parser = parse_duration)]
    pub duration: Duration,

    /// Average delay added to each request, in milliseconds
    #[arg(short = 'a', default_value_t = 0)]
    pub average_delay: u64,

    /// Variation of the injected delay, in milliseconds
    #[arg(short = 'v', default_value_t = 0)]
    pub delay_variation: u64,

    /// Fraction of requests that fail, in [0, 1]
    #[arg(short = 'r', default_value_t = 0.0)]
    pub rate: f64,

    /// Port of the application the disrupted traffic is forwarded to
    #[arg(short = 't', default_value_t = 80)]
    pub target_port: u16,

    /// Comma-separated list of paths (HTTP) or services (gRPC) excluded
    /// from disruption
    #[arg(short = 'x', value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// Port the proxy listens on
    #[arg(short = 'p', default_value_t = 8080)]
    pub proxy_port: u16,

    /// Network interface the disrupted traffic arrives at
    #[arg(short = 'i', default_value = "eth0")]
    pub iface: String,
}

/// Flags of the `http` subcommand.
#[derive(Args, Clone, Debug)]
pub struct HttpArgs {
    /// Shared disruption flags
    #[command(flatten)]
    pub common: CommonArgs,

    /// Status code returned by faulted requests
    #[arg(short = 'e', default_value_t = 0)]
    pub error_code: u16,

    /// Body returned by faulted requests
    #[arg(short = 'b', default_value = "")]
    pub error_body: String,
}

/// Flags of the `grpc` subcommand.
#[derive(Args, Clone, Debug)]
pub struct GrpcArgs {
    /// Shared disruption flags
    #[command(flatten)]
    pub common: CommonArgs,

    /// gRPC status code returned by faulted requests
    #[arg(short = 's', default_value_t = 0)]
    pub status_code: i32,

    /// Status message returned by faulted requests
    #[arg(short = 'm', default_value = "")]
    pub status_message: String,
}

/// Parse durations of the form "60s", "5m", "1h", "500ms" or a bare number
/// of seconds.
fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);
    let amount: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration {:?}", value))?;

    match unit {
        "" | "s" => Ok(Duration::from_secs(amount)),
        "ms" => Ok(Duration::from_millis(amount)),
        "m" => Ok(Duration::from_secs(amount * 60)),
        "h" => Ok(Duration::from_secs(amount * 3600)),
        _ => Err(format!("invalid duration unit {:?}", unit)),
    }
}
