//! Translation from fault descriptors to the agent command line.
//!
//! The command line is a public contract between this library and the agent
//! running inside each target: flag order is fixed and absent clauses are
//! omitted entirely, so the produced argv is a deterministic function of the
//! descriptor, the duration and the options.

use crate::faults::{GrpcDisruptionOptions, GrpcFault, HttpDisruptionOptions, HttpFault};

/// Name of the agent binary, always argv\[0\].
pub const AGENT_COMMAND: &str = "xk6-disruptor-agent";

/// Build the agent command for an HTTP fault.
pub fn build_http_fault_command(
    fault: &HttpFault,
    duration_secs: u32,
    options: &HttpDisruptionOptions,
) -> Vec<String> {
    let mut cmd = vec![
        AGENT_COMMAND.to_string(),
        "http".to_string(),
        "-d".to_string(),
        format!("{}s", duration_secs),
    ];

    if fault.average_delay > 0 {
        cmd.extend([
            "-a".to_string(),
            fault.average_delay.to_string(),
            "-v".to_string(),
            fault.delay_variation.to_string(),
        ]);
    }

    if fault.error_rate > 0.0 {
        cmd.extend([
            "-e".to_string(),
            fault.error_code.to_string(),
            "-r".to_string(),
            fault.error_rate.to_string(),
        ]);
        if !fault.error_body.is_empty() {
            cmd.extend(["-b".to_string(), fault.error_body.clone()]);
        }
    }

    push_common_flags(
        &mut cmd,
        fault.port,
        &fault.exclude,
        options.proxy_port,
        &options.iface,
    );

    cmd
}

/// Build the agent command for a gRPC fault.
pub fn build_grpc_fault_command(
    fault: &GrpcFault,
    duration_secs: u32,
    options: &GrpcDisruptionOptions,
) -> Vec<String> {
    let mut cmd = vec![
        AGENT_COMMAND.to_string(),
        "grpc".to_string(),
        "-d".to_string(),
        format!("{}s", duration_secs),
    ];

    if fault.average_delay > 0 {
        cmd.extend([
            "-a".to_string(),
            fault.average_delay.to_string(),
            "-v".to_string(),
            fault.delay_variation.to_string(),
        ]);
    }

    if fault.error_rate > 0.0 {
        cmd.extend([
            "-s".to_string(),
            fault.status_code.to_string(),
            "-r".to_string(),
            fault.error_rate.to_string(),
        ]);
        if !fault.status_message.is_empty() {
            cmd.extend(["-m".to_string(), fault.status_message.clone()]);
        }
    }

    push_common_flags(
        &mut cmd,
        fault.port,
        &fault.exclude,
        options.proxy_port,
        &options.iface,
    );

    cmd
}

fn push_common_flags(cmd: &mut Vec<String>, port: u16, exclude: &str, proxy_port: u16, iface: &str) {
    if port != 0 {
        cmd.extend(["-t".to_string(), port.to_string()]);
    }
    if !exclude.is_empty() {
        cmd.extend(["-x".to_string(), exclude.to_string()]);
    }
    if proxy_port != 0 {
        cmd.extend(["-p".to_string(), proxy_port.to_string()]);
    }
    if !iface.is_empty() {
        cmd.extend(["-i".to_string(), iface.to_string()]);
    }
}
