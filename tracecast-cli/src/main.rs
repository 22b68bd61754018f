//! tracecast-cli, control client for a running tracecast server
//!
//! # Subcommands
//! - `start [--config-file P] [--core-config-file P]`: launch the simulator
//! - `clear`                                        : delete the trace and reset viewers
//! - `status`                                       : show events, sessions and the running simulation

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

const DEFAULT_SERVER: &str = "http://127.0.0.1:8000";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "tracecast-cli", version, about = "Control a running tracecast server")]
struct Cli {
    /// Tracecast HTTP server URL (overrides TRACECAST_HTTP_URL env var)
    #[arg(long, env = "TRACECAST_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start a simulation; omitted paths use the server's defaults
    Start {
        #[arg(long)]
        config_file: Option<String>,

        #[arg(long)]
        core_config_file: Option<String>,
    },

    /// Delete the trace file and reset every viewer
    Clear,

    /// Show server status
    Status,
}

// ============================================================================
// API Types
// ============================================================================

/// Body of POST /run-simulation
#[derive(Debug, Serialize, PartialEq)]
pub struct SimulationRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub core_config_file: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SimulationInfo {
    pub pid: u32,
    pub config_file: String,
    pub core_config_file: String,
    pub started_at: String,
}

/// Response of GET /status
#[derive(Debug, Deserialize)]
pub struct StatusResponse {
    pub trace_path: String,
    pub events: usize,
    pub sessions: usize,
    pub log_subscribers: usize,
    pub simulation: Option<SimulationInfo>,
}

/// Pull the human message out of a server JSON body, falling back to the raw text.
pub fn server_message(body: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(v) => v["message"]
            .as_str()
            .or_else(|| v["error"].as_str())
            .map(str::to_string)
            .unwrap_or_else(|| body.to_string()),
        Err(_) => body.to_string(),
    }
}

pub fn format_status(status: &StatusResponse) -> String {
    let simulation = match &status.simulation {
        Some(sim) => format!(
            "running (pid {}, since {})\n  config:       {}\n  core config:  {}",
            sim.pid, sim.started_at, sim.config_file, sim.core_config_file
        ),
        None => "idle".to_string(),
    };
    format!(
        "Trace:        {}\nEvents:       {}\nViewers:      {} ({} with logs)\nSimulation:   {}",
        status.trace_path,
        status.events,
        status.sessions,
        status.log_subscribers,
        simulation
    )
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn client() -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()?)
}

/// POST a JSON body and print the server's message. Exits non-zero on failure.
fn post_control(server: &str, path: &str, body: &serde_json::Value) -> anyhow::Result<()> {
    let url = format!("{}{}", server, path);
    let resp = match client()?.post(&url).json(body).send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("tracecast-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    let status = resp.status();
    let text = resp.text().unwrap_or_default();
    if !status.is_success() {
        eprintln!("tracecast-cli: server returned {}: {}", status, server_message(&text));
        std::process::exit(1);
    }

    let body: serde_json::Value = serde_json::from_str(&text).unwrap_or_default();
    match body["pid"].as_u64() {
        Some(pid) => println!("{} (pid {})", server_message(&text), pid),
        None => println!("{}", server_message(&text)),
    }
    Ok(())
}

fn do_start(
    server: &str,
    config_file: Option<String>,
    core_config_file: Option<String>,
) -> anyhow::Result<()> {
    let req = SimulationRequest {
        config_file,
        core_config_file,
    };
    post_control(server, "/run-simulation", &serde_json::to_value(&req)?)
}

fn do_clear(server: &str) -> anyhow::Result<()> {
    post_control(server, "/clear-trace", &serde_json::json!({}))
}

/// Show the server status by calling GET /status.
fn do_status(server: &str) -> anyhow::Result<()> {
    let url = format!("{}/status", server);
    match client()?.get(&url).send() {
        Ok(r) if r.status().is_success() => {
            let status: StatusResponse = r.json()?;
            println!("{}", format_status(&status));
        }
        Ok(r) => {
            eprintln!("tracecast-cli: server unavailable (HTTP {})", r.status());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("tracecast-cli: cannot reach {}: {}", url, e);
            std::process::exit(1);
        }
    }
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Start {
            config_file,
            core_config_file,
        } => do_start(&server, config_file, core_config_file),
        Commands::Clear => do_clear(&server),
        Commands::Status => do_status(&server),
    };

    if let Err(e) = result {
        eprintln!("tracecast-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
