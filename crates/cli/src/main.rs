//! JobRelay CLI - Command-line client for the JobRelay daemon

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tabled::{Table, Tabled};

const DEFAULT_RPC_URL: &str = "http://127.0.0.1:9527";

#[derive(Parser)]
#[command(name = "jobrelay-cli")]
#[command(about = "JobRelay CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// RPC server URL
    #[arg(long, env = "JOBRELAY_RPC_URL", default_value = DEFAULT_RPC_URL)]
    rpc_url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate job-request messages and enqueue them
    Send {
        /// Base job name, suffixed with the message index
        job_name: String,

        /// Messages to create per queue
        #[arg(short, long, default_value = "1")]
        count: i32,

        /// Target queue as namespace/queue (default: every configured queue)
        #[arg(short, long)]
        queue: Option<String>,

        #[arg(long)]
        job_id: Option<i64>,

        #[arg(long)]
        parameter1: Option<String>,

        #[arg(long)]
        parameter2: Option<String>,
    },

    /// Receive (and acknowledge) messages from every configured queue
    Receive {
        /// Messages per queue
        #[arg(short, long, default_value = "1")]
        count: usize,
    },

    /// Delete every message of one queue or of every configured queue
    Purge {
        /// Queue as namespace/queue (default: every configured queue)
        #[arg(short, long)]
        queue: Option<String>,
    },

    /// Create one Kubernetes Job directly
    CreateJob {
        job_name: String,

        /// Kubernetes namespace (default: the configured jobs namespace)
        #[arg(short, long)]
        namespace: Option<String>,
    },

    /// List Kubernetes namespaces
    Namespaces,

    /// List pods across all namespaces
    Pods,

    /// Show daemon status
    Status,
}

#[derive(Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: serde_json::Value,
    id: u64,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    #[allow(dead_code)]
    jsonrpc: String,
    #[allow(dead_code)]
    id: u64,
    result: Option<serde_json::Value>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

#[derive(Deserialize, Tabled)]
struct QueueCount {
    target: String,
    count: usize,
}

#[derive(Deserialize, Tabled)]
#[serde(rename_all = "camelCase")]
struct MessageRow {
    #[tabled(rename = "namespace")]
    broker_namespace: String,
    #[tabled(rename = "queue")]
    queue_name: String,
    #[tabled(display_with = "display_sequence")]
    sequence_number: Option<i64>,
    message_id: String,
    body: String,
    acknowledged: bool,
}

#[derive(Deserialize)]
struct QueueMessages {
    target: String,
    messages: Vec<MessageRow>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct ReceiveResponse {
    all_received: bool,
    received: usize,
    queues: Vec<QueueMessages>,
}

fn display_sequence(sequence: &Option<i64>) -> String {
    sequence.map(|s| s.to_string()).unwrap_or_default()
}

#[derive(Deserialize, Tabled)]
#[serde(rename_all = "camelCase")]
struct JobRow {
    outcome: String,
    #[tabled(display_with = "display_optional")]
    job_name: Option<String>,
    #[tabled(display_with = "display_optional")]
    namespace_name: Option<String>,
    #[tabled(display_with = "display_optional")]
    container_image: Option<String>,
    #[tabled(display_with = "display_optional")]
    node_selector: Option<String>,
}

fn display_optional(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

async fn call_rpc(url: &str, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
    let request = JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        method: method.to_string(),
        params,
        id: 1,
    };

    let client = reqwest::Client::new();
    let response: JsonRpcResponse = client
        .post(url)
        .json(&request)
        .send()
        .await
        .context("Failed to connect to daemon")?
        .json()
        .await
        .context("Failed to parse response")?;

    if let Some(error) = response.error {
        match error.data {
            Some(data) => anyhow::bail!("RPC error ({}): {}\n{}", error.code, error.message, data),
            None => anyhow::bail!("RPC error ({}): {}", error.code, error.message),
        }
    }

    response
        .result
        .ok_or_else(|| anyhow::anyhow!("No result in response"))
}

fn print_names(title: &str, result: serde_json::Value) -> Result<()> {
    let names: Vec<String> = serde_json::from_value(result)?;
    println!("{}", format!("{} ({})", title, names.len()).cyan().bold());
    for name in names {
        println!("  {}", name);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Send {
            job_name,
            count,
            queue,
            job_id,
            parameter1,
            parameter2,
        } => {
            let params = json!({
                "request": {
                    "jobName": job_name,
                    "messagesToCreateCount": count,
                    "jobId": job_id,
                    "parameter1": parameter1,
                    "parameter2": parameter2,
                },
                "ns_queue": queue,
            });

            let result = call_rpc(&cli.rpc_url, "messages.send.v1", params).await?;
            let targets: Vec<QueueCount> = serde_json::from_value(result["targets"].clone())?;

            if result["status"] == "CREATED" {
                println!(
                    "{}",
                    format!("✓ {} messages enqueued", result["created"]).green().bold()
                );
            } else {
                println!("{}", "○ Nothing enqueued".yellow());
            }
            println!();
            println!("{}", Table::new(targets));
        }

        Commands::Receive { count } => {
            let result =
                call_rpc(&cli.rpc_url, "messages.receive.v1", json!({ "count": count })).await?;
            let response: ReceiveResponse = serde_json::from_value(result)?;

            let mut rows = Vec::new();
            for queue in response.queues {
                if let Some(error) = queue.error {
                    eprintln!("{} {}: {}", "✗".red(), queue.target, error);
                }
                rows.extend(queue.messages);
            }

            if rows.is_empty() {
                println!("{}", "No messages".yellow());
            } else {
                println!(
                    "{}",
                    format!("✓ {} messages received", response.received).green().bold()
                );
                println!();
                println!("{}", Table::new(rows));
            }
            if !response.all_received {
                println!(
                    "{}",
                    "Some queues failed or some messages were not acknowledged".yellow()
                );
            }
        }

        Commands::Purge { queue } => {
            let result =
                call_rpc(&cli.rpc_url, "messages.purge.v1", json!({ "ns_queue": queue })).await?;
            let targets: Vec<QueueCount> = serde_json::from_value(result["targets"].clone())?;

            println!(
                "{}",
                format!("✓ {} messages deleted", result["deleted"]).green().bold()
            );
            println!();
            println!("{}", Table::new(targets));
        }

        Commands::CreateJob {
            job_name,
            namespace,
        } => {
            let params = json!({
                "job_name": job_name,
                "namespace": namespace,
            });

            let result = call_rpc(&cli.rpc_url, "jobs.create.v1", params).await?;
            let job: JobRow = serde_json::from_value(result)?;

            println!("{}", "✓ Job created".green().bold());
            println!();
            println!("{}", Table::new(vec![job]));
        }

        Commands::Namespaces => {
            let result = call_rpc(&cli.rpc_url, "cluster.namespaces.v1", json!({})).await?;
            print_names("Namespaces", result)?;
        }

        Commands::Pods => {
            let result = call_rpc(&cli.rpc_url, "cluster.pods.v1", json!({})).await?;
            print_names("Pods", result)?;
        }

        Commands::Status => {
            println!("{}", "System Status".cyan().bold());
            println!();

            match call_rpc(&cli.rpc_url, "admin.status.v1", json!({})).await {
                Ok(status) => {
                    println!("  {} {}", "RPC URL:".bold(), cli.rpc_url);
                    println!("  {} {}", "Status:".bold(), "ONLINE".green());
                    println!("  {} {}", "Version:".bold(), status["version"]);
                    println!("  {} {} seconds", "Uptime:".bold(), status["uptime_seconds"]);
                    println!();
                    println!(
                        "  {} {}",
                        "Broker namespaces:".bold(),
                        status["broker_namespaces"]
                    );
                    match status["processor_state"].as_str() {
                        Some(state) => println!(
                            "  {} {} ({})",
                            "Processor:".bold(),
                            state,
                            status["processor_queue"]
                        ),
                        None => println!("  {} {}", "Processor:".bold(), "disabled".yellow()),
                    }
                }
                Err(e) => {
                    println!("  {} {}", "Status:".bold(), "ERROR".red());
                    println!("  {} {}", "Error:".bold(), e);
                }
            }
        }
    }

    Ok(())
}
