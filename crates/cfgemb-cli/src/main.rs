//! Preprocessing service CLI.
//!
//! Provides the `cfgemb` binary with subcommands for submitting samples to a
//! running preprocessing server, polling task state, and fetching the
//! resulting graph artifacts. Talks to the same HTTP surface as any other
//! client; nothing here bypasses the server.

use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use clap::{Parser, Subcommand};

/// Graph preprocessing service client.
#[derive(Parser)]
#[command(name = "cfgemb", about = "Graph preprocessing service client")]
struct Cli {
    /// Server base URL.
    #[arg(long, global = true, default_value = "http://127.0.0.1:17777")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Submit a sample (binary or assembly listing) for preprocessing.
    Submit {
        /// File to submit.
        file: PathBuf,

        /// Task id (default: the file stem).
        #[arg(short, long)]
        task_id: Option<String>,

        /// Class label, 0 or 1.
        #[arg(short, long, default_value_t = 0)]
        label: i64,

        /// Treat the input as an assembly listing or CFG JSON instead of a
        /// binary, skipping disassembly.
        #[arg(long)]
        asm: bool,

        /// Poll until the task reaches a terminal state.
        #[arg(short, long)]
        wait: bool,
    },

    /// Show the status of a task.
    Status {
        task_id: String,
    },

    /// Show the artifact names of a completed task.
    Result {
        task_id: String,
    },

    /// Download a completed task's artifacts.
    Download {
        task_id: String,

        /// Output directory (default: current directory).
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
    },

    /// Show worker occupancy, queue depth, and disk headroom.
    System,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let server = cli.server.trim_end_matches('/').to_string();

    let exit_code = match cli.command {
        Commands::Submit {
            file,
            task_id,
            label,
            asm,
            wait,
        } => run_submit(&client, &server, &file, task_id, label, asm, wait).await,
        Commands::Status { task_id } => {
            print_endpoint(&client, &format!("{server}/task/{task_id}")).await
        }
        Commands::Result { task_id } => {
            print_endpoint(&client, &format!("{server}/result/{task_id}")).await
        }
        Commands::Download {
            task_id,
            output_dir,
        } => run_download(&client, &server, &task_id, &output_dir).await,
        Commands::System => print_endpoint(&client, &format!("{server}/system/status")).await,
    };
    process::exit(exit_code);
}

/// Execute the submit subcommand.
///
/// Returns exit code: 0 = success (task completed or queued), 1 = task
/// failed, 2 = request error, 3 = I/O error.
async fn run_submit(
    client: &reqwest::Client,
    server: &str,
    file: &Path,
    task_id: Option<String>,
    label: i64,
    asm: bool,
    wait: bool,
) -> i32 {
    let bytes = match tokio::fs::read(file).await {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Error: cannot read '{}': {}", file.display(), e);
            return 3;
        }
    };
    let filename = file
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "sample".to_string());
    let task_id = task_id.unwrap_or_else(|| {
        file.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "sample".to_string())
    });

    let endpoint = if asm {
        format!("{server}/preprocess_asm")
    } else {
        format!("{server}/preprocess_pe")
    };
    let form = reqwest::multipart::Form::new()
        .text("task_id", task_id.clone())
        .text("label", label.to_string())
        .part(
            "file",
            reqwest::multipart::Part::bytes(bytes).file_name(filename),
        );

    let body = match send_json(client.post(&endpoint).multipart(form)).await {
        Ok(body) => body,
        Err(code) => return code,
    };
    println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());

    if !wait {
        return 0;
    }
    poll_until_terminal(client, server, &task_id).await
}

async fn poll_until_terminal(client: &reqwest::Client, server: &str, task_id: &str) -> i32 {
    loop {
        tokio::time::sleep(Duration::from_secs(2)).await;
        let body = match send_json(client.get(format!("{server}/task/{task_id}"))).await {
            Ok(body) => body,
            Err(code) => return code,
        };
        let status = body["status"].as_str().unwrap_or_default().to_string();
        let message = body["message"].as_str().unwrap_or_default().to_string();
        eprintln!("{task_id}: {status} - {message}");
        match status.as_str() {
            "completed" => return 0,
            "failed" => {
                eprintln!("Error: task failed: {message}");
                return 1;
            }
            _ => {}
        }
    }
}

/// Execute the download subcommand.
///
/// Returns exit code: 0 = success, 1 = task not completed, 2 = request
/// error, 3 = I/O error.
async fn run_download(
    client: &reqwest::Client,
    server: &str,
    task_id: &str,
    output_dir: &Path,
) -> i32 {
    let body = match send_json(client.get(format!("{server}/result/{task_id}"))).await {
        Ok(body) => body,
        Err(code) => return code,
    };
    let Some(files) = body["result_files"].as_object() else {
        eprintln!("Error: task '{task_id}' has no artifacts yet");
        return 1;
    };

    if let Err(e) = tokio::fs::create_dir_all(output_dir).await {
        eprintln!("Error: cannot create '{}': {}", output_dir.display(), e);
        return 3;
    }

    for name in files.values().filter_map(|v| v.as_str()) {
        let url = format!("{server}/download/{task_id}/{name}");
        let response = match client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                eprintln!("Error: request to {url} failed: {e}");
                return 2;
            }
        };
        if !response.status().is_success() {
            eprintln!("Error: {url} returned {}", response.status());
            return 2;
        }
        let bytes = match response.bytes().await {
            Ok(b) => b,
            Err(e) => {
                eprintln!("Error: reading {url}: {e}");
                return 2;
            }
        };
        let target = output_dir.join(name);
        if let Err(e) = tokio::fs::write(&target, &bytes).await {
            eprintln!("Error: cannot write '{}': {}", target.display(), e);
            return 3;
        }
        println!("wrote {}", target.display());
    }
    0
}

/// GET an endpoint and pretty-print its JSON body.
async fn print_endpoint(client: &reqwest::Client, url: &str) -> i32 {
    match send_json(client.get(url)).await {
        Ok(body) => {
            println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
            0
        }
        Err(code) => code,
    }
}

/// Sends a request, reporting HTTP-level and server-reported errors.
async fn send_json(request: reqwest::RequestBuilder) -> Result<serde_json::Value, i32> {
    let response = match request.send().await {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: request failed: {e}");
            return Err(2);
        }
    };
    let status = response.status();
    let body: serde_json::Value = match response.json().await {
        Ok(body) => body,
        Err(e) => {
            eprintln!("Error: invalid response body: {e}");
            return Err(2);
        }
    };
    if !status.is_success() {
        let message = body["error"]["message"]
            .as_str()
            .unwrap_or("unknown error");
        eprintln!("Error: server returned {status}: {message}");
        return Err(2);
    }
    Ok(body)
}
