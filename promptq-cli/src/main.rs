//! promptq-cli: thin HTTP client for a running promptq server.
//!
//! # Subcommands
//! - `enqueue --owner <id> --prompt <text> [--model <m>]` queues one prompt
//! - `batch --owner <id> --prompt <text> --model <a> --model <b>` fans one prompt out to several models
//! - `batch --owner <id> --file items.json` queues a prepared list of items
//! - `dispatch` runs one dispatch cycle
//! - `stats`, `results`, `summaries` inspect the queue
//! - `retry <job>`, `delete-result <id>`, `sweep` maintain it
//! - `status` shows server health

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::{json, Value};

const DEFAULT_SERVER: &str = "http://127.0.0.1:8767";
const DEFAULT_RESULT_LIMIT: i64 = 20;
const ANSWER_PREVIEW_CHARS: usize = 120;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "promptq-cli", version, about = "Queue prompts for many LLMs and read back the answers")]
struct Cli {
    /// promptq HTTP server URL (overrides PROMPTQ_SERVER env var)
    #[arg(long, env = "PROMPTQ_SERVER", default_value = DEFAULT_SERVER)]
    server: String,

    /// Print raw JSON responses
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Queue a single prompt for one model
    Enqueue {
        #[arg(long)]
        owner: i64,

        #[arg(long)]
        prompt: String,

        /// Defaults to the server's configured model
        #[arg(long)]
        model: Option<String>,

        #[arg(long)]
        prompt_id: Option<String>,

        /// Reference answer used for scoring
        #[arg(long)]
        expected: Option<String>,

        #[arg(long)]
        priority: Option<i32>,
    },

    /// Queue a batch sharing one run id
    Batch {
        #[arg(long)]
        owner: i64,

        /// Prompt to send to every --model
        #[arg(long, conflicts_with = "file")]
        prompt: Option<String>,

        /// Repeat for each target model
        #[arg(long = "model")]
        models: Vec<String>,

        #[arg(long)]
        prompt_id: Option<String>,

        #[arg(long)]
        expected: Option<String>,

        /// JSON array of {prompt, model?, prompt_id?, expected_answer?} items
        #[arg(long)]
        file: Option<PathBuf>,

        #[arg(long)]
        priority: Option<i32>,
    },

    /// Run one dispatch cycle now
    Dispatch,

    /// Job counts by status
    Stats,

    /// Recent results for an owner
    Results {
        #[arg(long)]
        owner: i64,

        #[arg(short = 'n', long, default_value_t = DEFAULT_RESULT_LIMIT)]
        limit: i64,
    },

    /// Cross-model summaries for a prompt id
    Summaries {
        #[arg(long)]
        prompt_id: String,
    },

    /// Re-queue a failed job
    Retry { job_id: i64 },

    /// Delete one stored result
    DeleteResult { result_id: i64 },

    /// Delete finished jobs older than the retention window
    Sweep {
        /// Overrides the server's configured retention
        #[arg(long)]
        days: Option<u32>,
    },

    /// Show promptq server status
    Status,
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ResultEntry {
    id: i64,
    model: String,
    prompt: String,
    answer: String,
    comparison_score: Option<i16>,
    #[serde(default)]
    comparison_failed: bool,
    duration_ms: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SummaryEntry {
    prompt_text: String,
    model_count: i32,
    valid_count: i32,
    average_score: Option<f64>,
    narrative: String,
    completed_at: String,
}

// ============================================================================
// Request bodies
// ============================================================================

fn enqueue_body(
    owner: i64,
    prompt: &str,
    model: Option<&str>,
    prompt_id: Option<&str>,
    expected: Option<&str>,
    priority: Option<i32>,
) -> Value {
    let mut payload = json!({ "owner_id": owner, "prompt": prompt });
    if let Some(model) = model {
        payload["model"] = json!(model);
    }
    if let Some(prompt_id) = prompt_id {
        payload["prompt_id"] = json!(prompt_id);
    }
    if let Some(expected) = expected {
        payload["expected_answer"] = json!(expected);
    }
    json!({ "job_type": "provider_request", "payload": payload, "priority": priority })
}

/// One item per model, all carrying the same prompt.
fn fan_out_items(prompt: &str, models: &[String], prompt_id: Option<&str>, expected: Option<&str>) -> Vec<Value> {
    models
        .iter()
        .map(|model| {
            json!({
                "prompt": prompt,
                "model": model,
                "prompt_id": prompt_id,
                "expected_answer": expected,
            })
        })
        .collect()
}

fn batch_body(owner: i64, items: Vec<Value>, priority: Option<i32>) -> Value {
    json!({ "owner_id": owner, "items": items, "priority": priority })
}

fn load_items(path: &Path) -> anyhow::Result<Vec<Value>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    let items: Vec<Value> =
        serde_json::from_str(&raw).with_context(|| format!("{} is not a JSON array of items", path.display()))?;
    Ok(items)
}

// ============================================================================
// Output formatting
// ============================================================================

fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}…", cut)
    }
}

fn format_score(entry: &ResultEntry) -> String {
    match (entry.comparison_score, entry.comparison_failed) {
        (Some(score), _) => format!("{}/10", score),
        (None, true) => "unscored".to_string(),
        (None, false) => "-".to_string(),
    }
}

fn format_result(entry: &ResultEntry) -> String {
    format!(
        "#{} {} [{}] {}ms\n  Q: {}\n  A: {}",
        entry.id,
        entry.model,
        format_score(entry),
        entry.duration_ms.map(|d| d.to_string()).unwrap_or_else(|| "?".to_string()),
        preview(&entry.prompt, ANSWER_PREVIEW_CHARS),
        preview(&entry.answer, ANSWER_PREVIEW_CHARS),
    )
}

fn format_summary(entry: &SummaryEntry) -> String {
    let average = entry
        .average_score
        .map(|a| format!("{:.1}", a))
        .unwrap_or_else(|| "n/a".to_string());
    format!(
        "{}\n  models: {} (valid {}), average {}, at {}\n  {}",
        preview(&entry.prompt_text, ANSWER_PREVIEW_CHARS),
        entry.model_count,
        entry.valid_count,
        average,
        entry.completed_at,
        entry.narrative,
    )
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

struct Api {
    client: reqwest::blocking::Client,
    server: String,
}

impl Api {
    fn new(server: &str) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()?;
        Ok(Self {
            client,
            server: server.trim_end_matches('/').to_string(),
        })
    }

    fn send(&self, method: reqwest::Method, path: &str, body: Option<&Value>) -> anyhow::Result<Value> {
        self.send_with_query(method, path, &[], body)
    }

    fn send_with_query(
        &self,
        method: reqwest::Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> anyhow::Result<Value> {
        let url = format!("{}{}", self.server, path);
        let mut request = self.client.request(method, &url);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let resp = request
            .send()
            .with_context(|| format!("connection failed to {}", url))?;
        let status = resp.status();
        let body: Value = resp.json().unwrap_or(Value::Null);

        if !status.is_success() {
            let message = body["error"].as_str().map(str::to_string).unwrap_or_else(|| body.to_string());
            bail!("server returned {}: {}", status, message);
        }
        Ok(body)
    }

    fn get(&self, path: &str) -> anyhow::Result<Value> {
        self.send(reqwest::Method::GET, path, None)
    }

    fn post(&self, path: &str, body: Option<&Value>) -> anyhow::Result<Value> {
        self.send(reqwest::Method::POST, path, body)
    }
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let api = Api::new(&cli.server)?;

    match cli.command {
        Commands::Enqueue { owner, prompt, model, prompt_id, expected, priority } => {
            let body = enqueue_body(
                owner,
                &prompt,
                model.as_deref(),
                prompt_id.as_deref(),
                expected.as_deref(),
                priority,
            );
            let resp = api.post("/jobs", Some(&body))?;
            if cli.json {
                return print_json(&resp);
            }
            println!("Queued job {} (run {})", resp["job_id"], resp["run_id"].as_str().unwrap_or("?"));
        }

        Commands::Batch { owner, prompt, models, prompt_id, expected, file, priority } => {
            let items = match (file, prompt) {
                (Some(path), _) => load_items(&path)?,
                (None, Some(prompt)) => {
                    if models.is_empty() {
                        bail!("batch needs at least one --model when using --prompt");
                    }
                    fan_out_items(&prompt, &models, prompt_id.as_deref(), expected.as_deref())
                }
                (None, None) => bail!("batch needs either --prompt or --file"),
            };
            let resp = api.post("/jobs/batch", Some(&batch_body(owner, items, priority)))?;
            if cli.json {
                return print_json(&resp);
            }
            let count = resp["job_ids"].as_array().map(|a| a.len()).unwrap_or(0);
            println!("Queued {} jobs (run {})", count, resp["run_id"].as_str().unwrap_or("?"));
        }

        Commands::Dispatch => {
            let resp = api.post("/dispatch", None)?;
            if cli.json {
                return print_json(&resp);
            }
            if resp["at_capacity"].as_bool().unwrap_or(false) {
                println!("Queue at capacity; nothing claimed");
            } else {
                println!(
                    "Claimed {}, completed {}, failed {} in {}ms",
                    resp["claimed"], resp["completed"], resp["failed"], resp["elapsed_ms"]
                );
            }
        }

        Commands::Stats => {
            let resp = api.get("/jobs/stats")?;
            if cli.json {
                return print_json(&resp);
            }
            for status in ["pending", "processing", "completed", "failed"] {
                println!("{:<11} {}", format!("{}:", status), resp[status].as_i64().unwrap_or(0));
            }
        }

        Commands::Results { owner, limit } => {
            let resp = api.send_with_query(
                reqwest::Method::GET,
                "/results",
                &[("owner_id", owner.to_string()), ("limit", limit.to_string())],
                None,
            )?;
            if cli.json {
                return print_json(&resp);
            }
            let results: Vec<ResultEntry> = serde_json::from_value(resp["results"].clone())
                .context("failed to parse results response")?;
            if results.is_empty() {
                eprintln!("No results for owner {}", owner);
            }
            for entry in &results {
                println!("{}\n", format_result(entry));
            }
        }

        Commands::Summaries { prompt_id } => {
            let resp = api.send_with_query(
                reqwest::Method::GET,
                "/summaries",
                &[("prompt_id", prompt_id.clone())],
                None,
            )?;
            if cli.json {
                return print_json(&resp);
            }
            let summaries: Vec<SummaryEntry> = serde_json::from_value(resp["summaries"].clone())
                .context("failed to parse summaries response")?;
            if summaries.is_empty() {
                eprintln!("No summaries for prompt {}", prompt_id);
            }
            for entry in &summaries {
                println!("{}\n", format_summary(entry));
            }
        }

        Commands::Retry { job_id } => {
            let resp = api.post(&format!("/jobs/{}/retry", job_id), None)?;
            if cli.json {
                return print_json(&resp);
            }
            println!("Job {} re-queued as {}", job_id, resp["job_id"]);
        }

        Commands::DeleteResult { result_id } => {
            let resp = api.send(reqwest::Method::DELETE, &format!("/results/{}", result_id), None)?;
            if cli.json {
                return print_json(&resp);
            }
            println!("Deleted result {}", result_id);
        }

        Commands::Sweep { days } => {
            let body = json!({ "days": days });
            let resp = api.post("/sweep", Some(&body))?;
            if cli.json {
                return print_json(&resp);
            }
            println!(
                "Deleted {} jobs and {} scratch rows older than {} days",
                resp["jobs_deleted"], resp["scratch_deleted"], resp["retention_days"]
            );
        }

        Commands::Status => {
            let resp = api.get("/health")?;
            if cli.json {
                return print_json(&resp);
            }
            println!("promptq server: {}", resp["status"].as_str().unwrap_or("unknown"));
            println!("Version:        {}", resp["version"].as_str().unwrap_or("?"));
            println!("Store:          {}", resp["store"].as_str().unwrap_or("?"));
            println!("Store version:  {}", resp["store_version"].as_str().unwrap_or("?"));
            println!("Socket:         {}", resp["socket"].as_str().unwrap_or("?"));
        }
    }

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("promptq-cli: {:#}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
