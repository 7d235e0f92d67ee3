use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "governor-cli")]
#[command(about = "Inspect a running request governor", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    /// Subject to present as, counted against the admin limiter.
    #[arg(short, long)]
    subject: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Breaker states and limiter occupancy
    Status,
    /// Quota, reset time and block state for one caller
    Limits {
        /// Traffic class (api, auth, upload, admin, diagnosis)
        class: String,
        /// Caller identifier (optionally scoped as `id:/path`)
        identifier: String,
    },
    /// Liveness check
    Health,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let path = match &cli.command {
        Commands::Status => "/governance/status".to_string(),
        Commands::Limits { class, identifier } => {
            format!("/governance/limits/{}/{}", class, encode_segment(identifier))
        }
        Commands::Health => "/healthz".to_string(),
    };

    let mut request = client.get(format!("{base}{path}"));
    if let Some(subject) = &cli.subject {
        request = request.header("x-subject-id", subject);
    }
    print_response(request.send().await?).await
}

/// Percent-encode the characters that would break a single path segment.
fn encode_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for b in raw.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b':' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if let Some(retry_after) = res.headers().get("retry-after").and_then(|v| v.to_str().ok()) {
        eprintln!("Retry-After: {retry_after}s");
    }
    if !status.is_success() {
        eprintln!("Error: governor returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
