use clap::{Parser, Subcommand};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde_json::{Value, json};

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Management CLI for the API gateway", long_about = None)]
struct Cli {
    /// Admin API base URL.
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    /// Admin API key.
    #[arg(short, long, env = "GATEWAY_ADMIN_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show gateway status
    Status,
    /// Show the metrics snapshot
    Metrics,
    /// List backend health and connections
    Backends,
    /// Add a backend
    Add {
        id: String,
        host: String,
        port: u16,
        #[arg(long, default_value_t = 1)]
        weight: u32,
        #[arg(long, default_value_t = 100)]
        max_connections: usize,
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
        #[arg(long, default_value = "/health")]
        health_check_path: String,
    },
    /// Remove a backend
    Remove { id: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );
    let base = cli.url.trim_end_matches('/');

    let request = match cli.command {
        Commands::Status => client.get(format!("{}/admin/status", base)),
        Commands::Metrics => client.get(format!("{}/admin/metrics", base)),
        Commands::Backends => client.get(format!("{}/admin/backends", base)),
        Commands::Add {
            id,
            host,
            port,
            weight,
            max_connections,
            timeout_secs,
            health_check_path,
        } => client.post(format!("{}/admin/backends", base)).json(&json!({
            "id": id,
            "host": host,
            "port": port,
            "weight": weight,
            "max_connections": max_connections,
            "timeout_secs": timeout_secs,
            "health_check_path": health_check_path,
        })),
        Commands::Remove { id } => client.delete(format!("{}/admin/backends/{}", base, id)),
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if !text.is_empty() {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    if text.is_empty() {
        println!("{}", status);
        return Ok(());
    }
    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", text),
    }
    Ok(())
}
