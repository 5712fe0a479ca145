use clap::{Parser, Subcommand, ValueEnum};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use forward_proxy::config::schema::DEFAULT_ADMIN_KEY;
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "proxy-cli")]
#[command(about = "Management CLI for the forward proxy", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:3001")]
    url: String,

    #[arg(short, long, env = "PROXY_ADMIN_KEY", default_value = DEFAULT_ADMIN_KEY)]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Host,
    Url,
}

impl Kind {
    fn as_str(self) -> &'static str {
        match self {
            Kind::Host => "host",
            Kind::Url => "url",
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Check proxy status and counts
    Status,
    /// Block a hostname or exact URL
    Block { kind: Kind, value: String },
    /// Remove a blocklist entry
    Unblock { kind: Kind, value: String },
    /// List blocked hostnames or URLs
    Blocked { kind: Kind },
    /// List cached URLs
    Cached,
    /// Show whether a URL is cached, with its validators
    IsCached { url: String },
    /// Forget a cached URL
    Uncache { url: String },
    /// Forget every cached URL
    ClearCache,
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
        Commands::Block { kind, value } => client
            .post(format!("{}/admin/blocklist/{}", base, kind.as_str()))
            .json(&json!({ "value": value })),
        Commands::Unblock { kind, value } => client
            .delete(format!("{}/admin/blocklist/{}", base, kind.as_str()))
            .query(&[("value", value)]),
        Commands::Blocked { kind } => client.get(format!("{}/admin/blocklist/{}", base, kind.as_str())),
        Commands::Cached => client.get(format!("{}/admin/cache", base)),
        Commands::IsCached { url } => client
            .get(format!("{}/admin/cache/entry", base))
            .query(&[("url", url)]),
        Commands::Uncache { url } => client
            .delete(format!("{}/admin/cache/entry", base))
            .query(&[("url", url)]),
        Commands::ClearCache => client.delete(format!("{}/admin/cache", base)),
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let text = res.text().await?;
    if text.is_empty() {
        println!("{}", status);
        return Ok(());
    }
    let json: Value = serde_json::from_str(&text)?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
