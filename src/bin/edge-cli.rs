use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use edge_gateway::auth::{TokenCodec, TokenType};
use edge_gateway::config::loader::{from_env_only, load_config};
use edge_gateway::config::GatewayConfig;

#[derive(Parser)]
#[command(name = "edge-cli")]
#[command(about = "Operator CLI for the edge gateway", long_about = None)]
struct Cli {
    /// Gateway base URL.
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    /// Config file, read for the signing secret and token lifetimes.
    #[arg(short, long, env = "EDGE_GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Gateway liveness
    Health,
    /// Per-dependency health with breaker state
    Services,
    /// Circuit breaker snapshots
    Breakers,
    /// Mint a token with the configured secret
    IssueToken {
        subject: String,
        #[arg(long, default_value = "")]
        email: String,
        #[arg(long, default_value = "USER")]
        role: String,
        /// Issue a refresh token instead of an access token
        #[arg(long)]
        refresh: bool,
    },
    /// Verify a token and print its claims
    InspectToken { token: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    match cli.command {
        Commands::Health => {
            let res = client.get(format!("{}/health", cli.url)).send().await?;
            print_response(res).await?;
        }
        Commands::Services => {
            let res = client.get(format!("{}/health/services", cli.url)).send().await?;
            print_response(res).await?;
        }
        Commands::Breakers => {
            let res = client
                .get(format!("{}/health/circuit-breakers", cli.url))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::IssueToken {
            subject,
            email,
            role,
            refresh,
        } => {
            let codec = codec(&load(cli.config)?);
            let token = if refresh {
                codec.issue_refresh(&subject)?
            } else {
                codec.issue_access(&subject, &email, &role)?
            };
            println!("{token}");
        }
        Commands::InspectToken { token } => {
            let codec = codec(&load(cli.config)?);
            let report = match codec.parse(&token) {
                Ok(claims) => json!({
                    "valid": true,
                    "type": TokenCodec::classify(&claims).map(|t: TokenType| t.as_str()),
                    "subject": claims.sub,
                    "email": claims.email,
                    "role": claims.role,
                    "issuedAt": claims.iat,
                    "expiresAt": claims.exp,
                    "expiresInSecs": TokenCodec::remaining_secs(&claims),
                }),
                Err(e) => json!({ "valid": false, "reason": e.to_string() }),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

fn load(path: Option<PathBuf>) -> Result<GatewayConfig, Box<dyn std::error::Error>> {
    Ok(match path {
        Some(path) => load_config(&path)?,
        None => from_env_only()?,
    })
}

fn codec(config: &GatewayConfig) -> TokenCodec {
    TokenCodec::new(
        config.auth.secret.as_bytes(),
        Duration::from_secs(config.auth.access_token_ttl_secs),
        Duration::from_secs(config.auth.refresh_token_ttl_secs),
    )
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: gateway returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
