//! Custodia CLI — a thin HTTP client for the Custodia secrets server.
//!
//! Talks exclusively over the REST surface the server exposes at its mount
//! path: no internal crate dependencies, no direct store or crypto access.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;

// ── ANSI color helpers ───────────────────────────────────────────────

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const CYAN: &str = "\x1b[36m";
const WHITE: &str = "\x1b[37m";

// ── CLI structure ────────────────────────────────────────────────────

/// Custodia — a hierarchical, encrypted secrets store.
#[derive(Parser)]
#[command(
    name = "custodia",
    version,
    about = "Custodia CLI — read, write, and manage secrets over HTTP",
    long_about = None,
    after_help = format!(
        "{DIM}Environment variables:{RESET}\n  \
         CUSTODIA_ADDR          Server address (default: http://127.0.0.1:8443)\n  \
         CUSTODIA_AUTH_HEADER   Header name carrying the auth token\n  \
         CUSTODIA_AUTH_TOKEN    Auth token value sent in that header\n\n\
         {DIM}Examples:{RESET}\n  \
         custodia mkdir alice\n  \
         custodia put alice/db-password hunter2\n  \
         custodia get alice/db-password\n  \
         custodia ls alice"
    ),
)]
struct Cli {
    /// Custodia server address.
    #[arg(long, env = "CUSTODIA_ADDR", default_value = "http://127.0.0.1:8443")]
    addr: String,

    /// Name of the header carrying the auth token (e.g. "X-Custodia-Token").
    #[arg(long, env = "CUSTODIA_AUTH_HEADER")]
    auth_header: Option<String>,

    /// Auth token value sent in `--auth-header`.
    #[arg(long, env = "CUSTODIA_AUTH_TOKEN")]
    auth_token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a container (namespace or sub-container).
    Mkdir {
        /// Container path (e.g. "alice" or "alice/app1").
        path: String,
    },
    /// Delete an empty container.
    Rmdir {
        /// Container path.
        path: String,
    },
    /// List the immediate children of a container.
    Ls {
        /// Container path.
        path: String,
    },
    /// Write a secret value.
    Put {
        /// Secret path (e.g. "alice/db-password").
        path: String,
        /// Value to store. Omit to read from stdin.
        value: Option<String>,
        /// Send as `application/octet-stream` instead of JSON.
        #[arg(long)]
        raw: bool,
    },
    /// Read a secret value.
    Get {
        /// Secret path.
        path: String,
        /// Request `application/octet-stream` instead of JSON.
        #[arg(long)]
        raw: bool,
    },
    /// Delete a secret value.
    Rm {
        /// Secret path.
        path: String,
    },
}

// ── Pretty output helpers ────────────────────────────────────────────

fn header(icon: &str, title: &str) {
    println!("{BOLD}{CYAN}{icon} {title}{RESET}");
    println!("{DIM}─────────────────────────────────────────{RESET}");
}

fn success(msg: &str) {
    println!("{GREEN}{BOLD}✓{RESET} {msg}");
}

fn print_secret_value(resp: &Value) {
    match resp.get("value") {
        Some(Value::String(s)) => println!("  {WHITE}{s}{RESET}"),
        Some(other) => println!("  {WHITE}{other}{RESET}"),
        None => println!("{}", serde_json::to_string_pretty(resp).unwrap_or_default()),
    }
}

fn print_listing(resp: &Value) {
    let Some(keys) = resp.get("keys").and_then(Value::as_array) else {
        println!("{}", serde_json::to_string_pretty(resp).unwrap_or_default());
        return;
    };
    if keys.is_empty() {
        println!("  {DIM}(empty){RESET}");
        return;
    }
    for key in keys {
        if let Some(k) = key.as_str() {
            println!("  {CYAN}├─{RESET} {k}");
        }
    }
}

// ── HTTP client ──────────────────────────────────────────────────────

struct Client {
    http: reqwest::Client,
    addr: String,
    auth_header: Option<String>,
    auth_token: Option<String>,
}

impl Client {
    fn new(addr: String, auth_header: Option<String>, auth_token: Option<String>) -> Self {
        let http = reqwest::Client::new();
        Self { http, addr, auth_header, auth_token }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/secrets/{}", self.addr.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    fn with_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match (&self.auth_header, &self.auth_token) {
            (Some(name), Some(value)) => builder.header(name, value),
            _ => builder,
        }
    }

    async fn get(&self, path: &str, raw: bool) -> Result<reqwest::Response> {
        let mut builder = self.http.get(self.url(path));
        if raw {
            builder = builder.header("Accept", "application/octet-stream");
        }
        self.with_auth(builder).send().await.context("request failed")
    }

    async fn put(&self, path: &str, body: Vec<u8>, raw: bool) -> Result<reqwest::Response> {
        let content_type = if raw { "application/octet-stream" } else { "application/json" };
        let builder = self.http.put(self.url(path)).header("Content-Type", content_type).body(body);
        self.with_auth(builder).send().await.context("request failed")
    }

    async fn post_empty(&self, path: &str) -> Result<reqwest::Response> {
        let builder = self.http.post(self.url(path));
        self.with_auth(builder).send().await.context("request failed")
    }

    async fn delete(&self, path: &str) -> Result<reqwest::Response> {
        let builder = self.http.delete(self.url(path));
        self.with_auth(builder).send().await.context("request failed")
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    if resp.status().is_success() {
        Ok(resp)
    } else {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        bail!("server returned {status}: {body}");
    }
}

async fn parse_json(resp: reqwest::Response) -> Result<Value> {
    let resp = check_status(resp).await?;
    let body = resp.text().await.context("failed to read response body")?;
    if body.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&body).context("failed to parse response JSON")
}

// ── Command dispatch ─────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let client = Client::new(cli.addr, cli.auth_header, cli.auth_token);

    match run(&client, cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("  {RED}{BOLD}✗ Error:{RESET} {e:#}");
            eprintln!();
            ExitCode::FAILURE
        }
    }
}

async fn run(client: &Client, cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Mkdir { path } => cmd_mkdir(client, &path).await,
        Commands::Rmdir { path } => cmd_rmdir(client, &path).await,
        Commands::Ls { path } => cmd_ls(client, &path).await,
        Commands::Put { path, value, raw } => cmd_put(client, &path, value, raw).await,
        Commands::Get { path, raw } => cmd_get(client, &path, raw).await,
        Commands::Rm { path } => cmd_rm(client, &path).await,
    }
}

async fn cmd_mkdir(client: &Client, path: &str) -> Result<()> {
    let resp = client.post_empty(path).await?;
    check_status(resp).await?;
    println!();
    success(&format!("Container {BOLD}{path}{RESET} created."));
    println!();
    Ok(())
}

async fn cmd_rmdir(client: &Client, path: &str) -> Result<()> {
    let resp = client.delete(path).await?;
    check_status(resp).await?;
    println!();
    success(&format!("Container {BOLD}{path}{RESET} removed."));
    println!();
    Ok(())
}

async fn cmd_ls(client: &Client, path: &str) -> Result<()> {
    let resp = client.get(path, false).await?;
    let value = parse_json(resp).await?;
    println!();
    header("📂", &format!("Keys: {path}"));
    print_listing(&value);
    println!();
    Ok(())
}

async fn cmd_put(client: &Client, path: &str, value: Option<String>, raw: bool) -> Result<()> {
    let plaintext = match value {
        Some(v) => v,
        None => {
            let mut buf = String::new();
            std::io::Read::read_to_string(&mut std::io::stdin(), &mut buf)
                .context("failed to read value from stdin")?;
            buf.trim_end_matches('\n').to_owned()
        }
    };

    let body = if raw {
        plaintext.into_bytes()
    } else {
        serde_json::to_vec(&serde_json::json!({ "type": "simple", "value": plaintext }))
            .context("failed to encode request body")?
    };

    let resp = client.put(path, body, raw).await?;
    check_status(resp).await?;
    println!();
    success(&format!("Secret written to {BOLD}{path}{RESET}"));
    println!();
    Ok(())
}

async fn cmd_get(client: &Client, path: &str, raw: bool) -> Result<()> {
    let resp = client.get(path, raw).await?;
    let resp = check_status(resp).await?;
    println!();
    header("📦", &format!("Secret: {path}"));
    if raw {
        let bytes = resp.bytes().await.context("failed to read response body")?;
        println!("  {WHITE}{}{RESET}", String::from_utf8_lossy(&bytes));
    } else {
        let body = resp.text().await.context("failed to read response body")?;
        let value: Value = serde_json::from_str(&body).context("failed to parse response JSON")?;
        print_secret_value(&value);
    }
    println!();
    Ok(())
}

async fn cmd_rm(client: &Client, path: &str) -> Result<()> {
    let resp = client.delete(path).await?;
    check_status(resp).await?;
    println!();
    success(&format!("Secret at {BOLD}{path}{RESET} deleted."));
    println!();
    Ok(())
}
