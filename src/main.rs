//! Gatekeeper viewer backend.
//!
//! Usage:
//!   gatekeeper-viewer serve [--bind 127.0.0.1:8000]
//!   gatekeeper-viewer sessions [--token T] [--all] [--limit 50] [--list-only] [--out ./data]

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{info, warn};

use gatekeeper_viewer::{
    env::{BIND_ADDRESS, resolve_token},
    server::{self, AppState},
    session::{
        SessionBackend, SessionMetadata, SessionRpc, SessionSnapshot, START_TIME_KEY,
        collect_sessions,
        export::{local_time, write_records, write_sessions},
        list_sessions,
        rpc::CopilotCli,
        select, session_id,
    },
};

#[derive(Parser)]
#[command(name = "gatekeeper-viewer")]
#[command(about = "Backend for the Gatekeeper analysis viewer")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the viewer API
    Serve {
        /// Address to bind, defaults to BIND_ADDRESS or 127.0.0.1:8000
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// Dump Copilot sessions to a directory
    Sessions {
        /// GitHub token, defaults to COPILOT_GITHUB_TOKEN, GH_TOKEN or GITHUB_TOKEN
        #[arg(long)]
        token: Option<String>,
        /// Fetch every session instead of the latest ones
        #[arg(long)]
        all: bool,
        /// Maximum number of sessions, 0 for no limit
        #[arg(long, default_value = "50")]
        limit: usize,
        /// Only write sessions.json, skip the per-session event files
        #[arg(long)]
        list_only: bool,
        /// Output directory
        #[arg(short, long, default_value = "./data")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| String::from("gatekeeper_viewer=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { bind } => {
            let address = bind.unwrap_or_else(|| BIND_ADDRESS.as_str().to_owned());
            server::serve(AppState::from_env()?, &address).await?;
        }
        Commands::Sessions {
            token,
            all,
            limit,
            list_only,
            out,
        } => {
            let token = resolve_token(token);
            match &token {
                Some(_) => info!("using the provided token"),
                None => info!("no token found, using the local Copilot CLI login"),
            }

            let mut rpc = CopilotCli::default().connect(token.as_deref()).await?;
            let dumped = dump_sessions(rpc.as_mut(), all, limit, list_only, &out).await;
            if let Err(err) = rpc.stop().await {
                warn!("failed to stop the Copilot CLI: {err}");
            }

            print_sessions(&dumped?);
        }
    }

    Ok(())
}

async fn dump_sessions(
    rpc: &mut dyn SessionRpc,
    all: bool,
    limit: usize,
    list_only: bool,
    out: &Path,
) -> Result<Vec<SessionMetadata>> {
    if list_only {
        let sessions = select(list_sessions(rpc).await?, limit, all);
        write_sessions(out, &sessions).await?;
        return Ok(sessions);
    }

    let snapshot: SessionSnapshot = collect_sessions(rpc, limit, all).await?;
    write_sessions(out, &snapshot.sessions).await?;
    write_records(out, &snapshot).await?;
    Ok(snapshot.sessions)
}

fn print_sessions(sessions: &[SessionMetadata]) {
    println!("{:<20}  {:<38}  SUMMARY", "STARTED", "SESSION");
    for session in sessions {
        let started = session
            .get(START_TIME_KEY)
            .and_then(Value::as_str)
            .map(local_time)
            .unwrap_or_default();
        let summary = session
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or_default();
        println!(
            "{started:<20}  {:<38}  {summary}",
            session_id(session).unwrap_or("-")
        );
    }
    println!("\n{} session(s)", sessions.len());
}
