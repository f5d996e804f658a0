//! Penyidik AI command-line client
//!
//! Sends a question (or a stdin session of questions) to the investigator
//! agent and prints the reconciled reply.

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::map_err_ignore)]
#![allow(clippy::manual_let_else)]
#![allow(clippy::assigning_clones)]
#![allow(clippy::match_same_arms)]

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use penyidik_ai::config::{AppConfig, Cli};
use penyidik_ai::session::{SessionState, SessionStore};
use penyidik_ai::stream::RunResult;
use penyidik_ai::{
    Attachment, ChatController, ChatSettings, PlaygroundClient, RunOutcome, StaticIdentity,
    SubmissionInput,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present)
    let _ = dotenv();

    let cli = Cli::parse();
    let config = AppConfig::from_cli(&cli).context("failed to load configuration")?;
    init_tracing(config.log.json);

    info!(
        name: "agent.config.loaded",
        base_url = %config.api.base_url,
        agent_id = %config.api.agent_id,
        timeout_secs = config.api.timeout_secs,
        "Agent configuration loaded"
    );

    let sessions = match &config.session.store_path {
        Some(path) => SessionStore::open(path)
            .with_context(|| format!("failed to open session store {}", path.display()))?,
        None => SessionStore::in_memory(),
    };

    let transport = Arc::new(PlaygroundClient::new(&config.api.base_url)?);
    let identity = Arc::new(StaticIdentity::new(config.identity.user_id.clone()));
    let mut chat = ChatController::new(transport, identity, ChatSettings::from(&config))
        .with_sessions(sessions);
    if let Some(session) = &cli.session {
        chat = chat.with_session(SessionState::with_session(session.as_str()));
    }

    let mut files = Vec::with_capacity(cli.files.len());
    for path in &cli.files {
        let attachment = Attachment::from_path(path)
            .await
            .with_context(|| format!("failed to read attachment {}", path.display()))?;
        files.push(attachment);
    }

    if !cli.message.is_empty() || !files.is_empty() {
        let input = SubmissionInput::text(cli.message.join(" ")).with_files(files);
        let outcome = submit(&mut chat, input).await?;
        if !outcome.is_completed() {
            std::process::exit(1);
        }
        return Ok(());
    }

    repl(&mut chat).await
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

/// Read questions from stdin until EOF or `/keluar`.
async fn repl(chat: &mut ChatController) -> anyhow::Result<()> {
    eprintln!("Ketik pertanyaan. Perintah: /baru, /hapus, /sesi, /keluar");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" => {}
            "/keluar" => break,
            "/baru" => chat.new_session(),
            "/hapus" => chat.clear_history(),
            "/sesi" => {
                for record in chat.sessions().records() {
                    println!("{}  {}  {}", record.session_id, record.created_at, record.title);
                }
            }
            text => {
                if let Err(e) = submit(chat, SubmissionInput::text(text)).await {
                    tracing::warn!(error = %e, "Submission failed");
                }
            }
        }
    }
    Ok(())
}

/// Run one submission, aborting it on Ctrl-C.
async fn submit(chat: &mut ChatController, input: SubmissionInput) -> anyhow::Result<RunOutcome> {
    let handle = chat.abort_handle();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.abort();
        }
    });

    let result = chat.handle_stream_response(input, None).await;
    watcher.abort();

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) if e.is_validation() => {
            eprintln!("{e}");
            anyhow::bail!("submission rejected");
        }
        Err(e) => return Err(e.into()),
    };
    print_outcome(&outcome);
    Ok(outcome)
}

fn print_outcome(outcome: &RunOutcome) {
    match &outcome.result {
        RunResult::Completed => println!("{}", outcome.content),
        RunResult::Errored(c) => eprintln!("{}", c.user_message),
        RunResult::Cancelled { reason } => {
            println!("{}", outcome.content);
            if let Some(reason) = reason {
                eprintln!("(dihentikan: {reason})");
            }
        }
    }
    for tool in &outcome.tool_calls {
        eprintln!("[alat] {}", tool.tool_name);
    }
    if !outcome.citations.is_empty() {
        println!();
        println!("Sumber:");
        for (i, citation) in outcome.citations.iter().enumerate() {
            let source = citation.source.as_deref().unwrap_or("-");
            match &citation.url {
                Some(url) => println!("  [{}] {} ({source}) {url}", i + 1, citation.title),
                None => println!("  [{}] {} ({source})", i + 1, citation.title),
            }
        }
    } else if outcome.citations_count > 0 {
        println!();
        println!("Sumber: {} referensi", outcome.citations_count);
    }
}
