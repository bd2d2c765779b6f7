use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use callgenie_agents::{
    AgentWorkspace, CallStatusPoller, HttpStatusSource, PollConfig, PollOutcome,
};
use callgenie_core::{
    can_use_voice, filter_voices, format_call_duration, format_relative, CallFilter, CallStatus,
    NewAgent, TierPolicyEngine, UnknownTierPolicy, VoiceAccessDescriptor, VoiceFilter,
};
use callgenie_observability::{init_tracing, PolicyMetrics};
use callgenie_storage::Store;
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::watch;

#[derive(Debug, Parser)]
#[command(name = "callgenie")]
#[command(about = "CallGenie tier policy CLI")]
struct Cli {
    #[arg(long, env = "CALLGENIE_DATABASE_URL")]
    database_url: Option<String>,

    /// `reject` or `basic`
    #[arg(long, env = "CALLGENIE_UNKNOWN_TIER", default_value = "reject")]
    unknown_tier: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Slot layout for a tier and agent count.
    Slots {
        #[arg(long)]
        tier: String,
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        count: i64,
    },
    Language {
        #[arg(long)]
        code: String,
        #[arg(long)]
        tier: String,
    },
    /// Filters a JSON array of voice descriptors and reports access.
    Voices {
        file: PathBuf,
        #[arg(long)]
        language: Option<String>,
        #[arg(long)]
        gender: Option<String>,
        #[arg(long)]
        query: Option<String>,
        #[arg(long)]
        only_available: bool,
    },
    Board {
        #[arg(long)]
        user: String,
    },
    Plan {
        #[arg(long)]
        user: String,
        #[arg(long)]
        tier: String,
    },
    AddAgent {
        #[arg(long)]
        user: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        voice: Option<String>,
        #[arg(long)]
        language: Option<String>,
    },
    Calls {
        #[arg(long)]
        user: String,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        agent: Option<String>,
        #[arg(long)]
        query: Option<String>,
    },
    /// Polls a call batch until it finishes, times out or Ctrl-C.
    Watch {
        #[arg(long)]
        batch: String,
        #[arg(long, env = "CALLGENIE_BACKEND_URL")]
        endpoint: String,
        #[arg(long, env = "CALLGENIE_BACKEND_TOKEN")]
        token: Option<String>,
        #[arg(long, default_value_t = 5)]
        interval_secs: u64,
        #[arg(long, default_value_t = 300)]
        timeout_secs: u64,
    },
}

#[derive(Debug, Serialize)]
struct VoiceRow<'a> {
    voice_id: &'a str,
    name: &'a str,
    allowed: bool,
    required_plan: Option<&'a str>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("callgenie_cli");
    let cli = Cli::parse();

    let unknown_tier = UnknownTierPolicy::parse(&cli.unknown_tier)
        .with_context(|| format!("invalid --unknown-tier value `{}`", cli.unknown_tier))?;
    let engine = TierPolicyEngine::new(unknown_tier);

    match cli.command {
        Command::Slots { tier, count } => {
            let board = engine.slots_for(&tier, count)?;
            print_json(&board)?;
        }
        Command::Language { code, tier } => {
            let access = engine.language_access(&code, &tier)?;
            print_json(&access)?;
        }
        Command::Voices {
            file,
            language,
            gender,
            query,
            only_available,
        } => {
            let raw = fs::read_to_string(&file)
                .with_context(|| format!("failed reading {}", file.display()))?;
            let voices: Vec<VoiceAccessDescriptor> =
                serde_json::from_str(&raw).context("voices file must be a JSON array")?;
            let filter = VoiceFilter {
                language,
                gender,
                query,
                only_available,
            };

            let rows = filter_voices(&voices, &filter)
                .into_iter()
                .map(|voice| VoiceRow {
                    voice_id: &voice.voice_id,
                    name: &voice.name,
                    allowed: can_use_voice(voice),
                    required_plan: voice
                        .access_control
                        .as_ref()
                        .and_then(|access| access.required_plan.as_deref()),
                })
                .collect::<Vec<_>>();
            print_json(&rows)?;
        }
        Command::Board { user } => {
            let workspace = build_workspace(engine, cli.database_url.as_deref()).await?;
            print_json(&workspace.slot_board(&user).await?)?;
        }
        Command::Plan { user, tier } => {
            let workspace = build_workspace(engine, cli.database_url.as_deref()).await?;
            print_json(&workspace.set_plan(&user, &tier).await?)?;
        }
        Command::AddAgent {
            user,
            name,
            voice,
            language,
        } => {
            let workspace = build_workspace(engine, cli.database_url.as_deref()).await?;
            let agent = workspace
                .create_agent(
                    &user,
                    NewAgent {
                        name,
                        voice_id: voice,
                        language,
                    },
                )
                .await?;
            print_json(&agent)?;
        }
        Command::Calls {
            user,
            status,
            agent,
            query,
        } => {
            let workspace = build_workspace(engine, cli.database_url.as_deref()).await?;
            let status = status
                .as_deref()
                .map(|raw| CallStatus::parse(raw).with_context(|| format!("unknown status `{raw}`")))
                .transpose()?;
            let calls = workspace
                .call_history(
                    &user,
                    &CallFilter {
                        status,
                        agent_id: agent,
                        query,
                    },
                )
                .await?;

            let now = Utc::now();
            for call in calls {
                println!(
                    "{}  {:<12} {:<18} {:<20} {}",
                    call.call_id,
                    call.status.as_code(),
                    call.phone_number,
                    call.contact_name.as_deref().unwrap_or("-"),
                    match call.duration_secs {
                        Some(secs) => format!(
                            "{} ({})",
                            format_relative(call.started_at, now),
                            format_call_duration(secs)
                        ),
                        None => format_relative(call.started_at, now),
                    }
                );
            }
        }
        Command::Watch {
            batch,
            endpoint,
            token,
            interval_secs,
            timeout_secs,
        } => {
            let workspace = build_workspace(engine, cli.database_url.as_deref()).await?;
            run_watch(
                workspace,
                &batch,
                HttpStatusSource::new(endpoint, token)?,
                PollConfig {
                    interval: Duration::from_secs(interval_secs.max(1)),
                    timeout: Duration::from_secs(timeout_secs),
                },
            )
            .await?;
        }
    }

    Ok(())
}

async fn run_watch(
    workspace: AgentWorkspace<Store>,
    batch_id: &str,
    source: HttpStatusSource,
    config: PollConfig,
) -> Result<()> {
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(true);
        }
    });

    let poller =
        CallStatusPoller::new(source, config).with_metrics(workspace.metrics().clone());
    let outcome = poller.poll(batch_id, cancel_rx).await;

    if let Some(status) = outcome.last_status() {
        workspace.sync_batch(status).await?;
    }

    match outcome {
        PollOutcome::Finished(status) => {
            println!("batch {} finished ({} calls)", status.batch_id, status.calls.len());
        }
        PollOutcome::TimedOut { last } => {
            let pending = last.as_ref().map_or(0, |status| status.pending());
            println!(
                "stopped waiting after {}s with {pending} calls pending; check call history for final results",
                config.timeout.as_secs()
            );
        }
        PollOutcome::Cancelled { .. } => println!("stopped"),
    }

    Ok(())
}

async fn build_workspace(
    engine: TierPolicyEngine,
    database_url: Option<&str>,
) -> Result<AgentWorkspace<Store>> {
    let store = match database_url {
        Some(url) => Store::sqlite(url).await?,
        None => {
            tracing::warn!("no database url given, using an in-memory store");
            Store::memory()
        }
    };

    Ok(AgentWorkspace::new(
        engine,
        Arc::new(store),
        PolicyMetrics::shared(),
    ))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
