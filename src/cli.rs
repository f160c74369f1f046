//! Command-line operations besides serving the API

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Subcommand;
use tracing::info;

use crate::format::{format_date, format_friendly, truncate_hash};
use crate::plan::{now, SignalPlan};
use crate::profile::pubkey_shorthand;
use crate::record::{
    build_acknowledgement, build_directive, parse_record, AckFields, AckStatus, Action,
    DirectiveFields, RawEvent, Record,
};
use crate::service::AppContext;

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Follow the relays and serve the HTTP API (default)
    Serve,

    /// Fetch stored directives and print the current plan
    Plan {
        /// How long to wait for stored events
        #[arg(long, default_value = "3000")]
        wait_ms: u64,

        /// Print JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Build an unsigned record and print it as JSON
    #[command(subcommand)]
    Build(BuildCommands),

    /// Validate records from a JSON file (one record or an array)
    Validate {
        file: PathBuf,
    },
}

#[derive(Debug, Subcommand)]
pub enum BuildCommands {
    /// Kind 33321 directive
    Directive {
        #[arg(long)]
        pubkey: String,
        #[arg(long, value_parser = parse_action)]
        action: Action,
        #[arg(long)]
        version: String,
        #[arg(long)]
        hash: String,
        #[arg(long, default_value = "hqz")]
        network: String,
        /// Required for reboot
        #[arg(long)]
        genesis_url: Option<String>,
        /// Required for reboot (unix seconds)
        #[arg(long)]
        required_by: Option<u64>,
        #[arg(long, default_value = "")]
        content: String,
    },

    /// Kind 3333 acknowledgement
    Ack {
        /// Acknowledging node's pubkey
        #[arg(long)]
        pubkey: String,
        /// Signer of the directive being acknowledged
        #[arg(long)]
        directive_pubkey: String,
        #[arg(long, value_parser = parse_action)]
        action: Action,
        #[arg(long, value_parser = parse_status)]
        status: AckStatus,
        #[arg(long)]
        version: String,
        #[arg(long, default_value = "hqz")]
        network: String,
        #[arg(long)]
        node_id: String,
        /// Required when status is failure
        #[arg(long)]
        error: Option<String>,
        #[arg(long)]
        relay_url: Option<String>,
        #[arg(long, default_value = "")]
        content: String,
    },
}

fn parse_action(value: &str) -> Result<Action, String> {
    Action::from_tag(value).ok_or_else(|| format!("unknown action '{}' (upgrade, reboot)", value))
}

fn parse_status(value: &str) -> Result<AckStatus, String> {
    AckStatus::from_tag(value).ok_or_else(|| format!("unknown status '{}' (success, failure)", value))
}

/// Run a one-shot command and return its output
pub async fn execute(ctx: Arc<AppContext>, command: Commands) -> anyhow::Result<String> {
    match command {
        Commands::Serve => Ok(String::new()),
        Commands::Plan { wait_ms, json } => show_plan(ctx, wait_ms, json).await,
        Commands::Build(build) => build_record(build),
        Commands::Validate { file } => validate_file(&file),
    }
}

async fn show_plan(ctx: Arc<AppContext>, wait_ms: u64, json: bool) -> anyhow::Result<String> {
    let handles = ctx.start().await?;
    ctx.warm_profiles().await;

    let deadline = tokio::time::Instant::now() + Duration::from_millis(wait_ms);
    while ctx.feed.is_bootstrapping().await && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let plan = ctx.engine.recompute().await;
    ctx.shutdown();
    for handle in handles {
        handle.abort();
    }

    if json {
        return Ok(serde_json::to_string_pretty(&plan)?);
    }
    Ok(summarize(&ctx, &plan, now()).await)
}

async fn summarize(ctx: &AppContext, plan: &SignalPlan, now: u64) -> String {
    let name = |pubkey: &str| {
        format!(
            "[{}] {}",
            pubkey_shorthand(pubkey),
            ctx.profiles.author_for(pubkey).name
        )
    };

    let mut lines = Vec::new();
    match (&plan.action, plan.is_active) {
        (Some(action), true) => lines.push(format!("Active plan: {}", action)),
        _ => lines.push("No active plan".to_string()),
    }

    if let Some(trigger) = &plan.triggered_by {
        lines.push(format!(
            "Triggered by {} at {} ({})",
            name(&trigger.pubkey),
            format_date(trigger.timestamp),
            format_friendly(trigger.timestamp, now)
        ));
    }

    let view = ctx.engine.latest_view().await;
    for pubkey in &plan.signed_pubkeys {
        let detail = view
            .get(pubkey)
            .map(|e| {
                format!(
                    "{} {} {}",
                    e.version,
                    truncate_hash(e.hash.as_deref().unwrap_or_default(), 6, 4),
                    format_friendly(e.created_at, now)
                )
            })
            .unwrap_or_default();
        lines.push(format!("  signed   {} {}", name(pubkey), detail));
    }
    for pubkey in &plan.pending_pubkeys {
        lines.push(format!("  pending  {}", name(pubkey)));
    }

    lines.join("\n")
}

fn build_record(command: BuildCommands) -> anyhow::Result<String> {
    let event = match command {
        BuildCommands::Directive {
            pubkey,
            action,
            version,
            hash,
            network,
            genesis_url,
            required_by,
            content,
        } => build_directive(
            &DirectiveFields {
                pubkey,
                version,
                hash,
                network,
                action,
                content,
                genesis_url,
                required_by,
            },
            now(),
        )?,
        BuildCommands::Ack {
            pubkey,
            directive_pubkey,
            action,
            status,
            version,
            network,
            node_id,
            error,
            relay_url,
            content,
        } => build_acknowledgement(
            &AckFields {
                pubkey,
                directive_pubkey,
                version,
                network,
                action,
                status,
                node_id,
                content,
                error,
                relay_url,
                action_at: None,
            },
            now(),
        )?,
    };

    let id = event.event_id();
    parse_record(&event.clone().into_signed(String::new()))?;
    info!(event_id = %id, kind = event.kind, "Built unsigned record");

    Ok(serde_json::to_string_pretty(&serde_json::json!({
        "id": id,
        "event": event,
    }))?)
}

/// Accepts a single record or an array of records
pub fn read_records(path: &Path) -> anyhow::Result<Vec<RawEvent>> {
    let content = std::fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&content)?;
    let records = match value {
        serde_json::Value::Array(_) => serde_json::from_value(value)?,
        other => vec![serde_json::from_value(other)?],
    };
    Ok(records)
}

fn validate_file(path: &Path) -> anyhow::Result<String> {
    let records = read_records(path)?;
    let mut lines = Vec::new();
    let mut invalid = 0;

    for raw in &records {
        let id = truncate_hash(&raw.id, 8, 4);
        match parse_record(raw) {
            Ok(Record::Directive(d)) => {
                lines.push(format!("ok       {} directive {} {}", id, d.action.action(), d.version))
            }
            Ok(Record::Acknowledgement(a)) => lines.push(format!(
                "ok       {} ack {} {} from {}",
                id,
                a.action,
                a.outcome.status(),
                a.node_id
            )),
            Err(e) => {
                invalid += 1;
                lines.push(format!("invalid  {} {}", id, e));
            }
        }
        if !raw.has_valid_id() {
            lines.push(format!("warning  {} id does not match content", id));
        }
    }

    if invalid > 0 {
        anyhow::bail!("{}\n{} of {} records invalid", lines.join("\n"), invalid, records.len());
    }
    Ok(lines.join("\n"))
}
