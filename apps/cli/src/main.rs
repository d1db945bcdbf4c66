use std::{path::PathBuf, process::ExitCode, sync::Arc};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use client_core::{
    is_valid_entry, ControllerEvent, ControllerFactory, ControllerKind, ForageableController,
};
use futures::StreamExt;
use serde::Serialize;
use shared::{
    domain::{Forageable, ForageableId},
    error::{ErrorCode, ErrorReport},
};
use storage::{RecordStream, SqliteForageableStore};
use tokio::{runtime::Handle, sync::broadcast};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, normalize_database_url};

#[derive(Parser, Debug)]
#[command(name = "forage", about = "Track foraging spots in a local database")]
struct Cli {
    /// Config file (defaults to ./forage.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(flatten)]
    Store(StoreCommand),
    /// Check form input without touching the database.
    Validate {
        #[arg(long, default_value = "")]
        name: String,
        #[arg(long, default_value = "")]
        address: String,
    },
}

/// Commands that need the forageable store.
#[derive(Subcommand, Debug)]
enum StoreCommand {
    /// Print every stored forageable.
    List,
    Show {
        #[arg(long)]
        id: i64,
    },
    Add(EntryArgs),
    Update {
        #[arg(long)]
        id: i64,
        #[command(flatten)]
        entry: EntryArgs,
    },
    Delete {
        #[arg(long)]
        id: i64,
    },
    /// Stream snapshots until interrupted.
    Watch {
        #[arg(long)]
        id: Option<i64>,
    },
}

#[derive(Args, Debug)]
struct EntryArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    address: String,
    #[arg(long)]
    in_season: bool,
    #[arg(long, default_value = "")]
    notes: String,
}

#[derive(Serialize)]
struct WriteSummary {
    op: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<ForageableId>,
    changed: bool,
}

#[derive(Serialize)]
struct ValidationSummary {
    valid: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let mut settings = load_settings(cli.config.as_deref())?;
    if let Some(database_url) = cli.database_url {
        settings.database_url = database_url;
    }

    let filter = EnvFilter::try_new(&settings.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let command = match cli.command {
        Command::Store(command) => command,
        Command::Validate { name, address } => return validate(&name, &address),
    };

    let database_url = normalize_database_url(&settings.database_url);
    let store = SqliteForageableStore::new(&database_url)
        .await
        .with_context(|| format!("failed to open forageable store at '{database_url}'"))?;
    info!(database_url = %database_url, "opened forageable store");

    let factory = ControllerFactory::new(Arc::new(store), Handle::current());
    let controller = factory.create_kind(ControllerKind::Forageable);

    run(&controller, command).await
}

async fn run(controller: &ForageableController, command: StoreCommand) -> Result<ExitCode> {
    match command {
        StoreCommand::List => {
            let all = current_snapshot(controller).await?;
            print_json(&all)?;
        }
        StoreCommand::Show { id } => match find(controller, ForageableId(id)).await? {
            Some(forageable) => print_json(&forageable)?,
            None => return report_not_found(id),
        },
        StoreCommand::Add(entry) => {
            if !is_valid_entry(&entry.name, &entry.address) {
                return report_invalid_entry();
            }
            let events = controller.subscribe_events();
            controller.add_forageable(entry.name, entry.address, entry.in_season, entry.notes);
            return finish_write(controller, events).await;
        }
        StoreCommand::Update { id, entry } => {
            if !is_valid_entry(&entry.name, &entry.address) {
                return report_invalid_entry();
            }
            let events = controller.subscribe_events();
            controller.update_forageable(
                ForageableId(id),
                entry.name,
                entry.address,
                entry.in_season,
                entry.notes,
            );
            return finish_write(controller, events).await;
        }
        StoreCommand::Delete { id } => {
            let Some(forageable) = find(controller, ForageableId(id)).await? else {
                return report_not_found(id);
            };
            let events = controller.subscribe_events();
            controller.delete_forageable(forageable);
            return finish_write(controller, events).await;
        }
        StoreCommand::Watch { id } => watch(controller, id.map(ForageableId)).await?,
    }

    Ok(ExitCode::SUCCESS)
}

async fn current_snapshot(controller: &ForageableController) -> Result<Vec<Forageable>> {
    controller
        .observe_all()
        .next()
        .await
        .ok_or_else(|| anyhow!("forageable query ended without a snapshot"))?
        .context("failed to query forageables")
}

async fn find(controller: &ForageableController, id: ForageableId) -> Result<Option<Forageable>> {
    let all = current_snapshot(controller).await?;
    Ok(all.into_iter().find(|forageable| forageable.id == Some(id)))
}

async fn finish_write(
    controller: &ForageableController,
    mut events: broadcast::Receiver<ControllerEvent>,
) -> Result<ExitCode> {
    controller.settle().await;

    match events.try_recv() {
        Ok(ControllerEvent::WriteCompleted { op, id, changed }) => {
            if !changed {
                warn!(op = op.as_str(), "write matched no stored forageable");
            }
            print_json(&WriteSummary {
                op: op.as_str(),
                id,
                changed,
            })?;
            Ok(ExitCode::SUCCESS)
        }
        Ok(ControllerEvent::WriteFailed { op, message, .. }) => {
            print_report(&ErrorReport::new(
                ErrorCode::Storage,
                format!("{op} failed: {message}"),
            ))?;
            Ok(ExitCode::from(1))
        }
        Err(err) => Err(anyhow!("write outcome unavailable: {err}")),
    }
}

async fn watch(controller: &ForageableController, id: Option<ForageableId>) -> Result<()> {
    match id {
        Some(id) => print_until_interrupted(controller.observe_one(id)).await,
        None => print_until_interrupted(controller.observe_all()).await,
    }
}

async fn print_until_interrupted<T: Serialize>(mut stream: RecordStream<T>) -> Result<()> {
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            next = stream.next() => match next {
                Some(snapshot) => print_json_line(&snapshot?)?,
                None => return Ok(()),
            },
        }
    }
}

fn validate(name: &str, address: &str) -> Result<ExitCode> {
    let valid = is_valid_entry(name, address);
    print_json(&ValidationSummary { valid })?;
    Ok(if valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

fn report_not_found(id: i64) -> Result<ExitCode> {
    print_report(&ErrorReport::new(
        ErrorCode::NotFound,
        format!("no forageable with id {id}"),
    ))?;
    Ok(ExitCode::from(1))
}

fn report_invalid_entry() -> Result<ExitCode> {
    print_report(&ErrorReport::new(
        ErrorCode::Validation,
        "name and address must not be blank",
    ))?;
    Ok(ExitCode::from(2))
}

fn print_report(report: &ErrorReport) -> Result<()> {
    eprintln!("{}", serde_json::to_string(report)?);
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_json_line<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_parses_outside_store_commands() {
        let cli = Cli::try_parse_from(["forage", "validate", "--name", "Oak", "--address", " "])
            .expect("parse validate");
        assert!(matches!(
            cli.command,
            Command::Validate { ref name, ref address } if name == "Oak" && address == " "
        ));
    }

    #[test]
    fn store_commands_parse_at_top_level() {
        let cli = Cli::try_parse_from(["forage", "list"]).expect("parse list");
        assert!(matches!(cli.command, Command::Store(StoreCommand::List)));

        let cli = Cli::try_parse_from([
            "forage",
            "update",
            "--id",
            "5",
            "--name",
            "New",
            "--address",
            "Addr",
            "--in-season",
        ])
        .expect("parse update");
        assert!(matches!(
            cli.command,
            Command::Store(StoreCommand::Update { id: 5, ref entry }) if entry.in_season
        ));
    }
}
