use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use runboard::adapters::{self, ActionOutcome, LogEntry, NotificationLevel};
use runboard::sync::drop_stale;
use runboard::types::RunUpdate;
use runboard::{
    ApiClient, ApiError, ClientConfig, ConnectionError, EventKind, Registry,
    RegistryError, RenderState, Sequenced, Subscription, SubscriptionKey, SyncError, SyncSpec,
    open_subscription,
};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("http request failed: {0}")]
    Api(#[from] ApiError),
    #[error("websocket error: {0}")]
    Connection(#[from] ConnectionError),
    #[error("subscription failed: {0}")]
    Sync(Arc<SyncError>),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("invalid --arg `{0}`; expected NAME=VALUE")]
    InvalidArg(String),
    #[error("run {run_id} has no action named `{name}`")]
    UnknownAction { run_id: String, name: String },
    #[error("action `{name}` failed: {message}")]
    ActionFailed { name: String, message: String },
    #[error("nothing to update; pass --name or --notes")]
    EmptyUpdate,
}

#[derive(Parser, Debug)]
#[command(name = "runboard", about = "Experiment monitor HTTP and live-sync CLI")]
struct Cli {
    #[arg(long, env = "RUNBOARD_BASE_URL", default_value = "http://127.0.0.1:20202")]
    base_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Project summary and its runs.
    Status { project_id: String },
    /// Platform, hyperparameters and actions of one run.
    RunStatus { project_id: String, run_id: String },
    /// Series names recorded for a run and event type.
    Series {
        project_id: String,
        run_id: String,
        event_type: String,
    },
    Run(RunCommand),
    /// Follow a run's logs live.
    Logs {
        project_id: String,
        run_id: String,
        #[command(flatten)]
        follow: FollowArgs,
    },
    /// Follow any event type live, printing new records as JSON lines.
    Watch(WatchArgs),
    /// Invoke a remote action on a run and print its result.
    Action(ActionArgs),
}

#[derive(Args, Debug)]
struct RunCommand {
    #[command(subcommand)]
    command: RunSubcommand,
}

#[derive(Subcommand, Debug)]
enum RunSubcommand {
    Update {
        project_id: String,
        run_id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    Delete {
        project_id: String,
        run_id: String,
    },
}

#[derive(Args, Debug, Clone, Copy)]
struct FollowArgs {
    #[arg(long, help = "Stop after this many seconds (default: until Ctrl-C)")]
    duration_secs: Option<u64>,
}

#[derive(Args, Debug)]
struct WatchArgs {
    project_id: String,
    event_type: String,
    #[arg(long)]
    run_id: Option<String>,
    #[arg(long)]
    series: Option<String>,
    #[arg(long)]
    limit: Option<usize>,
    #[command(flatten)]
    follow: FollowArgs,
}

#[derive(Args, Debug)]
struct ActionArgs {
    project_id: String,
    run_id: String,
    name: String,
    #[arg(long = "arg", value_name = "NAME=VALUE")]
    args: Vec<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = ClientConfig::from_env();
    config.base_url = cli.base_url;

    match cli.command {
        Command::Status { project_id } => {
            let api = ApiClient::new(&config)?;
            let status = api.project_status(&project_id).await?;
            print_json(&serde_json::to_value(&status)?)
        }
        Command::RunStatus { project_id, run_id } => {
            let api = ApiClient::new(&config)?;
            let status = api.run_status(&project_id, &run_id).await?;
            print_json(&serde_json::to_value(&status)?)
        }
        Command::Series {
            project_id,
            run_id,
            event_type,
        } => {
            let api = ApiClient::new(&config)?;
            let names = api
                .series_names(&project_id, &run_id, &EventKind::from_tag(&event_type))
                .await?;
            for name in names {
                println!("{name}");
            }
            Ok(())
        }
        Command::Run(run) => run_run(&config, run).await,
        Command::Logs {
            project_id,
            run_id,
            follow,
        } => run_logs(config, &project_id, &run_id, follow).await,
        Command::Watch(args) => run_watch(config, args).await,
        Command::Action(args) => run_action(config, args).await,
    }
}

async fn run_run(config: &ClientConfig, run: RunCommand) -> Result<(), CliError> {
    let api = ApiClient::new(config)?;
    match run.command {
        RunSubcommand::Update {
            project_id,
            run_id,
            name,
            notes,
        } => {
            let update = RunUpdate { name, notes };
            if update.is_empty() {
                return Err(CliError::EmptyUpdate);
            }
            let json = api.update_run(&project_id, &run_id, &update).await?;
            print_json(&json)
        }
        RunSubcommand::Delete { project_id, run_id } => {
            let json = api.delete_run(&project_id, &run_id).await?;
            print_json(&json)
        }
    }
}

async fn run_logs(
    config: ClientConfig,
    project_id: &str,
    run_id: &str,
    follow: FollowArgs,
) -> Result<(), CliError> {
    let registry = Registry::new(config)?;
    let subscription = open_subscription(&registry, adapters::log_spec(project_id, run_id));
    let result = follow_subscription(&subscription, follow, |entry: &LogEntry| {
        let whom = entry.whom.as_deref().unwrap_or("-");
        let series = entry.series.as_deref().unwrap_or("-");
        let timestamp = entry.timestamp.as_deref().unwrap_or("");
        println!("{timestamp} [{series}] {whom}: {}", entry.message);
        match entry.notification_level() {
            Some(NotificationLevel::Info) => {
                tracing::info!(%project_id, %whom, message = %entry.message, "mention");
            }
            Some(NotificationLevel::Error) => {
                tracing::error!(%project_id, %whom, message = %entry.message, "run reported error");
            }
            None => {}
        }
    })
    .await;
    subscription.close();
    registry.dispose_all();
    result
}

async fn run_watch(config: ClientConfig, args: WatchArgs) -> Result<(), CliError> {
    let registry = Registry::new(config)?;
    let mut key = SubscriptionKey::new(args.project_id, EventKind::from_tag(&args.event_type));
    if let Some(run_id) = args.run_id {
        key = key.with_run(run_id);
    }
    if let Some(series) = args.series {
        key = key.with_series(series);
    }
    if let Some(limit) = args.limit {
        key = key.with_limit(limit);
    }
    let spec = SyncSpec::new(key, |record: &Value| Some(record.clone()), live_record);

    let subscription = open_subscription(&registry, spec);
    let result = follow_subscription(&subscription, args.follow, |record: &Value| {
        println!("{record}");
    })
    .await;
    subscription.close();
    registry.dispose_all();
    result
}

/// A live message shaped like a history record: envelope fields plus the
/// payload under `metadata`.
fn live_record(message: &runboard::Message) -> Option<Value> {
    let mut record = serde_json::to_value(&message.envelope).ok()?;
    let fields = record.as_object_mut()?;
    fields.remove("event-id");
    fields.insert(
        "metadata".to_owned(),
        message.event.payload_json().unwrap_or(Value::Null),
    );
    Some(record)
}

/// Print items as they arrive until the duration elapses or Ctrl-C.
async fn follow_subscription<T, F>(
    subscription: &Subscription<T>,
    follow: FollowArgs,
    mut print: F,
) -> Result<(), CliError>
where
    T: Sequenced + Clone + Send + Sync + 'static,
    F: FnMut(&T),
{
    let mut rendered = subscription.rendered().watch();
    let deadline = async {
        match follow.duration_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    };
    tokio::pin!(deadline);

    let mut newest: Option<T> = None;
    loop {
        let state = rendered.borrow_and_update().clone();
        match state {
            RenderState::Loading => {}
            RenderState::Failed(error) => return Err(CliError::Sync(error)),
            RenderState::Ready(items) => {
                for item in drop_stale(newest.as_ref(), items.to_vec()) {
                    print(&item);
                }
                if let Some(last) = items.last() {
                    newest = Some(last.clone());
                }
            }
        }

        tokio::select! {
            () = &mut deadline => return Ok(()),
            changed = rendered.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
        }
    }
}

async fn run_action(config: ClientConfig, args: ActionArgs) -> Result<(), CliError> {
    let overrides = args
        .args
        .iter()
        .map(|raw| parse_arg(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let api = ApiClient::new(&config)?;
    let status = api.run_status(&args.project_id, &args.run_id).await?;
    let Some(info) = status.action.get(&args.name) else {
        return Err(CliError::UnknownAction {
            run_id: args.run_id,
            name: args.name,
        });
    };
    let action_args = adapters::build_args(info, &overrides);

    let registry = Registry::new(config)?;
    let mut ready = registry.readiness(&args.project_id).watch();
    let timeout = registry.config().reply_timeout;
    let became_ready = tokio::time::timeout(timeout, ready.wait_for(|ready| *ready))
        .await
        .is_ok_and(|ready| ready.is_ok());
    if !became_ready {
        registry.dispose_all();
        return Err(CliError::Connection(ConnectionError::Closed));
    }

    let outcome = adapters::invoke_action(
        &registry,
        &args.project_id,
        &args.run_id,
        &args.name,
        action_args,
    )
    .await;
    registry.dispose_all();

    match outcome? {
        ActionOutcome::Succeeded(result) => print_json(&result),
        ActionOutcome::Failed(message) => Err(CliError::ActionFailed {
            name: args.name,
            message,
        }),
    }
}

fn parse_arg(raw: &str) -> Result<(String, String), CliError> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_owned(), value.to_owned()))
        }
        _ => Err(CliError::InvalidArg(raw.to_owned())),
    }
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
