use clap::{Parser, Subcommand};
use profile_sync::{
    Attributes, CdpClient, ClientConfig, ProcessedStore, ProfileSync, ReadFailurePolicy,
    RemoteProfile, SubscriptionFlag, UpsertRequest, evaluate,
};
use std::fmt;
use std::path::PathBuf;
use std::process::ExitCode;

mod config;
mod errors;
mod logging;
mod metrics;
mod sync;

use config::Config;
use errors::ConnectorError;

#[derive(Parser)]
#[command(about = "Keeps CDP profiles and list subscriptions in sync")]
struct Cli {
    #[arg(long, global = true, default_value = "connector.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Create or update one profile and subscribe it to a list.
    Upsert {
        #[arg(long)]
        email: String,
        /// Defaults to sync.default_list_id.
        #[arg(long)]
        list_id: Option<String>,
        /// Profile attribute as key=value; may be repeated.
        #[arg(long = "attr", value_parser = parse_attribute)]
        attributes: Vec<(String, String)>,
    },
    /// Show the suppression flags and subscriptions of a profile.
    Status {
        #[arg(long)]
        email: String,
        #[arg(long)]
        list_id: Option<String>,
    },
    /// Sync every record of a JSON-lines file.
    Sync {
        #[arg(long)]
        input: PathBuf,
        /// Overrides sync.dry_run.
        #[arg(long)]
        dry_run: Option<bool>,
    },
}

fn parse_attribute(raw: &str) -> Result<(String, String), ConnectorError> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(ConnectorError::InvalidAttribute(raw.to_string())),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::from_file(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let _sentry = logging::init(config.logging.as_ref());

    match run(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "connector failed");
            ExitCode::FAILURE
        }
    }
}

/// `status` is a diagnostic, so a failed lookup is reported instead of being
/// shown as a missing profile.
fn client_config(config: &Config, command: &CliCommand, api_key: String) -> ClientConfig {
    let client_config = config.client_config(api_key);
    match command {
        CliCommand::Status { .. } => {
            client_config.with_read_failure_policy(ReadFailurePolicy::FailClosed)
        }
        _ => client_config,
    }
}

async fn run(command: CliCommand, mut config: Config) -> Result<(), ConnectorError> {
    if let Some(metrics_config) = &config.metrics {
        metrics::init(metrics_config)?;
    }

    let client = CdpClient::new(client_config(&config, &command, config.api_key()?))?;

    match command {
        CliCommand::Upsert {
            email,
            list_id,
            attributes,
        } => {
            let list_id = list_id
                .or_else(|| config.sync.default_list_id.clone())
                .ok_or(ConnectorError::MissingListId)?;
            let attributes: Attributes = attributes.into_iter().collect();
            let request = UpsertRequest::new(email.trim().to_lowercase(), attributes, list_id);

            let outcome = ProfileSync::new(client)
                .upsert_profile_with_subscription(&request)
                .await?;
            println!(
                "{}: {} (subscribed: {})",
                outcome.action, outcome.message, outcome.subscribed
            );
        }
        CliCommand::Status { email, list_id } => {
            let list_id = list_id.or_else(|| config.sync.default_list_id.clone());
            let email = email.trim().to_lowercase();
            let profile = client.get_profile(&email).await?;
            let report = StatusReport {
                email: &email,
                profile: profile.as_ref(),
                list_id: list_id.as_deref(),
            };
            print!("{report}");
        }
        CliCommand::Sync { input, dry_run } => {
            if let Some(dry_run) = dry_run {
                config.sync.dry_run = dry_run;
            }
            let records = sync::read_records(&input).map_err(|source| ConnectorError::Input {
                path: input.display().to_string(),
                source,
            })?;

            let mut store = match &config.sync.state_file {
                Some(path) => ProcessedStore::open(path)?,
                None => ProcessedStore::in_memory(),
            };

            let runner = sync::SyncRunner::new(client, config.sync.clone());
            let summary = runner.run(records, &mut store).await;
            if !config.sync.dry_run {
                store.save()?;
            }
            println!("{summary:#?}");
        }
    }

    Ok(())
}

/// Human readable view of a profile's suppression flags and subscriptions.
struct StatusReport<'a> {
    email: &'a str,
    profile: Option<&'a RemoteProfile>,
    list_id: Option<&'a str>,
}

impl fmt::Display for StatusReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(profile) = self.profile else {
            return writeln!(f, "{}: profile not found", self.email);
        };

        writeln!(f, "{}", self.email)?;
        writeln!(f, "  suppressed: {}", profile.suppressed)?;
        writeln!(f, "  unsubscribed: {}", profile.unsubscribed_global)?;
        if let Some(list_id) = self.list_id {
            writeln!(f, "  {list_id}: {}", evaluate(profile, list_id))?;
        }

        if profile.subscriptions.is_empty() {
            writeln!(f, "  no list subscriptions")?;
        }
        for subscription in &profile.subscriptions {
            let flag = match subscription.subscribed {
                SubscriptionFlag::Subscribed => "subscribed",
                SubscriptionFlag::Unsubscribed => "unsubscribed",
                SubscriptionFlag::Unknown => "unknown",
            };
            writeln!(
                f,
                "  - {} {flag} (status: {})",
                subscription.list_id,
                subscription.status.as_deref().unwrap_or("-")
            )?;
        }
        Ok(())
    }
}
