use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context};
use chrono::{NaiveDate, Utc};
use tracing::{error, info, warn};

use sunswitch_common::{SchedulerConfig, SyncConfig};

use crate::{
    logging,
    shelly::ShellyClient,
    sync::{self, RunMode, RunSummary, SyncError},
};

const DEFAULT_CONFIG_PATH: &str = "./sunswitch.json";
const USAGE: &str = "usage: sunswitch-controller [--config PATH] [--date YYYY-MM-DD] [--dry-run]";

#[derive(Debug, Clone, PartialEq, Eq)]
struct CliArgs {
    config_path: PathBuf,
    date: Option<NaiveDate>,
    dry_run: bool,
}

impl CliArgs {
    fn parse<I: IntoIterator<Item = String>>(
        args: I,
        env_config: Option<String>,
    ) -> anyhow::Result<Self> {
        let mut config_path = env_config.map(PathBuf::from);
        let mut date = None;
        let mut dry_run = false;

        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    let value = args.next().context("--config needs a path")?;
                    config_path = Some(PathBuf::from(value));
                }
                "--date" => {
                    let value = args.next().context("--date needs a YYYY-MM-DD value")?;
                    let parsed = NaiveDate::parse_from_str(&value, "%Y-%m-%d")
                        .with_context(|| format!("invalid --date value {value:?}"))?;
                    date = Some(parsed);
                }
                "--dry-run" | "-n" => dry_run = true,
                "--help" | "-h" => bail!("{USAGE}"),
                other => bail!("unknown argument {other:?}\n{USAGE}"),
            }
        }

        Ok(Self {
            config_path: config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH)),
            date,
            dry_run,
        })
    }
}

pub async fn run() -> anyhow::Result<()> {
    let args = match CliArgs::parse(
        std::env::args().skip(1),
        std::env::var("SUNSWITCH_CONFIG").ok(),
    ) {
        Ok(args) => args,
        Err(err) => {
            logging::init_default();
            error!("{err:#}");
            return Err(err);
        }
    };

    let config = match load_config(&args.config_path) {
        Ok(config) => config,
        Err(err) => {
            logging::init_default();
            error!("failed to load configuration: {err:#}");
            error!(
                "create {} with all required settings (see sunswitch.example.json)",
                args.config_path.display()
            );
            return Err(err);
        }
    };
    logging::init(&config.logging)?;

    let sync_config = config.validate().context("configuration is invalid")?;
    log_configuration(&config, &sync_config);

    let client = ShellyClient::new(
        &sync_config.device_address,
        Duration::from_secs(sync_config.request_timeout_secs),
    )
    .context("failed to build HTTP client")?;
    client
        .get_device_info()
        .await
        .with_context(|| format!("failed to query device at {}", client.address()))?;

    let date = args
        .date
        .unwrap_or_else(|| Utc::now().with_timezone(&sync_config.timezone).date_naive());
    let mode = if args.dry_run {
        RunMode::DryRun
    } else {
        RunMode::Apply
    };

    match sync::run_once(&sync_config, &client, date, mode).await {
        Ok(summary) => report_summary(&summary),
        Err(err) => {
            if let SyncError::Interrupted { report, .. } = &err {
                for entry in &report.created {
                    warn!("created before failure: ID {} ({})", entry.id, entry.timespec);
                }
            }
            error!("synchronization failed: {:#}", anyhow::Error::from(err));
            bail!("synchronization failed");
        }
    }
}

fn load_config(path: &Path) -> anyhow::Result<SchedulerConfig> {
    let raw = std::fs::read(path)
        .with_context(|| format!("config file not found: {}", path.display()))?;
    let mut config = SchedulerConfig::from_json(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;

    if let Ok(address) = std::env::var("SUNSWITCH_DEVICE_ADDRESS") {
        config.device_address = address;
    }
    Ok(config)
}

fn log_configuration(config: &SchedulerConfig, settings: &SyncConfig) {
    info!("configuration loaded:");
    info!("  device: {}", settings.device_address);
    info!("  switch ID: {}", settings.switch_id);
    info!(
        "  location: {}, {}",
        settings.location.latitude(),
        settings.location.longitude()
    );
    info!("  timezone: {}", settings.timezone);
    info!("  sunrise offset: {} minutes", settings.sunrise_offset_minutes);
    info!("  sunset automation: {}", settings.enable_sunset_automation);
    info!("  log level: {}", config.logging.level);
}

fn report_summary(summary: &RunSummary) -> anyhow::Result<()> {
    info!("=== SCHEDULE SUMMARY ===");
    info!(
        "sun times on {}: sunrise {}, sunset {}",
        summary.sun.date,
        summary.sun.sunrise.format("%H:%M"),
        summary.sun.sunset.format("%H:%M"),
    );
    info!("recurring daily schedules:");
    for spec in &summary.desired.specs {
        info!("  • {}", spec.description());
    }

    let Some(report) = &summary.report else {
        info!("dry run, no changes made");
        match serde_json::to_string_pretty(&summary.plan) {
            Ok(plan) => println!("{plan}"),
            Err(err) => warn!("could not render plan: {err}"),
        }
        return Ok(());
    };

    info!(
        "device had {} schedule(s) before this run",
        summary.before.len()
    );
    info!(
        "created {}, deleted {}, unchanged {}",
        report.created.len(),
        report.deleted.len() + report.already_absent.len(),
        report.unchanged
    );
    match summary.converged {
        Some(true) => info!("✓ device schedules verified"),
        Some(false) => warn!("device schedules still differ; the next run will retry"),
        None if report.succeeded() => warn!("device schedules could not be verified"),
        None => {}
    }
    info!("note: times drift a few minutes per day; run this regularly (e.g. daily from cron)");

    if report.failures.is_empty() {
        return Ok(());
    }
    for failure in &report.failures {
        error!("failed to {}: {}", failure.operation, failure.error);
    }
    bail!(
        "{} of {} operation(s) rejected by the device",
        report.failures.len(),
        summary.plan.to_create.len() + summary.plan.to_delete.len()
    )
}
