use chrono::{NaiveDate, Utc};
use clap::{Args as ClapArgs, Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use tractorsync::audio::AudioBlob;
use tractorsync::config::Config;
use tractorsync::models::{
  MaintenancePatch, MaintenanceUpdate, NewMaintenanceRecord, TractorPatch, TractorUpdate,
  UsageHours, UsageLogEntry,
};
use tractorsync::remote::HttpApi;
use tractorsync::store::MemoryStore;
use tractorsync::{Submission, SyncService};

#[derive(Parser, Debug)]
#[command(name = "tractorsync")]
#[command(about = "Offline-first sync client for the TractorCare API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/tractorsync/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Log to stderr instead of the rolling log file
  #[arg(long, global = true)]
  log_stderr: bool,

  /// Keep the queue and cache in memory for this run only
  #[arg(long, global = true)]
  ephemeral: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show connectivity, queue length and last sync time
  Status,
  /// Probe the backend now
  Check,
  /// Deliver queued changes now
  Sync,
  /// List queued changes
  Pending,
  /// Drop a queued change that will never succeed
  Discard { id: String },
  /// Log a day of tractor usage
  LogUsage(LogUsageArgs),
  /// Record a completed maintenance task
  RecordMaintenance(RecordMaintenanceArgs),
  /// Edit a maintenance record
  UpdateMaintenance(UpdateMaintenanceArgs),
  /// Edit tractor details
  UpdateTractor(UpdateTractorArgs),
  /// Upload an engine recording for classification
  UploadAudio {
    tractor_id: String,
    file: PathBuf,
    /// Engine hours at the time of recording
    #[arg(long)]
    hours: Option<f64>,
  },
  /// List tractors
  Tractors {
    /// Fetch from the backend instead of the cache
    #[arg(long)]
    refresh: bool,
  },
  /// Probe periodically and print state changes until Ctrl-C
  Watch,
}

#[derive(ClapArgs, Debug)]
struct LogUsageArgs {
  tractor_id: String,
  /// Hour meter reading at the end of the day
  #[arg(long, conflicts_with = "hours_operated", required_unless_present = "hours_operated")]
  end_hours: Option<f64>,
  /// Hours worked
  #[arg(long)]
  hours_operated: Option<f64>,
  /// Day of use (default: today)
  #[arg(long)]
  date: Option<NaiveDate>,
  #[arg(long)]
  notes: Option<String>,
  #[arg(long)]
  operator: Option<String>,
  #[arg(long)]
  location: Option<String>,
}

#[derive(ClapArgs, Debug)]
struct RecordMaintenanceArgs {
  tractor_id: String,
  #[arg(long)]
  task: String,
  #[arg(long, default_value = "")]
  description: String,
  /// Engine hours when the task was completed
  #[arg(long)]
  hours: f64,
  #[arg(long, default_value_t = 0)]
  minutes: u32,
  /// Cost in RWF
  #[arg(long)]
  cost: Option<u64>,
  #[arg(long)]
  location: Option<String>,
  #[arg(long)]
  provider: Option<String>,
  #[arg(long)]
  notes: Option<String>,
  #[arg(long)]
  performed_by: Option<String>,
  /// Part used (repeatable)
  #[arg(long = "part")]
  parts: Vec<String>,
}

#[derive(ClapArgs, Debug)]
struct UpdateMaintenanceArgs {
  record_id: String,
  #[arg(long)]
  tractor: String,
  #[arg(long)]
  description: Option<String>,
  #[arg(long)]
  notes: Option<String>,
  #[arg(long)]
  cost: Option<u64>,
  #[arg(long)]
  minutes: Option<u32>,
}

#[derive(ClapArgs, Debug)]
struct UpdateTractorArgs {
  tractor_id: String,
  #[arg(long)]
  engine_hours: Option<f64>,
  #[arg(long)]
  usage_intensity: Option<String>,
  #[arg(long)]
  health_status: Option<String>,
  #[arg(long)]
  model: Option<String>,
  #[arg(long)]
  make: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = setup_logging(args.log_stderr);

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  let service = if args.ephemeral {
    let api = HttpApi::new(&config.api, Config::get_api_token())?;
    SyncService::new(
      Arc::new(api),
      Arc::new(MemoryStore::new()),
      config.monitor.interval(),
    )?
  } else {
    SyncService::from_config(&config)?
  };

  run(&service, args.command).await
}

async fn run(service: &SyncService, command: Command) -> Result<()> {
  match command {
    Command::Status => {
      service.check_connectivity().await;
      print_status(service)?;
    }
    Command::Check => {
      let online = service.check_connectivity().await;
      println!("{}", if online { "online" } else { "offline" });
    }
    Command::Sync => {
      service.check_connectivity().await;
      match service.sync_now().await {
        Some(report) => println!(
          "synced {} of {} change(s), {} failed",
          report.succeeded, report.attempted, report.failed
        ),
        None if !service.is_online() => println!("offline, nothing sent"),
        None => println!("a sync is already running"),
      }
    }
    Command::Pending => {
      let pending = service.pending_changes()?;
      if pending.is_empty() {
        println!("no pending changes");
      }
      for record in pending {
        println!(
          "{}  {:<18} {:<12} {}",
          record.id,
          record.change.kind(),
          record.change.tractor_id(),
          record.created_at.to_rfc3339()
        );
      }
    }
    Command::Discard { id } => {
      if service.discard_change(&id)? {
        println!("discarded {}", id);
      } else {
        println!("no pending change with id {}", id);
      }
    }
    Command::LogUsage(args) => {
      let hours = match (args.end_hours, args.hours_operated) {
        (Some(end), _) => UsageHours::EndHours(end),
        (None, Some(hours)) => UsageHours::HoursOperated(hours),
        (None, None) => return Err(eyre!("Either --end-hours or --hours-operated is required")),
      };
      let entry = UsageLogEntry {
        tractor_id: args.tractor_id,
        hours,
        date: args.date.unwrap_or_else(|| Utc::now().date_naive()),
        notes: args.notes,
        operator_name: args.operator,
        location: args.location,
      };

      service.check_connectivity().await;
      let submission = service.log_usage(entry).await?;
      print_submission("usage log", submission, |log| log.id.clone());
    }
    Command::RecordMaintenance(args) => {
      let record = NewMaintenanceRecord {
        tractor_id: args.tractor_id,
        task_name: args.task,
        description: args.description,
        completion_date: Utc::now(),
        completion_hours: args.hours,
        actual_time_minutes: args.minutes,
        actual_cost_rwf: args.cost,
        service_location: args.location,
        service_provider: args.provider,
        notes: args.notes,
        performed_by: args.performed_by,
        parts_used: args.parts,
      };

      service.check_connectivity().await;
      let submission = service.record_maintenance(record).await?;
      print_submission("maintenance record", submission, |record| record.id.clone());
    }
    Command::UpdateMaintenance(args) => {
      let update = MaintenanceUpdate {
        record_id: args.record_id,
        tractor_id: args.tractor,
        fields: MaintenancePatch {
          description: args.description,
          notes: args.notes,
          actual_cost_rwf: args.cost,
          actual_time_minutes: args.minutes,
          ..Default::default()
        },
      };

      service.check_connectivity().await;
      let submission = service.update_maintenance(update).await?;
      print_submission("maintenance update", submission, |_| "ok".to_string());
    }
    Command::UpdateTractor(args) => {
      let update = TractorUpdate {
        tractor_id: args.tractor_id,
        fields: TractorPatch {
          engine_hours: args.engine_hours,
          usage_intensity: args.usage_intensity,
          health_status: args.health_status,
          model: args.model,
          make: args.make,
        },
      };

      service.check_connectivity().await;
      let submission = service.update_tractor(update).await?;
      print_submission("tractor update", submission, |tractor| {
        format!("{} at {} h", tractor.tractor_id, tractor.engine_hours)
      });
    }
    Command::UploadAudio {
      tractor_id,
      file,
      hours,
    } => {
      let blob = AudioBlob::from_file(&file).await?;

      service.check_connectivity().await;
      let submission = service.record_audio(blob, &tractor_id, hours).await?;
      print_submission("audio upload", submission, |prediction| {
        format!(
          "{:?} ({:.0}% confidence)",
          prediction.prediction_class,
          prediction.confidence * 100.0
        )
      });
    }
    Command::Tractors { refresh } => {
      let tractors = if refresh {
        service.check_connectivity().await;
        let result = service.refresh_tractors().await?;
        if result.is_offline() {
          eprintln!("backend unreachable, showing cached tractors");
        }
        result.data
      } else {
        service.tractors()?
      };

      for tractor in tractors {
        println!(
          "{:<12} {:<18} {:>9.1} h  {}",
          tractor.tractor_id,
          tractor.model,
          tractor.engine_hours,
          tractor.health_status.as_deref().unwrap_or("-")
        );
      }
    }
    Command::Watch => watch(service).await?,
  }

  Ok(())
}

async fn watch(service: &SyncService) -> Result<()> {
  let mut rx = service.subscribe();
  let task = service.start_monitor();

  loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => break,
      changed = rx.changed() => {
        if changed.is_err() {
          break;
        }
        let state = *rx.borrow_and_update();
        println!(
          "{} | syncing: {} | pending: {}",
          if state.is_online { "online" } else { "offline" },
          state.is_syncing,
          state.pending_count
        );
      }
    }
  }

  task.shutdown().await;
  Ok(())
}

fn print_status(service: &SyncService) -> Result<()> {
  let state = service.status();
  println!("online:   {}", state.is_online);
  println!("syncing:  {}", state.is_syncing);
  println!("pending:  {}", state.pending_count);
  match service.last_sync()? {
    Some(at) => println!("last sync: {}", at.to_rfc3339()),
    None => println!("last sync: never"),
  }
  Ok(())
}

fn print_submission<T>(what: &str, submission: Submission<T>, describe: impl FnOnce(&T) -> String) {
  match submission {
    Submission::Synced(value) => println!("{} synced: {}", what, describe(&value)),
    Submission::Queued { change_id, warning } => {
      if let Some(warning) = warning {
        eprintln!("warning: {}", warning);
      }
      println!("{} queued as {}", what, change_id);
    }
  }
}

/// Log to a daily rolling file under the data dir, or to stderr.
///
/// The returned guard flushes the file writer on drop.
fn setup_logging(log_stderr: bool) -> Option<WorkerGuard> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  let log_dir = dirs::data_dir().map(|d| d.join("tractorsync").join("logs"));
  match log_dir {
    Some(dir) if !log_stderr && std::fs::create_dir_all(&dir).is_ok() => {
      let appender = tracing_appender::rolling::daily(dir, "tractorsync.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
      Some(guard)
    }
    _ => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
      None
    }
  }
}
