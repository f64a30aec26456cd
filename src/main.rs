//! serial-broadcast - replay a byte timeline to many serial devices
//!
//! Connects every requested port, then sends each timeline byte to all of
//! them at its scheduled time. Devices that fail a write are dropped and
//! playback continues with the rest.

use clap::{Parser, Subcommand};
use serde::Serialize;
use serial_broadcast_core::cli::output::{print_json, print_json_line};
use serial_broadcast_core::cli::send::{byte_arg, send_byte, ManualSend};
use serial_broadcast_core::cli::{
    print_exit_codes, render_event, summary_text, CliResult, ExitCodes, OutputFormat,
};
use serial_broadcast_core::config::{self, LoggingConfig};
use serial_broadcast_core::core::transport::list_ports;
use serial_broadcast_core::{
    AppConfig, ConfigError, DeviceOpener, DeviceRegistry, EventBus, MemoryOpener, PlaybackError,
    PlaybackOutcome, PlaybackScheduler, PlaybackSummary, SerialPortOpener, TickDriver, Timeline,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// serial-broadcast CLI
#[derive(Parser, Debug)]
#[command(
    name = "serial-broadcast",
    version,
    about = "Replay a timeline of bytes to multiple serial devices",
    long_about = None
)]
struct Cli {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    format: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "SERIAL_BROADCAST_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available serial ports
    ListPorts {
        /// Show detailed info
        #[arg(short, long)]
        detailed: bool,
    },

    /// Print a timeline file
    Inspect {
        /// CSV file with `time,data` columns
        file: PathBuf,
    },

    /// Play a timeline to one or more devices
    Play(PlayArgs),

    /// Send a single byte to connected devices
    Send(SendArgs),

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show exit codes
    ExitCodes,
}

#[derive(clap::Args, Debug)]
struct PlayArgs {
    /// CSV file with `time,data` columns
    file: PathBuf,

    /// Device to send to (repeatable)
    #[arg(short, long = "port", required = true)]
    ports: Vec<String>,

    /// Baud rate (defaults to config)
    #[arg(short, long)]
    baud: Option<u32>,

    /// Tick interval in milliseconds (defaults to config)
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Play to in-memory devices instead of real ports
    #[arg(long)]
    dry_run: bool,

    /// Stop as soon as every device has been disconnected
    #[arg(long)]
    stop_when_empty: bool,
}

#[derive(clap::Args, Debug)]
struct SendArgs {
    /// Byte to send, decimal (32) or hex (0x20)
    #[arg(value_parser = byte_arg)]
    byte: u8,

    /// Device to connect (repeatable)
    #[arg(short, long = "port", required = true)]
    ports: Vec<String>,

    /// Send only to this device instead of broadcasting
    #[arg(short, long)]
    target: Option<String>,

    /// Baud rate (defaults to config)
    #[arg(short, long)]
    baud: Option<u32>,

    /// Send to in-memory devices instead of real ports
    #[arg(long)]
    dry_run: bool,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the config file location
    Path,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => return finish(&cli, &CliResult::from(e)),
    };
    let _log_guard = init_logging(&cli, &config.logging);

    let result = match &cli.command {
        Commands::ListPorts { detailed } => show_ports(&cli, *detailed),
        Commands::Inspect { file } => inspect(&cli, file),
        Commands::Play(args) => play(&cli, &config, args).await,
        Commands::Send(args) => send(&cli, &config, args).await,
        Commands::Config { action } => handle_config(&cli, &config, action),
        Commands::ExitCodes => {
            print_exit_codes();
            CliResult::success()
        }
    };

    finish(&cli, &result)
}

fn finish(cli: &Cli, result: &CliResult) -> ExitCode {
    match (result, result.message()) {
        (CliResult::Error(_, _), Some(msg)) => eprintln!("Error: {msg}"),
        (CliResult::Success(_), Some(msg)) if !cli.quiet && cli.format == OutputFormat::Text => {
            println!("{msg}")
        }
        _ => {}
    }
    result.to_exit_code()
}

fn config_location(cli: &Cli) -> Option<PathBuf> {
    cli.config.clone().or_else(config::config_path)
}

fn load_config(cli: &Cli) -> Result<AppConfig, ConfigError> {
    match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => match AppConfig::load() {
            Err(ConfigError::NoConfigDir) => Ok(AppConfig::default()),
            other => other,
        },
    }
}

/// Install the subscriber; the guard must live until exit to flush the log file
fn init_logging(cli: &Cli, logging: &LoggingConfig) -> Option<WorkerGuard> {
    let default = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let stderr = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let file_writer = logging.file.as_deref().and_then(|path| {
        let name = path.file_name()?;
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        Some(tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name)))
    });

    match file_writer {
        Some((writer, guard)) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}

fn show_ports(cli: &Cli, detailed: bool) -> CliResult {
    let ports = match list_ports() {
        Ok(ports) => ports,
        Err(e) => return e.into(),
    };

    if ports.is_empty() {
        if !cli.quiet {
            println!("No serial ports found.");
        }
        return CliResult::success();
    }

    match cli.format {
        OutputFormat::Json => {
            let json: Vec<serde_json::Value> = ports
                .iter()
                .map(|p| {
                    serde_json::json!({
                        "name": p.port_name,
                        "type": format!("{:?}", p.port_type)
                    })
                })
                .collect();
            if let Err(e) = print_json(&json) {
                return CliResult::error(ExitCodes::ERROR, e.to_string());
            }
        }
        OutputFormat::Text => {
            if detailed {
                println!("Available Serial Ports:");
                println!("{:-<60}", "");
                for port in &ports {
                    println!("  {} [{:?}]", port.port_name, port.port_type);
                }
            } else {
                for port in &ports {
                    println!("{}", port.port_name);
                }
            }
        }
    }

    CliResult::success()
}

#[derive(Serialize)]
struct InspectReport<'a> {
    file: &'a Path,
    count: usize,
    duration_secs: f64,
    #[serde(flatten)]
    timeline: &'a Timeline,
}

fn inspect(cli: &Cli, file: &Path) -> CliResult {
    let timeline = match Timeline::load_csv(file) {
        Ok(timeline) => timeline,
        Err(e) => return e.into(),
    };

    match cli.format {
        OutputFormat::Json => {
            let report = InspectReport {
                file,
                count: timeline.len(),
                duration_secs: timeline.duration_secs(),
                timeline: &timeline,
            };
            if let Err(e) = print_json(&report) {
                return CliResult::error(ExitCodes::ERROR, e.to_string());
            }
            CliResult::success()
        }
        OutputFormat::Text => {
            if !cli.quiet {
                println!("{:>10}  {:>4}  {:>3}", "time (s)", "hex", "dec");
                for event in &timeline {
                    println!(
                        "{:>10.3}  {:>4}  {:>3}",
                        event.time_secs(),
                        event.hex(),
                        event.payload()
                    );
                }
            }
            CliResult::success_with_message(format!(
                "{} events, {:.3}s",
                timeline.len(),
                timeline.duration_secs()
            ))
        }
    }
}

/// Effective play settings after merging flags over config
struct PlayOptions {
    ports: Vec<String>,
    baud: u32,
    tick: Duration,
    stop_when_empty: bool,
}

async fn play(cli: &Cli, config: &AppConfig, args: &PlayArgs) -> CliResult {
    let timeline = match Timeline::load_csv(&args.file) {
        Ok(timeline) => timeline,
        Err(e) => return e.into(),
    };
    if timeline.is_empty() {
        return PlaybackError::NoData.into();
    }

    let options = PlayOptions {
        ports: args.ports.clone(),
        baud: args.baud.unwrap_or(config.serial.baud_rate),
        tick: args.tick_ms.map_or_else(|| config.tick_interval(), Duration::from_millis),
        stop_when_empty: args.stop_when_empty || config.playback.stop_when_no_devices,
    };

    if args.dry_run {
        let opener = MemoryOpener::with_ports(options.ports.iter().cloned());
        let result = run_playback(cli, config, &options, opener.clone(), timeline).await;
        if !cli.quiet && cli.format == OutputFormat::Text {
            for name in opener.port_names() {
                if let Some(port) = opener.port(&name) {
                    eprintln!("{name}: {} bytes written", port.written().len());
                }
            }
        }
        result
    } else {
        run_playback(cli, config, &options, SerialPortOpener, timeline).await
    }
}

async fn run_playback<O: DeviceOpener>(
    cli: &Cli,
    config: &AppConfig,
    options: &PlayOptions,
    opener: O,
    timeline: Timeline,
) -> CliResult {
    let events = config.event_bus(timeline.len());
    let printer = (!cli.quiet).then(|| spawn_printer(events.subscribe(), cli.format, cli.verbose));

    let registry = Arc::new(
        DeviceRegistry::new(opener, events).with_link_settings(config.link_settings()),
    );

    let connected = registry.connect_each(&options.ports, options.baud);
    if !cli.quiet {
        eprintln!(
            "{} connected, {} failed",
            connected.success_count(),
            connected.failure_count()
        );
    }

    let result = if connected.success_count() == 0 {
        match connected.failed.into_iter().next() {
            Some((_, e)) => CliResult::from(e),
            None => PlaybackError::NoDevices.into(),
        }
    } else {
        drive(cli, options, &registry, timeline).await
    };

    registry.disconnect_all();
    drop(registry);

    // Every sender is gone now, so the printer drains and exits
    if let Some(printer) = printer {
        let _ = printer.await;
    }
    result
}

async fn drive<O: DeviceOpener>(
    cli: &Cli,
    options: &PlayOptions,
    registry: &Arc<DeviceRegistry<O>>,
    timeline: Timeline,
) -> CliResult {
    let (cancel_tx, cancel_rx) = mpsc::channel(1);
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = cancel_tx.try_send(());
    }) {
        return CliResult::error(ExitCodes::INTERNAL_ERROR, format!("Cannot install Ctrl+C handler: {e}"));
    }

    let mut scheduler = PlaybackScheduler::new(timeline, Arc::clone(registry));
    let driver = TickDriver::new(options.tick).stop_when_no_devices(options.stop_when_empty);
    tracing::info!(
        "Playing {} events every {:?} to {} devices",
        scheduler.len(),
        driver.interval(),
        registry.connected_count()
    );

    let summary = match driver.run(&mut scheduler, cancel_rx).await {
        Ok(summary) => summary,
        Err(e) => return e.into(),
    };
    report_summary(cli, &summary)
}

fn report_summary(cli: &Cli, summary: &PlaybackSummary) -> CliResult {
    // The summary shares stdout with the JSON event stream, so keep it one line
    if cli.format == OutputFormat::Json {
        if let Err(e) = print_json_line(summary) {
            return CliResult::error(ExitCodes::ERROR, e.to_string());
        }
    }

    let text = summary_text(summary);

    match summary.outcome {
        PlaybackOutcome::Completed if summary.failed_sends == 0 => {
            CliResult::success_with_message(text)
        }
        PlaybackOutcome::Completed => CliResult::error(ExitCodes::PARTIAL_FAILURE, text),
        PlaybackOutcome::Cancelled => {
            CliResult::error(ExitCodes::CANCELLED, format!("Cancelled: {text}"))
        }
        PlaybackOutcome::NoDevicesLeft => {
            CliResult::error(ExitCodes::NO_DEVICES, format!("All devices lost: {text}"))
        }
    }
}

async fn send(cli: &Cli, config: &AppConfig, args: &SendArgs) -> CliResult {
    let baud = args.baud.unwrap_or(config.serial.baud_rate);
    if args.dry_run {
        let opener = MemoryOpener::with_ports(args.ports.iter().cloned());
        run_send(cli, config, args, baud, opener).await
    } else {
        run_send(cli, config, args, baud, SerialPortOpener).await
    }
}

async fn run_send<O: DeviceOpener>(
    cli: &Cli,
    config: &AppConfig,
    args: &SendArgs,
    baud: u32,
    opener: O,
) -> CliResult {
    let events = EventBus::default();
    let printer = (!cli.quiet).then(|| spawn_printer(events.subscribe(), cli.format, cli.verbose));
    let registry = DeviceRegistry::new(opener, events).with_link_settings(config.link_settings());

    let connected = registry.connect_each(&args.ports, baud);
    if !cli.quiet {
        eprintln!(
            "{} connected, {} failed",
            connected.success_count(),
            connected.failure_count()
        );
    }

    let result = if connected.success_count() == 0 {
        match connected.failed.into_iter().next() {
            Some((_, e)) => CliResult::from(e),
            None => PlaybackError::NoDevices.into(),
        }
    } else {
        match send_byte(&registry, args.byte, args.target.as_deref()) {
            Ok(sent) => report_send(cli, &sent),
            Err(e) => e.into(),
        }
    };

    registry.disconnect_all();
    drop(registry);

    if let Some(printer) = printer {
        let _ = printer.await;
    }
    result
}

fn report_send(cli: &Cli, sent: &ManualSend) -> CliResult {
    if cli.format == OutputFormat::Json {
        if let Err(e) = print_json_line(sent) {
            return CliResult::error(ExitCodes::ERROR, e.to_string());
        }
    }

    match sent {
        ManualSend::Broadcast { payload, result } if result.failure_count() == 0 => {
            CliResult::success_with_message(format!(
                "Sent 0x{payload:02X} to {} devices",
                result.success_count()
            ))
        }
        ManualSend::Broadcast { payload, result } => CliResult::error(
            ExitCodes::PARTIAL_FAILURE,
            format!(
                "Sent 0x{payload:02X} to {}/{} devices",
                result.success_count(),
                result.total_attempted()
            ),
        ),
        ManualSend::Targeted {
            payload,
            device_id,
            delivered: true,
        } => CliResult::success_with_message(format!("Sent 0x{payload:02X} to {device_id}")),
        ManualSend::Targeted { device_id, .. } => {
            CliResult::error(ExitCodes::NO_DEVICES, format!("{device_id} is not connected"))
        }
    }
}

fn spawn_printer(
    mut rx: broadcast::Receiver<serial_broadcast_core::TimestampedEvent>,
    format: OutputFormat,
    verbose: bool,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(line) = render_event(&event, format, verbose) {
                        println!("{line}");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Event output lagged, {} events skipped", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn handle_config(cli: &Cli, config: &AppConfig, action: &ConfigAction) -> CliResult {
    match action {
        ConfigAction::Show => {
            if cli.format == OutputFormat::Json {
                if let Err(e) = print_json(config) {
                    return CliResult::error(ExitCodes::ERROR, e.to_string());
                }
                return CliResult::success();
            }
            match config.to_toml() {
                Ok(text) => {
                    print!("{text}");
                    CliResult::success()
                }
                Err(e) => e.into(),
            }
        }
        ConfigAction::Init { force } => {
            let Some(path) = config_location(cli) else {
                return ConfigError::NoConfigDir.into();
            };
            if path.exists() && !force {
                return CliResult::error(
                    ExitCodes::CONFIG_ERROR,
                    format!("{} already exists (use --force to overwrite)", path.display()),
                );
            }
            let saved = match &cli.config {
                Some(path) => AppConfig::default().save_to(path).map(|()| path.clone()),
                None => AppConfig::default().save(),
            };
            match saved {
                Ok(path) => CliResult::success_with_message(format!("Wrote {}", path.display())),
                Err(e) => e.into(),
            }
        }
        ConfigAction::Path => match config_location(cli) {
            Some(path) => {
                println!("{}", path.display());
                CliResult::success()
            }
            None => ConfigError::NoConfigDir.into(),
        },
    }
}
