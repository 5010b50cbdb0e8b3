use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use macro_key_runner::config::{self, DEFAULT_SETTINGS_FILE, SETTINGS_VERSION};
use macro_key_runner::key::NAMED_KEYS;
use macro_key_runner::{
    presets, Config, Engine, HotkeyManager, InputEvent, InputHub, LogSink, OutputSink,
    ScriptStatus, Settings, StatusChange,
};

#[derive(Parser)]
#[command(name = "mkr", version, about = "Bind key and mouse triggers to timed input sequences")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start every enabled script and wait for Ctrl+C
    Run {
        /// Configuration file (defaults are used when omitted)
        #[arg(short, long)]
        config: Option<String>,

        /// Keybinds and enabled flags persisted between sessions
        #[arg(short, long)]
        settings: Option<PathBuf>,

        /// Log output instead of injecting it; input is read from stdin
        #[arg(long)]
        dry_run: bool,
    },
    /// Write a default configuration file
    Init {
        #[arg(short, long, default_value = "mkr.json")]
        output: String,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Validate a configuration file and list its scripts
    Check {
        #[arg(short, long)]
        config: String,
    },
    /// List the key tokens accepted in bindings
    Keys,
    /// Wait for the next key or button press and print its token
    Capture {
        #[arg(short, long, default_value = "10s")]
        timeout: String,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            settings,
            dry_run,
        } => {
            let config = match config {
                Some(path) => Config::from_file(&path)
                    .with_context(|| format!("failed to load configuration from {path}"))?,
                None => Config::default(),
            };
            init_tracing(cli.verbose || config.verbose);
            run(config, settings, dry_run).await
        }
        Command::Init { output, force } => {
            init_tracing(cli.verbose);
            init(&output, force)
        }
        Command::Check { config } => {
            init_tracing(cli.verbose);
            check(&config)
        }
        Command::Keys => {
            print_keys();
            Ok(())
        }
        Command::Capture { timeout } => {
            init_tracing(cli.verbose);
            capture(&timeout).await
        }
    }
}

async fn run(mut config: Config, settings_path: Option<PathBuf>, dry_run: bool) -> Result<()> {
    if let Some(path) = &settings_path {
        let settings = Settings::load(path)?;
        config.apply_settings(&settings);
        debug!(path = %path.display(), "applied settings");
    }
    config.validate().context("invalid configuration")?;

    let hub = InputHub::new();
    let sink = build_backend(dry_run, &hub)?;
    let engine = Arc::new(Engine::new(sink, hub.clone()).with_stop_timeout(config.stop_timeout));

    for definition in config.script_definitions()? {
        engine.register(definition)?;
    }
    engine.apply_enabled_flags(&config.enabled).await?;

    println!("{}", "Macro Key Runner".bold().cyan());
    print_scripts(&engine);

    let status_task = tokio::spawn(print_status(engine.subscribe()));
    let started = engine.start_enabled();
    if started == 0 {
        println!(
            "{}",
            "No scripts enabled. Set \"enabled\" in the configuration.".yellow()
        );
    } else {
        println!("{} {}", "Started scripts:".green(), started);
    }

    let hotkeys = install_hotkey(&config.stop_hotkey);
    let suspend_task = hotkeys
        .as_ref()
        .map(|manager| tokio::spawn(follow_suspend(engine.clone(), manager.subscribe())));

    let stdin_task = dry_run.then(|| tokio::spawn(feed_stdin(hub.clone())));
    if dry_run {
        println!(
            "{}",
            "Dry run: type +key to press, -key to release, key to tap.".dimmed()
        );
    }

    println!("{}", "Press Ctrl+C to exit".dimmed());
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    println!("\n{}", "Shutting down...".yellow());

    for task in [suspend_task, stdin_task].into_iter().flatten() {
        task.abort();
    }
    if let Some(manager) = &hotkeys {
        manager.stop_listener();
    }

    let stopped = engine.stop_all().await;
    status_task.abort();

    if let Some(path) = &settings_path {
        save_settings(&engine, &config, path)?;
    }

    match stopped {
        // A stuck script has already been dropped from the registry.
        Err(e) if e.is_script_local() => {
            warn!("{}", e);
            Ok(())
        }
        other => other.map_err(Into::into),
    }
}

fn build_backend(dry_run: bool, hub: &InputHub) -> Result<Arc<dyn OutputSink>> {
    if dry_run {
        info!("dry run: output is logged, not injected");
        return Ok(Arc::new(LogSink));
    }
    native_backend(hub)
}

#[cfg(feature = "native")]
fn native_backend(hub: &InputHub) -> Result<Arc<dyn OutputSink>> {
    use macro_key_runner::input::native::spawn_listener;
    use macro_key_runner::output::native::RdevSink;

    spawn_listener(hub.clone())?;
    Ok(Arc::new(RdevSink::new()))
}

#[cfg(not(feature = "native"))]
fn native_backend(_hub: &InputHub) -> Result<Arc<dyn OutputSink>> {
    Err(macro_key_runner::MkrError::unsupported_platform(
        "built without the `native` feature; rebuild with --features native or use --dry-run",
    )
    .into())
}

fn install_hotkey(stop_hotkey: &str) -> Option<HotkeyManager> {
    if stop_hotkey.trim().is_empty() {
        return None;
    }

    let setup = || -> macro_key_runner::Result<HotkeyManager> {
        let mut manager = HotkeyManager::new()?;
        manager.register_stop_hotkey(stop_hotkey)?;
        manager.start_listener()?;
        Ok(manager)
    };

    match setup() {
        Ok(manager) => {
            println!(
                "{} {}",
                "Stop hotkey:".bold(),
                stop_hotkey.yellow()
            );
            Some(manager)
        }
        Err(e) => {
            warn!("continuing without stop hotkey: {}", e);
            None
        }
    }
}

async fn follow_suspend(engine: Arc<Engine>, mut suspended: watch::Receiver<bool>) {
    while suspended.changed().await.is_ok() {
        let now_suspended = *suspended.borrow_and_update();
        if now_suspended {
            if let Err(e) = engine.stop_all().await {
                warn!("stop_all during suspend: {}", e);
            }
            println!("{}", "Suspended".yellow().bold());
        } else {
            let started = engine.start_enabled();
            println!("{} ({} scripts)", "Resumed".green().bold(), started);
        }
    }
}

async fn feed_stdin(hub: InputHub) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        for token in line.split_whitespace() {
            match InputEvent::parse_scripted(token) {
                Ok(events) => events.into_iter().for_each(|e| hub.publish(e)),
                Err(e) => eprintln!("{} {}", "Ignored:".red(), e),
            }
        }
    }
    debug!("stdin closed");
}

async fn print_status(mut changes: broadcast::Receiver<StatusChange>) {
    loop {
        match changes.recv().await {
            Ok(change) => println!("  {:<14} {}", change.id.bold(), paint(&change)),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "status printer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn paint(change: &StatusChange) -> ColoredString {
    let text = change.text.as_str();
    match change.status {
        ScriptStatus::Running => text.green(),
        ScriptStatus::Armed => text.yellow(),
        ScriptStatus::Ready => text.cyan(),
        ScriptStatus::Error(_) => text.red(),
        ScriptStatus::Inactive | ScriptStatus::Stopped => text.dimmed(),
    }
}

fn print_scripts(engine: &Engine) {
    for row in engine.snapshot() {
        let flag = if row.enabled {
            "on ".green()
        } else {
            "off".dimmed()
        };
        println!("  [{}] {:<14} {}", flag, row.id.bold(), row.name);
    }
}

fn save_settings(engine: &Engine, config: &Config, path: &Path) -> Result<()> {
    let settings = Settings {
        keybinds: config.keybinds.clone(),
        script_states: engine.enabled_flags(),
        version: SETTINGS_VERSION.to_string(),
    };
    settings
        .save(path)
        .with_context(|| format!("failed to save settings to {}", path.display()))?;
    info!(path = %path.display(), "settings saved");
    Ok(())
}

fn init(output: &str, force: bool) -> Result<()> {
    if Path::new(output).exists() && !force {
        bail!("{output} already exists (use --force to overwrite)");
    }

    let config = Config {
        enabled: presets::BUILTIN_IDS
            .iter()
            .map(|id| (id.to_string(), false))
            .collect(),
        ..Config::default()
    };
    config.save_to_file(output)?;

    println!("{} {}", "Wrote".green(), output.bold());
    println!(
        "Settings from the desktop tool can be reused with --settings {}",
        DEFAULT_SETTINGS_FILE.dimmed()
    );
    Ok(())
}

fn check(path: &str) -> Result<()> {
    let config =
        Config::from_file(path).with_context(|| format!("failed to load configuration {path}"))?;
    config
        .validate()
        .with_context(|| format!("{path} is not valid"))?;

    println!("{} {}", "Valid:".green().bold(), path);
    println!(
        "  stop hotkey: {}, stop timeout: {}",
        if config.stop_hotkey.is_empty() {
            "none"
        } else {
            config.stop_hotkey.as_str()
        },
        config::format_duration(config.stop_timeout)
    );

    for script in config.script_definitions()? {
        let bindings: Vec<_> = script.bindings.iter().map(|b| b.as_str()).collect();
        let flag = if config.is_enabled(&script.id) {
            "on ".green()
        } else {
            "off".dimmed()
        };
        println!(
            "  [{}] {:<14} {:?} on {} ({} steps, {} per pass)",
            flag,
            script.id.bold(),
            script.policy,
            bindings.join(" + ").yellow(),
            script.sequence.len(),
            config::format_duration(script.sequence.duration()),
        );
    }
    Ok(())
}

fn print_keys() {
    println!("{}", "Single characters:".bold());
    println!("  a-z, 0-9 and punctuation");
    println!("{}", "Function keys:".bold());
    println!("  f1-f24");
    println!("{}", "Named keys and buttons:".bold());
    for chunk in NAMED_KEYS.chunks(8) {
        println!("  {}", chunk.join(", "));
    }
    println!(
        "{}",
        "Synonyms such as Escape, Key.esc, Return or Button.left are normalized.".dimmed()
    );
}

async fn capture(timeout: &str) -> Result<()> {
    let timeout = config::parse_duration(timeout)?;
    let hub = InputHub::new();
    start_capture_listener(&hub)?;

    println!("{}", "Press a key or mouse button...".cyan());
    match hub.capture_next(timeout).await {
        Some(binding) => {
            println!("{} {}", "Captured:".green().bold(), binding);
            Ok(())
        }
        None => bail!("no input within {}", config::format_duration(timeout)),
    }
}

#[cfg(feature = "native")]
fn start_capture_listener(hub: &InputHub) -> Result<()> {
    macro_key_runner::input::native::spawn_listener(hub.clone())?;
    Ok(())
}

#[cfg(not(feature = "native"))]
fn start_capture_listener(_hub: &InputHub) -> Result<()> {
    Err(macro_key_runner::MkrError::unsupported_platform("key capture needs the `native` feature").into())
}
