use std::path::{Path, PathBuf};

use chrono::Local;
use clap::{Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::{WrapErr, eyre};
use procwatch::config::{Config, load_config, load_config_from_path};
use procwatch::format::{TABLE_HEADER, format_process_row, format_summary};
use procwatch::system::collector::Collector;
use procwatch::system::control::{ProcessController, SignalKind, TerminateOutcome};
use procwatch::system::derive::display_command;
use procwatch::system::platform;
use procwatch::system::scheduler::spawn_update_loop;
use procwatch::system::snapshot::{SortKey, SystemSnapshot};
use tracing_subscriber::EnvFilter;

const COMMAND_WIDTH: usize = 60;

#[derive(Parser)]
#[command(
    name = "procwatch",
    about = "Process, CPU and memory monitor with safe process control"
)]
struct Cli {
    /// Path to config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Refresh rate in milliseconds
    #[arg(long)]
    refresh_rate: Option<u64>,

    /// Attempt nice decreases instead of rejecting them up front
    #[arg(long, default_value_t = false)]
    privileged: bool,

    /// Root of the procfs mount to sample
    #[arg(long)]
    proc_root: Option<PathBuf>,

    /// Sort order: cpu, mem, pid, name, nice
    #[arg(long)]
    sort: Option<String>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, default_value_t = false)]
    log_json: bool,

    /// Log filter, e.g. `warn` or `procwatch=debug`
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Sample continuously and print a process table each cycle (default)
    Watch {
        /// Print each snapshot as a JSON line
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Stop after this many snapshots
        #[arg(long)]
        cycles: Option<u64>,
    },
    /// Send a signal: term, kill, int, hup, stop, cont
    Signal {
        pid: u32,
        signal: SignalKind,

        /// Skip the critical-process check
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// SIGTERM, then SIGKILL if the process outlives the grace period
    Terminate {
        pid: u32,

        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Set (or with --relative, adjust) a process's nice value
    Renice {
        pid: u32,

        #[arg(allow_negative_numbers = true)]
        value: i32,

        #[arg(long, default_value_t = false)]
        relative: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.log_json, &cli.log_level)?;
    let config = load_config_for_cli(&cli);

    match cli.command {
        None => watch(config, false, None).await,
        Some(Command::Watch { json, cycles }) => watch(config, json, cycles).await,
        Some(Command::Signal { pid, signal, force }) => {
            let controller = controller_for(&config);
            confirm_not_critical(&controller, &config, pid, force)?;
            controller.send_signal(pid, signal)?;
            println!("sent {signal} to {pid}");
            Ok(())
        }
        Some(Command::Terminate { pid, force }) => {
            let controller = controller_for(&config);
            confirm_not_critical(&controller, &config, pid, force)?;
            match controller.terminate(pid).await? {
                TerminateOutcome::Graceful => println!("{pid} exited after SIGTERM"),
                TerminateOutcome::Forced => println!("{pid} ignored SIGTERM, sent SIGKILL"),
            }
            Ok(())
        }
        Some(Command::Renice {
            pid,
            value,
            relative,
        }) => {
            let controller = controller_for(&config);
            let applied = if relative {
                controller.adjust_nice(pid, value)?
            } else {
                controller.set_nice(pid, value)?;
                value
            };
            println!("{pid}: nice {applied}");
            Ok(())
        }
    }
}

fn init_tracing(json: bool, level: &str) -> Result<()> {
    let filter =
        EnvFilter::try_new(level).map_err(|e| eyre!("invalid --log-level `{level}`: {e}"))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| eyre!("failed to set tracing subscriber: {e}"))
}

fn load_config_for_cli(cli: &Cli) -> Config {
    let mut config = match &cli.config {
        Some(path) => load_config_from_path(path),
        None => load_config(),
    };

    if let Some(rate) = cli.refresh_rate {
        config.general.refresh_rate_ms = rate;
    }
    if cli.privileged {
        config.general.privileged = true;
    }
    if let Some(ref root) = cli.proc_root {
        config.general.proc_root = root.clone();
    }
    if let Some(ref sort) = cli.sort {
        config.general.default_sort = sort.clone();
    }

    config
}

fn controller_for(config: &Config) -> ProcessController {
    ProcessController::new(config.general.privileged, &config.control)
}

fn confirm_not_critical(
    controller: &ProcessController,
    config: &Config,
    pid: u32,
    force: bool,
) -> Result<()> {
    if force {
        return Ok(());
    }
    let command = lookup_command(&config.general.proc_root, pid).unwrap_or_default();
    if controller.is_critical(pid, &command) {
        return Err(eyre!(
            "process {pid} (`{command}`) is marked critical; pass --force to proceed"
        ));
    }
    Ok(())
}

fn lookup_command(proc_root: &Path, pid: u32) -> Option<String> {
    platform::default_source(proc_root)
        .read_process_raw(pid)
        .ok()
        .map(|raw| display_command(&raw))
}

async fn watch(config: Config, json: bool, cycles: Option<u64>) -> Result<()> {
    let interval = config.refresh_interval()?;
    let sort = config.sort_key();
    let limit = config.general.max_processes;

    let collector = Collector::new(&config.general.proc_root);
    let mut handle = spawn_update_loop(collector, interval);
    let mut snapshots = handle.snapshots();
    let mut errors = handle
        .take_errors()
        .ok_or_else(|| eyre!("error channel already taken"))?;
    let mut printed = 0u64;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let latest = snapshots.borrow_and_update().clone();
                let Some(snapshot) = latest else { continue };
                if json {
                    let line = serde_json::to_string(&*snapshot)
                        .wrap_err("failed to serialize snapshot")?;
                    println!("{line}");
                } else {
                    print_table(&snapshot, sort, limit);
                }
                printed += 1;
                if cycles.is_some_and(|n| printed >= n) {
                    break;
                }
            }
            Some(err) = errors.recv() => {
                eprintln!("sampling failed: {err}");
            }
        }
    }

    handle.stop().await;
    Ok(())
}

fn print_table(snapshot: &SystemSnapshot, sort: SortKey, limit: usize) {
    let now = Local::now();
    println!("{}", format_summary(snapshot, sort));
    println!("{TABLE_HEADER}");
    for process in snapshot.sorted(sort).into_iter().take(limit) {
        println!("{}", format_process_row(process, &now, COMMAND_WIDTH));
    }
    println!();
}
