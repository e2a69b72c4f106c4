//! `rigwarden` – replay a scripted session through the pose-tree warden.
//!
//! 1. Loads `rigwarden.toml` (or the built-in demo session) and applies
//!    `RIGWARDEN_*` environment overrides.
//! 2. Instantiates the rig and a scripted redirection collaborator.
//! 3. Runs the frame loop, applying each scripted disturbance just before
//!    its frame, and prints every drift event and the corrective action.
//! 4. Intercepts **Ctrl-C** to stop after the current frame and still print
//!    the summary.

mod config;
mod scenario;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use colored::{ColoredString, Colorize};
use tracing::{error, warn};

use rigwarden_runtime::{FrameLoop, FrameReport, init_tracing};
use rigwarden_types::{DriftEvent, DriftKind};

use crate::config::{Config, DEFAULT_CONFIG_FILE};

#[derive(Parser, Debug)]
#[clap(
    name = "rigwarden",
    version,
    about = "Pose-tree invariant watchdog for redirected-walking avatars"
)]
struct Cli {
    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a session (the default when no subcommand is given).
    Run {
        /// Session file; defaults to ./rigwarden.toml, then the demo session.
        #[clap(short, long)]
        config: Option<PathBuf>,
        /// Override the number of frames to replay.
        #[clap(short, long)]
        frames: Option<u64>,
        /// Print only the summary.
        #[clap(short, long)]
        quiet: bool,
        /// Pace frames at the configured frame rate.
        #[clap(long)]
        realtime: bool,
    },
    /// Write the demo session to a file.
    Init {
        #[clap(default_value = DEFAULT_CONFIG_FILE)]
        path: PathBuf,
        /// Overwrite an existing file.
        #[clap(long)]
        force: bool,
    },
    /// Print the resolved session as TOML.
    Show {
        #[clap(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() {
    let _guard = init_tracing("rigwarden");
    let cli = Cli::parse();

    let result = match cli.command.unwrap_or(Command::Run {
        config: None,
        frames: None,
        quiet: false,
        realtime: false,
    }) {
        Command::Run {
            config,
            frames,
            quiet,
            realtime,
        } => run(config, frames, quiet, realtime),
        Command::Init { path, force } => init(path, force),
        Command::Show { config } => show(config),
    };

    if let Err(e) = result {
        println!("{}: {}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(
    config: Option<PathBuf>,
    frames: Option<u64>,
    quiet: bool,
    realtime: bool,
) -> Result<(), String> {
    let (mut cfg, source) = config::resolve(config.as_deref())?;
    if let Some(frames) = frames {
        cfg.warden.frames = frames;
    }
    cfg.validate()?;

    match &source {
        Some(path) => println!("Session: {}", path.display().to_string().bold()),
        None => println!("Session: {}", "built-in demo".bold()),
    }

    let blueprint = cfg.blueprint()?;
    let mut warden = FrameLoop::new(
        &blueprint,
        cfg.frame_loop_config(),
        cfg.correction.clone(),
        Box::new(cfg.redirection()),
    )
    .map_err(|e| e.to_string())?;

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping after this frame".yellow().bold());
        shutdown_flag.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler");
    }

    let dt = cfg.frame_interval();
    let start = Instant::now();
    let mut disturbances = cfg.disturbances.clone();
    disturbances.sort_by_key(|d| d.frame);
    let mut pending = disturbances.iter().peekable();
    let mut frames_run = 0u64;
    let mut collaborator_errors = 0usize;

    for frame in 0..cfg.warden.frames {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        let next = warden.frame() + 1;
        while let Some(d) = pending.next_if(|d| d.frame <= next) {
            match d.apply(&mut warden) {
                Ok(()) => {
                    if !quiet {
                        println!("{:>5}  {} {}", next, "~".cyan(), d.describe().dimmed());
                    }
                }
                Err(e) => error!(frame = next, error = %e, "disturbance failed"),
            }
        }

        let now = start + dt.mul_f64(frame as f64);
        let report = warden.late_update(now);
        frames_run += 1;
        collaborator_errors += report.collaborator_errors.len();
        if !quiet {
            print_report(&report);
        }

        if realtime {
            let target = start + dt.mul_f64((frame + 1) as f64);
            std::thread::sleep(target.saturating_duration_since(Instant::now()));
        }
    }

    print_summary(&warden, frames_run, collaborator_errors, start.elapsed());
    Ok(())
}

fn init(path: PathBuf, force: bool) -> Result<(), String> {
    if path.exists() && !force {
        return Err(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        ));
    }
    config::save_to(&Config::default(), &path)?;
    println!(
        "{} Demo session written to {}",
        "✓".green().bold(),
        path.display().to_string().bold()
    );
    Ok(())
}

fn show(config: Option<PathBuf>) -> Result<(), String> {
    let (cfg, _) = config::resolve(config.as_deref())?;
    let raw =
        toml::to_string_pretty(&cfg).map_err(|e| format!("Failed to serialize config: {e}"))?;
    print!("{raw}");
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

fn kind_label(kind: DriftKind) -> ColoredString {
    match kind {
        DriftKind::Ownership => "OWNERSHIP".red().bold(),
        DriftKind::Invalid => "INVALID".magenta().bold(),
        DriftKind::Magnitude => "MAGNITUDE".yellow().bold(),
        DriftKind::Missing => "MISSING".blue().bold(),
    }
}

fn print_event(event: &DriftEvent) {
    let displacement = event
        .observed_displacement
        .map(|d| format!("{d:.3} m"))
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{:>5}  {:<10} {:<20} {:>10} / {:.3} m  → {:?}",
        event.frame,
        kind_label(event.kind),
        event.node,
        displacement,
        event.tolerance_radius,
        event.action
    );
}

fn print_report(report: &FrameReport) {
    for event in &report.events {
        print_event(event);
    }
    for name in &report.corrections.settled {
        println!("{:>5}  {} {} settled", report.frame, "✓".green(), name);
    }
    if let Some(scan) = &report.consistency
        && !scan.is_clean()
    {
        println!(
            "{:>5}  {} consistency: {} link(s) repaired, absent {:?}, orphaned {:?}",
            report.frame,
            "!".yellow().bold(),
            scan.links_repaired,
            scan.absent,
            scan.orphaned
        );
    }
    for e in &report.collaborator_errors {
        println!("{:>5}  {} {}", report.frame, "✗".red(), e);
    }
}

fn print_summary(warden: &FrameLoop, frames: u64, collaborator_errors: usize, elapsed: Duration) {
    println!();
    println!("{}", "── Summary ─────────────────────────────".bold().cyan());
    println!("  frames replayed    {frames}");
    println!("  resets completed   {}", warden.reset().completed_resets());
    println!("  drift events       {}", warden.log().total());
    for (kind, count) in warden.log().counts() {
        println!("    {:<16} {count}", kind_label(kind));
    }
    if collaborator_errors > 0 {
        println!("  collaborator errors {}", collaborator_errors.to_string().red());
    }
    println!("  elapsed            {:.1?}", elapsed);
}
