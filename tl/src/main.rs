//! tl - template loader CLI
//!
//! Loads a template directory, renders templates, and polls for changes.

use std::fs;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tracing::info;

use tplreload::cli::{Cli, Command};
use tplreload::config::LoaderConfig;
use tplreload::{ReloadWatcher, TemplateLoader};

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    Ok(())
}

/// Set by SIGINT or SIGTERM; `tl watch` stops at its next check
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

#[cfg(unix)]
extern "C" fn on_interrupt(_: nix::libc::c_int) {
    INTERRUPTED.store(true, std::sync::atomic::Ordering::SeqCst);
}

#[cfg(unix)]
fn install_interrupt_handlers() -> Result<()> {
    use nix::sys::signal::{SigHandler, Signal, signal};

    for sig in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler only stores to an atomic
        unsafe { signal(sig, SigHandler::Handler(on_interrupt)) }
            .with_context(|| format!("Failed to install {:?} handler", sig))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn install_interrupt_handlers() -> Result<()> {
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose).context("Failed to setup logging")?;

    let mut config = LoaderConfig::load(cli.config.as_ref()).context("Failed to load configuration")?;
    if let Some(root) = cli.root {
        config.root = root;
    }
    if let Some(ext) = cli.ext {
        config.extension = ext;
    }

    info!(root = %config.root.display(), extension = %config.extension, "tl starting");
    let loader = TemplateLoader::from_config(&config);
    loader
        .load()
        .with_context(|| format!("Failed to load templates from {}", config.root.display()))?;

    match cli.command {
        Command::Check => {
            println!(
                "{} {} templates parsed from {}",
                "✓".green(),
                loader.tracked_count(),
                config.root.display().to_string().cyan()
            );
        }
        Command::List => {
            for name in loader.template_names() {
                match loader.tracked_file(&name) {
                    Some(file) => println!("{} {}", name, file.path.display().to_string().dimmed()),
                    None => println!("{}", name),
                }
            }
        }
        Command::Render { name, data } => {
            let data: serde_json::Value = match data {
                Some(path) => {
                    let content =
                        fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
                    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))?
                }
                None => serde_json::Value::Object(Default::default()),
            };
            let output = loader.render(&name, &data)?;
            print!("{}", output);
        }
        Command::Watch { interval_ms, once } => {
            let interval = interval_ms
                .map(std::time::Duration::from_millis)
                .unwrap_or_else(|| config.poll_interval());
            let watcher = ReloadWatcher::new(Arc::new(loader), interval);

            if once {
                let summary = watcher.poll()?;
                for name in &summary.updated {
                    println!("{} {}", "↻".yellow(), name);
                }
                return Ok(());
            }

            install_interrupt_handlers()?;
            println!(
                "{} watching {} every {:?}",
                "•".cyan(),
                config.root.display(),
                interval
            );
            let polls = watcher.run(&INTERRUPTED, |outcome| match outcome {
                Ok(summary) => {
                    for name in &summary.updated {
                        println!("{} {}", "↻".yellow(), name);
                    }
                }
                Err(err) => eprintln!("{} {}", "✗".red(), err),
            });
            info!(%polls, "Watch stopped");
        }
    }

    Ok(())
}
