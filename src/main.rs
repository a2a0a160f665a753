// src/main.rs

//! `fsnotifier` — watch paths and log their changes until they go away.
//!
//! Usage: `fsnotifier [-e FLAG[,FLAG...]] [--oneshot] PATH...`

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use anyhow::{bail, Context};
use log::{error, info};

use fsnotifier::{Event, Flag, Notifier, CONFIG};

#[derive(Debug)]
struct Args {
    flags: Vec<String>,
    oneshot: bool,
    paths: Vec<PathBuf>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut flags = Vec::new();
    let mut oneshot = false;
    let mut paths = Vec::new();

    let mut args = std::env::args_os().skip(1);
    while let Some(arg) = args.next() {
        match arg.to_str() {
            Some("-e") | Some("--event") => {
                let list = args
                    .next()
                    .context("-e requires a comma-separated flag list")?;
                let list = list.to_str().context("flag list is not valid UTF-8")?;
                flags.extend(list.split(',').filter(|s| !s.is_empty()).map(str::to_string));
            }
            Some("--oneshot") => oneshot = true,
            Some("-h") | Some("--help") => {
                println!("usage: fsnotifier [-e FLAG[,FLAG...]] [--oneshot] PATH...");
                std::process::exit(0);
            }
            _ => paths.push(PathBuf::from(arg)),
        }
    }

    if paths.is_empty() {
        bail!("no paths given (usage: fsnotifier [-e FLAG[,FLAG...]] [--oneshot] PATH...)");
    }
    if flags.is_empty() {
        flags = CONFIG.default_flags.clone();
    }
    Ok(Args {
        flags,
        oneshot,
        paths,
    })
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(CONFIG.log_filter.as_str()),
    )
    .format_timestamp_micros()
    .init();

    let args = parse_args()?;
    info!("Watching {:?} for {:?}", args.paths, args.flags);

    let notifier = Arc::new(Notifier::new().context("Failed to create notifier")?);
    let live = Arc::new(AtomicUsize::new(0));

    for path in &args.paths {
        let sink_notifier: Weak<Notifier> = Arc::downgrade(&notifier);
        let sink_live = Arc::clone(&live);
        let oneshot = args.oneshot;
        notifier
            .watch(path, &args.flags, move |event: &Event| -> anyhow::Result<()> {
                info!("{}", event);
                let Some(notifier) = sink_notifier.upgrade() else {
                    return Ok(());
                };
                if event.has(Flag::Ignored) && sink_live.fetch_sub(1, Ordering::SeqCst) == 1 {
                    info!("Last watch retired, stopping");
                    notifier.stop();
                } else if oneshot && !event.has(Flag::Ignored) {
                    notifier.stop();
                }
                Ok(())
            })
            .with_context(|| format!("Failed to watch {}", path.display()))?;
        live.fetch_add(1, Ordering::SeqCst);
    }

    if let Err(e) = notifier.run() {
        error!("Notifier stopped with error: {:#}", anyhow::Error::from(e));
        notifier.close()?;
        std::process::exit(1);
    }
    notifier.close()?;
    Ok(())
}
