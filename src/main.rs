// src/main.rs

//! Console exerciser for the capture pipeline.
//!
//! 1. Parse configuration & set up structured logging
//! 2. Construct the debug-output receiver (capture starts immediately)
//! 3. Subscribe a stdout printer decoding each wire buffer
//! 4. Pump on the owning thread until Enter (or EOF) on stdin

use std::{
    path::{Path, PathBuf},
    process,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use anyhow::Context;
use chrono::Local;
use fern::Dispatch;
use log::LevelFilter;

use dbgcap::config::{self, Config};
use dbgcap::{ChannelReceiver, DebugOutputReceiver, ReceiverOptions};

// ───── helpers ──────────────────────────────────────────────────────────────

/// Print an error with context and terminate the process.
macro_rules! fatal {
    ($ctx:expr, $($arg:tt)+) => {{
        eprintln!(
            "[{}][ERROR][{}] {}",
            chrono::Local::now().to_rfc3339(),
            $ctx,
            format!($($arg)+)
        );
        std::process::exit(1);
    }};
}

/// Directory that contains the running executable.
fn exe_dir() -> PathBuf {
    std::env::current_exe()
        .expect("Cannot determine exe path")
        .parent()
        .expect("Executable must live in some directory")
        .to_path_buf()
}

/// Configure global logging as requested in `config.logging`.
fn setup_logging(exe_dir: &Path, cfg: &Config) -> Result<(), fern::InitError> {
    let level = match cfg.logging.level.to_uppercase().as_str() {
        "ERROR" => LevelFilter::Error,
        "WARN" => LevelFilter::Warn,
        "DEBUG" => LevelFilter::Debug,
        "TRACE" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    };

    let log_path = cfg
        .logging
        .enable
        .then(|| exe_dir.join(cfg.logging.file.as_deref().unwrap_or("dbgcap.log")));

    let mut dispatch = Dispatch::new()
        .format(|out, msg, record| {
            out.finish(format_args!(
                "[{}][{:5}][{}][pid={}][tid={:?}] {}",
                Local::now().to_rfc3339(),
                record.level(),
                record.target(),
                process::id(),
                thread::current().id(),
                msg
            ))
        })
        .level(level)
        .chain(std::io::stderr());

    if let Some(path) = log_path {
        dispatch = dispatch.chain(fern::log_file(path)?);
    }

    dispatch.apply()?;
    Ok(())
}

/// Pull the text payload back out of a wire buffer for display.
fn wire_text(buffer: &[u8]) -> String {
    let len = buffer
        .get(12..16)
        .and_then(|b| b.try_into().ok())
        .map(i32::from_le_bytes)
        .unwrap_or(0) as usize;
    buffer
        .get(16..16 + len)
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .unwrap_or_default()
}

// ───── entry point ──────────────────────────────────────────────────────────

fn run(cfg: Config) -> anyhow::Result<()> {
    let wait_timeout = cfg.capture.timeout().context("capture.wait_timeout")?;

    let mut receiver = DebugOutputReceiver::new(ReceiverOptions {
        name: cfg.capture.name.clone(),
        enabled: cfg.capture.enabled,
        wait_timeout,
    });
    log::info!("Channel '{}' capturing (enabled={})", receiver.name(), receiver.enabled());

    receiver.subscribe(Box::new(|channel, buffer| {
        println!("[{channel}] {}", wire_text(buffer));
    }));

    // Any input (or EOF) ends the session.
    let quit = Arc::new(AtomicBool::new(false));
    {
        let quit = Arc::clone(&quit);
        thread::spawn(move || {
            let mut sink = String::new();
            let _ = std::io::stdin().read_line(&mut sink);
            quit.store(true, Ordering::Release);
        });
    }

    log::info!("Press Enter to stop");
    while !quit.load(Ordering::Acquire) {
        if receiver.pump() == 0 {
            thread::sleep(Duration::from_millis(50));
        }
        if receiver.startup_failed() {
            anyhow::bail!("could not bind the debug-output facility on this host");
        }
    }

    log::info!("Shutting down");
    drop(receiver);
    log::info!("Stopped cleanly");
    Ok(())
}

fn main() {
    let exe_dir = exe_dir();
    let cfg = config::load(&exe_dir.join("default.toml"))
        .unwrap_or_else(|e| fatal!("config", "{}", e));
    setup_logging(&exe_dir, &cfg).expect("Logging setup failed");

    if let Err(e) = run(cfg) {
        fatal!("main", "{e:#}");
    }
}
