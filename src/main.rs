//! dirlease CLI - Advisory Leases over Shared Filesystems
//!
//! Runs commands under a cross-host lease and manipulates lease-guarded stores.

use clap::Parser;
use dirlease::config::{CliArgs, Commands, LeaseConfig, OutputFormat};
use dirlease::error::{DirLeaseError, Result};
use dirlease::lock::{LeaseLock, LockStatus};
use dirlease::store::ResourceStore;
use serde_json::Value;
use std::path::Path;
use std::process::Command;
use std::time::{Duration, Instant, SystemTime};
use tracing_subscriber::EnvFilter;

fn main() {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Initialize logging
    init_logging(args.verbose, args.log_json);

    // Handle result
    match run(args) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(if e.is_timeout() { 2 } else { 1 });
        }
    }
}

fn init_logging(verbose: u8, json: bool) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn run(args: CliArgs) -> Result<i32> {
    let config = LeaseConfig::from_cli(&args)?;
    let lock = LeaseLock::with_options(config.lock_options());

    match &args.command {
        Commands::Run { name, command } => cmd_run(&lock, &config, name, command),
        Commands::Status { name, format } => cmd_status(&lock, name, *format),
        Commands::New { dir, identity } => cmd_new(dir, identity, lock),
        Commands::Set { store, key, value } => cmd_set(store, key, value, lock),
        Commands::Get { store, key } => cmd_get(store, key, lock),
        Commands::Keys { store } => cmd_keys(store, lock),
        Commands::Close { store } => cmd_close(store, lock),
    }
}

fn cmd_run(lock: &LeaseLock, config: &LeaseConfig, name: &str, command: &[String]) -> Result<i32> {
    let (program, rest) = command
        .split_first()
        .ok_or_else(|| DirLeaseError::config("No command given"))?;

    let mut lease = lock.acquire(name)?;
    if lease.was_reclaimed() {
        eprintln!("Reclaimed stale lease on {}", name);
    }

    let mut child = match Command::new(program).args(rest).spawn() {
        Ok(child) => child,
        Err(e) => {
            lock.release(&lease);
            return Err(DirLeaseError::io(program, e));
        }
    };

    // Renew well inside the window so waiters never see the markers as stale
    let renew_every = (config.wait / 3).max(config.poll_interval);
    let mut last_renew = Instant::now();

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(e) => {
                lock.release(&lease);
                return Err(DirLeaseError::io(program, e));
            }
        }

        std::thread::sleep(config.poll_interval.min(Duration::from_millis(200)));

        if last_renew.elapsed() >= renew_every {
            match lock.renew(&mut lease) {
                Ok(true) => {}
                Ok(false) => tracing::warn!("Lease on '{}' was reclaimed by another holder", name),
                Err(e) => tracing::warn!("Failed to renew lease on '{}': {}", name, e),
            }
            last_renew = Instant::now();
        }
    };

    lock.release(&lease);

    // Killed by a signal: no exit code, report failure
    Ok(status.code().unwrap_or(1))
}

fn cmd_status(lock: &LeaseLock, name: &str, format: OutputFormat) -> Result<i32> {
    let status = lock.inspect(name)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
        OutputFormat::Text => print_status(&status),
    }

    Ok(0)
}

fn print_status(status: &LockStatus) {
    println!("=== Lease Status ===");
    println!("Name:       {}", status.name);
    println!(
        "State:      {}",
        match (status.held, status.stale) {
            (false, _) => "free",
            (true, false) => "held",
            (true, true) => "stale (reclaimable)",
        }
    );
    println!("Primary:    {:?} ({})", status.primary, format_time(status.primary_modified));
    println!("Secondary:  {:?} ({})", status.secondary, format_time(status.secondary_modified));
    if let Some(age) = status.age {
        println!("Age:        {}", humantime::format_duration(Duration::from_secs(age.as_secs())));
    }
    println!("Window:     {}", humantime::format_duration(status.window));
}

fn format_time(time: Option<SystemTime>) -> String {
    match time {
        Some(t) => humantime::format_rfc3339_seconds(t).to_string(),
        None => "absent".to_string(),
    }
}

fn cmd_new(dir: &Path, identity: &str, lock: LeaseLock) -> Result<i32> {
    let store = ResourceStore::create(dir, identity, lock);
    println!("{}", store.path().display());
    Ok(0)
}

fn cmd_set(path: &Path, key: &str, value: &str, lock: LeaseLock) -> Result<i32> {
    // Anything that is not valid JSON is stored as a plain string
    let value = serde_json::from_str::<Value>(value).unwrap_or_else(|_| Value::String(value.to_string()));

    let store = ResourceStore::attach(path, lock);
    let guard = store.acquire()?;
    guard.set(key, &value)?;
    guard.release();
    Ok(0)
}

fn cmd_get(path: &Path, key: &str, lock: LeaseLock) -> Result<i32> {
    let store = ResourceStore::attach(path, lock);
    let guard = store.acquire()?;
    let value: Value = guard.get(key)?;
    guard.release();

    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(0)
}

fn cmd_keys(path: &Path, lock: LeaseLock) -> Result<i32> {
    let store = ResourceStore::attach(path, lock);
    let guard = store.acquire()?;
    let keys = guard.keys()?;
    guard.release();

    for key in keys {
        println!("{}", key);
    }
    Ok(0)
}

fn cmd_close(path: &Path, lock: LeaseLock) -> Result<i32> {
    ResourceStore::attach(path, lock).close()?;
    println!("Closed {}", path.display());
    Ok(0)
}
