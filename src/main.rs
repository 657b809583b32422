//! rataddon - Main entry point.
//!
//! Usage: rat-addon [OPTIONS] <COMMAND> [ID]
//!
//! Options:
//!   --dir DIR        Addon directory (overrides addon_dir)
//!   --config FILE    Config file (default: ~/.rataddonrc)
//!   --version, -v    Show version
//!   --help, -h       Show this help
//!
//! Commands:
//!   list             Load every addon and print the registry
//!   enable ID        Start an addon and remember it as enabled
//!   disable ID       Stop an addon and remember it as disabled
//!   toggle ID        Flip the enabled state of an addon
//!   reload ID        Rebuild an addon from its file
//!   unload ID        Stop an addon and forget its state
//!   run              Load, start enabled addons, fire one page switch, shut down

use std::env;
use std::path::PathBuf;
use std::process;
use std::sync::mpsc::Receiver;

use rataddon::addon::{AddonManager, AddonSummary, ManagerEvent, ManagerSettings, ToastLevel};
use rataddon::addon::{AddonStorage, Batch};
use rataddon::config::Config;
use rataddon::logging;

const VERSION: &str = env!("CARGO_PKG_VERSION");

const USAGE: &str = "Usage: rat-addon [--dir DIR] [--config FILE] \
<list|enable|disable|toggle|reload|unload|run> [ID]";

/// Parsed command line.
#[derive(Debug, Default)]
struct Args {
    dir: Option<PathBuf>,
    config: Option<PathBuf>,
    command: Option<String>,
    target: Option<String>,
}

fn parse_args(raw: &[String]) -> Result<Args, String> {
    let mut args = Args::default();
    let mut iter = raw.iter().skip(1);

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--dir" => {
                let value = iter.next().ok_or("--dir needs a value")?;
                args.dir = Some(PathBuf::from(value));
            }
            "--config" => {
                let value = iter.next().ok_or("--config needs a value")?;
                args.config = Some(PathBuf::from(value));
            }
            flag if flag.starts_with('-') => return Err(format!("Unknown option {}", flag)),
            _ if args.command.is_none() => args.command = Some(arg.clone()),
            _ if args.target.is_none() => args.target = Some(arg.clone()),
            _ => return Err(format!("Unexpected argument {}", arg)),
        }
    }

    Ok(args)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let raw: Vec<String> = env::args().collect();

    if raw.iter().any(|a| a == "--version" || a == "-v") {
        println!("rat-addon v{}", VERSION);
        return Ok(());
    }
    if raw.iter().any(|a| a == "--help" || a == "-h") {
        println!("{}", USAGE);
        return Ok(());
    }

    let args = match parse_args(&raw) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}\n{}", e, USAGE);
            process::exit(2);
        }
    };

    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    if let Err(e) = logging::init(&config.log_config) {
        eprintln!("Warning: logging disabled: {}", e);
    }

    let mut settings = ManagerSettings::from_config(&config);
    if let Some(dir) = args.dir {
        settings.addon_dir = dir;
    }

    let mut manager = AddonManager::with_lua(settings)
        .with_storage(AddonStorage::new(config.config_path.clone()));
    let events = manager.subscribe();

    manager.discover_and_load_all()?;
    print_report(&manager, &Batch::Startup);

    let command = args.command.as_deref().unwrap_or("list");
    let target = args.target.as_deref();

    let result = match (command, target) {
        ("list", _) => Ok(()),
        ("run", _) => {
            let report = manager.on_switch();
            println!(
                "Page switch delivered to {} addon(s), {} failed",
                report.delivered.len(),
                report.failed.len()
            );
            Ok(())
        }
        ("enable", Some(id)) => manager.enable(id),
        ("disable", Some(id)) => manager.disable(id),
        ("toggle", Some(id)) => manager.toggle(id),
        ("reload", Some(id)) => manager.reload(id),
        ("unload", Some(id)) => manager.unload(id),
        ("enable" | "disable" | "toggle" | "reload" | "unload", None) => {
            eprintln!("{} needs an addon id\n{}", command, USAGE);
            process::exit(2);
        }
        (other, _) => {
            eprintln!("Unknown command {}\n{}", other, USAGE);
            process::exit(2);
        }
    };

    print_toasts(&events);
    print_list(&manager.summaries());

    manager.shutdown();
    print_toasts(&events);

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
    Ok(())
}

fn print_list(summaries: &[AddonSummary]) {
    if summaries.is_empty() {
        println!("No addons found.");
        return;
    }

    for s in summaries {
        let flag = if s.enabled { "on " } else { "off" };
        println!(
            "[{}] {:<20} {:<24} v{:<12} {:<8} {}",
            flag,
            s.id,
            s.name,
            s.version,
            s.state.to_string(),
            s.author
        );
        println!("      {}", s.description);
    }
}

fn print_report(manager: &AddonManager, batch: &Batch) {
    if !manager.errors().get(batch).is_empty() {
        eprintln!("{}", manager.errors().report(batch));
    }
}

fn print_toasts(events: &Receiver<ManagerEvent>) {
    for event in events.try_iter() {
        if let ManagerEvent::Toast { level, message } = event {
            match level {
                ToastLevel::Error => eprintln!("! {}", message),
                ToastLevel::Success | ToastLevel::Info => println!("* {}", message),
            }
        }
    }
}
