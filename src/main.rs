//! hidg-bridge - forward local keyboard and mouse input to USB HID gadget endpoints
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 Event Loop                   │
//! ├──────────────────────────────────────────────┤
//! │  libinput keyboard ──→ Keyboard SM ──→ hidg0 │
//! │  libinput mouse    ──→ Mouse SM    ──→ hidg1 │
//! │  udev monitor      ──→ mouse attach/detach   │
//! │  signalfd          ──→ shutdown              │
//! └──────────────────────────────────────────────┘
//! ```

mod bridge;
mod config;
mod constants;
mod discovery;
mod error;
mod gadget;
mod hid;
mod input;
mod layout;

use anyhow::Result;
use log::{error, info};
use std::path::PathBuf;

use hid::descriptor;

/// Print help message
fn print_help() {
    println!(
        r#"hidg-bridge {} - USB HID gadget input bridge

USAGE:
    hidg-bridge [OPTIONS]

OPTIONS:
    -h, --help                Print this help message
    -V, --version             Print version information
    -c, --config PATH         Use this config file
    -l, --layout LAYOUT       Keyboard layout: us, jis (overrides KEYBOARD_LAYOUT)
    -e, --event PATH          Keyboard evdev node (auto-detect by default)
    --hidg-keyboard PATH      Keyboard gadget node (default /dev/hidg0)
    --hidg-mouse PATH         Mouse gadget node (default /dev/hidg1)
    --grab                    Grab keyboard and mouse exclusively
    --no-mouse                Do not forward a mouse
    -v, --verbose             Debug logging
    --show                    Trace every event and report
    --check-ready             Probe gadget readiness once, exit 0 if ready
    --print-descriptors       Print the HID report descriptors for configfs
    --init-config             Write a commented config template
    --system                  With --init-config: write /etc/hidg-bridge/config.toml
    -f, --force               Overwrite an existing config without asking

ENVIRONMENT:
    KEYBOARD_LAYOUT           us | jis (jp)
    HIDG_BRIDGE_CONFIG        Config file path
    RUST_LOG                  Log filter (overrides -v/--show)

CONFIG FILE:
    ~/.config/hidg-bridge/config.toml, /etc/hidg-bridge/config.toml
"#,
        env!("CARGO_PKG_VERSION")
    );
}

/// Value of `--name VALUE` or `--name=VALUE`
fn arg_value(args: &[String], names: &[&str]) -> Option<String> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        for name in names {
            if arg == name {
                return iter.next().cloned();
            }
            if let Some(value) = arg.strip_prefix(name).and_then(|rest| rest.strip_prefix('=')) {
                return Some(value.to_string());
            }
        }
    }
    None
}

fn has_flag(args: &[String], names: &[&str]) -> bool {
    args.iter().any(|a| names.contains(&a.as_str()))
}

/// Default log filter from the verbosity flags
fn log_filter(args: &[String]) -> &'static str {
    if has_flag(args, &["--show"]) {
        "trace"
    } else if has_flag(args, &["--verbose", "-v"]) {
        "debug"
    } else {
        "info"
    }
}

/// Command-line overrides layered over the loaded config
fn apply_cli_overrides(cfg: &mut config::Config, args: &[String]) {
    if let Some(layout) = arg_value(args, &["--layout", "-l"]) {
        cfg.keyboard.layout = layout;
    }
    if let Some(device) = arg_value(args, &["--event", "-e"]) {
        cfg.keyboard.device = device;
    }
    if let Some(node) = arg_value(args, &["--hidg-keyboard"]) {
        cfg.gadget.keyboard_node = node;
    }
    if let Some(node) = arg_value(args, &["--hidg-mouse"]) {
        cfg.gadget.mouse_node = node;
    }
    if has_flag(args, &["--grab"]) {
        cfg.keyboard.grab = true;
        cfg.mouse.grab = true;
    }
    if has_flag(args, &["--no-mouse"]) {
        cfg.mouse.enabled = false;
    }
}

fn init_config(args: &[String]) -> Result<()> {
    let system = has_flag(args, &["--system"]);
    let force = has_flag(args, &["--force", "-f"]);

    let config_path = config::Config::template_path(system)?;
    if config_path.exists() && !force {
        println!("Config file already exists: {}", config_path.display());
        print!("Overwrite? [y/N]: ");
        std::io::Write::flush(&mut std::io::stdout())?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        let input = input.trim().to_lowercase();
        if input != "y" && input != "yes" {
            println!("Aborted.");
            return Ok(());
        }
    }

    let written = config::Config::write_template(system)?;
    println!("Config written: {}", written.display());
    Ok(())
}

fn print_descriptors() {
    println!("# keyboard (protocol 1, subclass 1, report_length 8)");
    println!("{}", descriptor::escaped(descriptor::KEYBOARD_REPORT_DESCRIPTOR));
    println!("# mouse (protocol 2, subclass 1, report_length 4)");
    println!("{}", descriptor::escaped(descriptor::MOUSE_REPORT_DESCRIPTOR));
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_filter(&args)))
        .init();

    // --help
    if has_flag(&args, &["--help", "-h"]) {
        print_help();
        return Ok(());
    }

    // --version
    if has_flag(&args, &["--version", "-V"]) {
        println!("hidg-bridge {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    if has_flag(&args, &["--print-descriptors"]) {
        print_descriptors();
        return Ok(());
    }

    if has_flag(&args, &["--init-config"]) {
        return init_config(&args);
    }

    let explicit = arg_value(&args, &["--config", "-c"]).map(PathBuf::from);
    let mut cfg = config::Config::load(explicit.as_deref());
    apply_cli_overrides(&mut cfg, &args);

    if has_flag(&args, &["--check-ready"]) {
        let readiness = bridge::readiness_probe(&cfg.gadget, cfg.mouse.enabled).probe();
        println!("{}", readiness.describe());
        std::process::exit(if readiness.is_ready() { 0 } else { 1 });
    }

    info!("hidg-bridge {} starting...", env!("CARGO_PKG_VERSION"));

    if let Err(e) = bridge::run(&cfg) {
        error!("{:#}", e);
        std::process::exit(1);
    }
    info!("hidg-bridge stopped");
    Ok(())
}
