//! Corsair Link Control CLI
//!
//! Command-line interface for monitoring and controlling Corsair Link liquid
//! coolers and fan hubs.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use corsair_rust_devices::config;
use corsair_rust_devices::device::{ControlMode, DeviceDirectory, HubUnit, LogSink};
use corsair_rust_devices::transport::{HidBackend, LinkBackend};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Corsair Link Control Tool
#[derive(Parser, Debug)]
#[command(name = "corsair-link-cli")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List connected Corsair Link units
    List,

    /// Show current readings from every connected unit
    Status,

    /// Continuously monitor all connected units
    Watch {
        /// Update interval in seconds
        #[arg(short, long, default_value = "1")]
        interval: u64,
    },

    /// Set a fan to a fixed duty, a fixed RPM, or back to firmware control
    SetFan {
        /// Unit index from `list` output (when several units are connected)
        #[arg(short, long, default_value = "0")]
        unit: usize,

        /// Link channel the fan's device sits on
        #[arg(short, long, default_value = "0")]
        channel: u8,

        /// Fan slot index on that device
        #[arg(short, long, default_value = "0")]
        fan: usize,

        /// Duty cycle percentage (0-100)
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
        duty: Option<u8>,

        /// Target speed in RPM (above 100)
        #[arg(long, value_parser = clap::value_parser!(u16).range(101..))]
        rpm: Option<u16>,

        /// Return the fan to firmware-managed control
        #[arg(long)]
        default: bool,
    },

    /// Run the monitoring daemon with hot-plug discovery
    Daemon,
}

// =============================================================================
// Main
// =============================================================================

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    match args.command {
        Command::List => cmd_list(),
        Command::Status => cmd_status(),
        Command::Watch { interval } => cmd_watch(interval),
        Command::SetFan {
            unit,
            channel,
            fan,
            duty,
            rpm,
            default,
        } => cmd_set_fan(unit, channel, fan, duty, rpm, default),
        Command::Daemon => cmd_daemon(),
    }
}

/// Initialize tracing subscriber for logging
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

// =============================================================================
// Command Implementations
// =============================================================================

fn cmd_list() -> Result<()> {
    let backend = HidBackend::new().context("Failed to initialize HID backend")?;
    let paths = backend.enumerate().context("Failed to enumerate devices")?;

    if paths.is_empty() {
        println!("❌ No Corsair Link units found.");
        return Ok(());
    }

    println!("🔍 Found {} unit(s):\n", paths.len());
    for (i, path) in paths.iter().enumerate() {
        println!("  {}. {}", i, path);
    }

    Ok(())
}

fn cmd_status() -> Result<()> {
    let backend = HidBackend::new().context("Failed to initialize HID backend")?;
    let directory = DeviceDirectory::new(Box::new(backend));
    let mut sink = LogSink;

    directory.scan(&mut sink);
    let units = directory.units();

    if units.is_empty() {
        println!("❌ No Corsair Link units found.");
        return Ok(());
    }

    println!("🔍 Found {} unit(s):\n", units.len());
    for (i, (path, unit)) in units.iter().enumerate() {
        let mut hub = unit.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = hub.update(&mut sink) {
            eprintln!("⚠️  {}: update failed: {}", path, e);
        }
        print_unit(i, path, &hub);
    }

    Ok(())
}

fn cmd_watch(interval_secs: u64) -> Result<()> {
    let backend = HidBackend::new().context("Failed to initialize HID backend")?;
    let directory = DeviceDirectory::new(Box::new(backend));
    let mut sink = LogSink;

    // Setup Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    println!("🌡️  Watching Corsair Link units (Ctrl+C to stop)...");

    while running.load(Ordering::SeqCst) {
        directory.scan(&mut sink);
        let units = directory.units();

        // Clear screen and move cursor to top
        print!("\x1B[2J\x1B[1;1H");

        if units.is_empty() {
            println!("❌ No Corsair Link units found. Waiting...");
        }
        for (i, (path, unit)) in units.iter().enumerate() {
            let mut hub = unit.lock().unwrap_or_else(PoisonError::into_inner);
            if let Err(e) = hub.update(&mut sink) {
                eprintln!("⚠️  {}: update failed: {}", path, e);
            }
            print_unit(i, path, &hub);
        }

        thread::sleep(Duration::from_secs(interval_secs));
    }

    println!("\n👋 Watch stopped.");
    Ok(())
}

fn cmd_set_fan(
    unit_index: usize,
    channel: u8,
    fan: usize,
    duty: Option<u8>,
    rpm: Option<u16>,
    default: bool,
) -> Result<()> {
    let value = match (duty, rpm, default) {
        (Some(d), None, false) => Some(d as f32),
        (None, Some(r), false) => Some(r as f32),
        (None, None, true) => None,
        _ => bail!("Specify exactly one of --duty, --rpm, or --default"),
    };

    let backend = HidBackend::new().context("Failed to initialize HID backend")?;
    let directory = DeviceDirectory::new(Box::new(backend));
    let mut sink = LogSink;

    directory.scan(&mut sink);
    let units = directory.units();

    let (path, unit) = units.get(unit_index).with_context(|| {
        format!(
            "No unit at index {} ({} unit(s) connected)",
            unit_index,
            units.len()
        )
    })?;

    let mut hub = unit.lock().unwrap_or_else(PoisonError::into_inner);

    // Read once so slot presence and hardware control state are current.
    hub.update(&mut sink)
        .with_context(|| format!("Failed to read {}", path))?;
    hub.set_fan_speed(channel, fan, value)
        .with_context(|| format!("Failed to set fan speed on {}", path))?;

    match value {
        Some(v) if v <= 100.0 => println!("✅ Channel {} fan {} set to {:.0}%", channel, fan, v),
        Some(v) => println!("✅ Channel {} fan {} set to {:.0} RPM", channel, fan, v),
        None => println!(
            "✅ Channel {} fan {} returned to firmware control",
            channel, fan
        ),
    }

    Ok(())
}

fn cmd_daemon() -> Result<()> {
    let app_config = config::load_config().unwrap_or_default();

    let backend = HidBackend::new().context("Failed to initialize HID backend")?;
    let directory = Arc::new(
        DeviceDirectory::new(Box::new(backend)).with_open_throttle(app_config.open_throttle()),
    );

    // Setup Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    println!("🌡️  Corsair Link Daemon Started (Ctrl+C to stop)");
    println!("{}", "━".repeat(45));
    println!("   Poll interval:      {} ms", app_config.poll_interval_ms);
    println!(
        "   Discovery interval: {} ms",
        app_config.discovery_interval_ms
    );
    println!("{}", "━".repeat(45));
    println!();

    // Discovery runs on its own thread so a slow probe never stalls polling.
    let discovery = {
        let directory = directory.clone();
        let running = running.clone();
        let interval = app_config.discovery_interval();
        thread::spawn(move || {
            let mut sink = LogSink;
            directory.run(&running, interval, &mut sink);
        })
    };

    let mut sink = LogSink;
    let mut cycle_count: u64 = 0;

    while running.load(Ordering::SeqCst) {
        cycle_count += 1;

        for (path, unit) in directory.units() {
            let mut hub = unit.lock().unwrap_or_else(PoisonError::into_inner);
            match hub.update(&mut sink) {
                Ok(()) => print_cycle_line(cycle_count, &hub),
                Err(e) => eprintln!("[{:4}] ⚠️  {}: update failed: {}", cycle_count, path, e),
            }
        }

        thread::sleep(app_config.poll_interval());
    }

    discovery.join().ok();

    println!("\n✅ Daemon stopped after {} cycles.", cycle_count);
    Ok(())
}

// =============================================================================
// Output helpers
// =============================================================================

fn print_unit(index: usize, path: &str, hub: &HubUnit) {
    println!("Unit {}: {}", index, path);
    println!("{}", "━".repeat(60));

    for device in hub.channels() {
        println!(
            "  Channel {}: {} (firmware {})",
            device.channel(),
            device.model().name,
            device.firmware()
        );

        for temp in device.temps() {
            match temp.value() {
                Some(v) => println!("    Temp {}: {:5.1}°C", temp.id().index, v),
                None => println!("    Temp {}:     -", temp.id().index),
            }
        }

        for fan in device.fans() {
            let idx = fan.sensor().id().index;
            match fan.sensor().value() {
                Some(rpm) => {
                    let percent = fan
                        .percent()
                        .map(|p| format!("{:3.0}%", p))
                        .unwrap_or_else(|| "   -".to_string());
                    let mode = match fan.control().mode {
                        ControlMode::Default => "auto",
                        ControlMode::Software => "fixed",
                    };
                    println!(
                        "    Fan {}:  {:4.0} RPM | {} | {}",
                        idx, rpm, percent, mode
                    );
                }
                None => println!("    Fan {}:  not connected", idx),
            }
        }

        if let Some(pump) = device.pump() {
            match pump.value() {
                Some(rpm) => println!("    Pump:   {:4.0} RPM", rpm),
                None => println!("    Pump:   not connected"),
            }
        }
    }
    println!();
}

fn print_cycle_line(cycle: u64, hub: &HubUnit) {
    for device in hub.channels() {
        let mut parts: Vec<String> = Vec::new();

        for temp in device.temps() {
            if let Some(v) = temp.value() {
                parts.push(format!("{:.1}°C", v));
            }
        }
        for fan in device.fans() {
            if let Some(rpm) = fan.sensor().value() {
                let idx = fan.sensor().id().index;
                match fan.percent() {
                    Some(p) => parts.push(format!("fan{} {:.0}% ({:.0} RPM)", idx, p, rpm)),
                    None => parts.push(format!("fan{} {:.0} RPM", idx, rpm)),
                }
            }
        }
        if let Some(rpm) = device.pump().and_then(|p| p.value()) {
            parts.push(format!("pump {:.0} RPM", rpm));
        }

        println!(
            "[{:4}] 💧 ch{} {}: {}",
            cycle,
            device.channel(),
            device.model().name,
            parts.join(" | ")
        );
    }
}
