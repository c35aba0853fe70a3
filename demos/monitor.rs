// Live monitoring with a serial DAQ
//
// Connects to a DAQ adapter, waits for the trigger to drop, then records the
// requested number of cycles (or a fixed duration) and saves them to CSV.

use clap::Parser;
use daq_monitor::notification::notification_channel;
use daq_monitor::{DaqConnector, DeviceFilter, Monitor, MonitorError, Notification, SessionConfig};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(about = "Monitor a serial DAQ device")]
struct Args {
    /// Serial port; the first known DAQ adapter is used when omitted
    #[arg(short, long)]
    port: Option<String>,

    /// Channel roles, one letter per channel (T, P, I)
    #[arg(short, long, default_value = "TTPPI")]
    roles: String,

    /// Device sample rate in Hz
    #[arg(long, default_value_t = 6000)]
    rate: u32,

    #[arg(long, default_value_t = 100)]
    decimation: u32,

    /// Number of cycles to record, one CSV file each
    #[arg(short, long, default_value_t = 1)]
    cycles: u32,

    /// Record continuously for this many seconds instead of cycles
    #[arg(long)]
    duration: Option<u64>,

    /// Output file prefix
    #[arg(short, long, default_value = "session")]
    output: PathBuf,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let roles = SessionConfig::parse_roles(&args.roles)
        .ok_or_else(|| format!("Invalid role string '{}'", args.roles))?;
    let mut config = SessionConfig::with_roles(roles);
    config.sample_rate_hz = args.rate;
    config.decimation = args.decimation;
    if let Some(secs) = args.duration {
        config.cycle_mode = false;
        config.monitoring_duration = Duration::from_secs(secs);
    }

    let daq = DaqConnector::locate(args.port.as_deref(), &DeviceFilter::default())?;
    println!("Using DAQ at {}", daq.port_name());

    let (tx, rx) = notification_channel();
    let mut monitor = Monitor::new(config, tx)?;
    monitor.connect(daq)?;

    // Wait for the trigger to be released before the first session
    loop {
        match monitor.start_session() {
            Ok(()) => break,
            Err(MonitorError::TriggerHigh { .. }) => {
                println!("Trigger is HIGH, waiting...");
                thread::sleep(Duration::from_secs(1));
            }
            Err(e) => return Err(e.into()),
        }
    }

    let mut session = 0;
    for notification in rx.iter() {
        match notification {
            Notification::Connection { connected } => {
                println!("Device {}", if connected { "connected" } else { "disconnected" });
            }
            Notification::CycleStarted { cycle } => println!("Cycle {cycle} running"),
            Notification::CycleEnded(cycle) => {
                println!("Cycle {} done, {} samples", cycle.cycle, cycle.times.len());
                monitor.stop_session();
            }
            Notification::MonitoringEnded => monitor.stop_session(),
            Notification::ReadError { last_error, .. } => {
                eprintln!("Read error: {last_error}");
                monitor.stop_session();
            }
            Notification::SessionExport(export) => {
                session += 1;
                let path = args
                    .output
                    .with_file_name(format!(
                        "{}_{session}.csv",
                        args.output.file_name().and_then(|n| n.to_str()).unwrap_or("session")
                    ));
                export.write_csv(&path)?;
                println!("Saved {} samples to {}", export.len(), path.display());

                if args.duration.is_some() || session >= args.cycles || !monitor.is_connected() {
                    break;
                }
                monitor.next_session()?;
            }
            _ => {}
        }
    }

    monitor.shutdown();
    Ok(())
}
