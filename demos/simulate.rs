// Simulated monitoring session
//
// Runs the full pipeline against a synthetic trigger and sensor signal, so it
// needs no hardware. Prints cycle events and writes the session to CSV.

use clap::Parser;
use daq_monitor::{Monitor, Notification, ScriptedSource, SessionConfig};
use daq_monitor::notification::notification_channel;
use std::f64::consts::TAU;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(about = "Run a monitoring session against simulated DAQ data")]
struct Args {
    /// Channel roles, one letter per channel (T, P, I)
    #[arg(short, long, default_value = "TTPPI")]
    roles: String,

    /// Simulated samples per second
    #[arg(long, default_value_t = 100)]
    rate: u32,

    /// Stop after this many cycles (cycle mode)
    #[arg(short, long, default_value_t = 2)]
    cycles: u32,

    /// Seconds the trigger stays HIGH per cycle
    #[arg(long, default_value_t = 2.0)]
    cycle_secs: f64,

    /// Seconds the trigger stays LOW between cycles
    #[arg(long, default_value_t = 3.0)]
    gap_secs: f64,

    /// Record continuously for this many seconds instead of cycles
    #[arg(long)]
    duration: Option<u64>,

    /// CSV file for the session export
    #[arg(short, long, default_value = "simulated_session.csv")]
    output: PathBuf,
}

fn synthetic_source(args: &Args, channels: usize, trigger: Option<usize>) -> ScriptedSource {
    let rate = f64::from(args.rate);
    let period = args.cycle_secs + args.gap_secs;
    let gap = args.gap_secs;

    ScriptedSource::from_fn(move |i| {
        let t = i as f64 / rate;
        let in_cycle = (t % period) >= gap;
        let row = (0..channels)
            .map(|ch| {
                if Some(ch) == trigger {
                    return if in_cycle { 30000.0 } else { 1000.0 };
                }
                let base = 800.0 + 400.0 * ch as f64;
                let swing = if in_cycle { 300.0 } else { 20.0 };
                (base + swing * (TAU * 0.5 * t + ch as f64).sin()).round()
            })
            .collect();
        Some(row)
    })
    .with_pacing(Duration::from_secs_f64(1.0 / rate))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let roles = SessionConfig::parse_roles(&args.roles)
        .ok_or_else(|| format!("Invalid role string '{}'", args.roles))?;
    let mut config = SessionConfig::with_roles(roles);
    config.sample_rate_hz = args.rate;
    config.decimation = 1;
    if let Some(secs) = args.duration {
        config.cycle_mode = false;
        config.monitoring_duration = Duration::from_secs(secs);
    }

    println!("Simulated DAQ Session");
    println!("=====================\n");
    println!(
        "{} channels at {} Hz, {} mode\n",
        config.channels.len(),
        args.rate,
        if config.cycle_mode { "cycle" } else { "continuous" }
    );

    let source = synthetic_source(&args, config.channels.len(), config.inductive_position());
    let (tx, rx) = notification_channel();
    let mut monitor = Monitor::new(config, tx)?;
    monitor.connect(source)?;
    monitor.start_session()?;

    let mut cycles_done = 0;
    for notification in rx.iter() {
        match notification {
            Notification::CycleWaiting => println!("Waiting for trigger..."),
            Notification::CycleStarted { cycle } => println!("Cycle {cycle} started"),
            Notification::CycleEnded(cycle) => {
                let duration = cycle.times.last().copied().unwrap_or(0.0);
                println!(
                    "Cycle {} ended: {} samples over {:.2}s",
                    cycle.cycle,
                    cycle.times.len(),
                    duration
                );
                cycles_done += 1;
                if cycles_done >= args.cycles {
                    monitor.stop_session();
                }
            }
            Notification::MonitoringEnded => {
                println!("Monitoring time ended");
                monitor.stop_session();
            }
            Notification::ReadError { last_error, .. } => {
                eprintln!("Acquisition failed: {last_error}");
                monitor.stop_session();
            }
            Notification::SessionExport(export) => {
                println!(
                    "\nSession: {} samples, {} cycles",
                    export.len(),
                    export.cycle_count()
                );
                let df = export.to_dataframe()?;
                println!("{}", df.head(Some(5)));
                export.write_csv(&args.output)?;
                println!("Saved to {}", args.output.display());
                break;
            }
            _ => {}
        }
    }

    monitor.shutdown();
    Ok(())
}
