// List serial DAQ devices
//
// Shows which serial ports the connector would accept.

use clap::Parser;
use daq_monitor::{DaqConnector, DeviceFilter};

#[derive(Parser, Debug)]
#[command(about = "List DAQ devices on serial ports")]
struct Args {
    /// Show every USB serial port, not just known DAQ vendors
    #[arg(short, long)]
    all: bool,

    /// Only show devices whose product name contains this text
    #[arg(short, long)]
    name: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut filter = if args.all {
        DeviceFilter::any_usb()
    } else {
        DeviceFilter::default()
    };
    filter.name = args.name;

    let devices = DaqConnector::available_devices(&filter)?;
    if devices.is_empty() {
        println!("No DAQ devices found. Please connect a device and try again.");
        return Ok(());
    }

    println!("Found {} device(s):", devices.len());
    for (i, device) in devices.iter().enumerate() {
        let ids = match (device.vendor_id, device.product_id) {
            (Some(vid), Some(pid)) => format!("{vid:04x}:{pid:04x}"),
            _ => "----:----".to_string(),
        };
        println!("  {}. {} [{}] at {}", i + 1, device.name, ids, device.port);
    }
    Ok(())
}
