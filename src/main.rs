//! Bench console for the acoustic positioning combiner
//!
//! Builds the combiner against simulated devices, fans its output out to the
//! configured sinks (and stdout) and accepts control commands on stdin, one
//! per line, e.g. `ITG?`, `CREQ,2,5` or `LHOV,44.5,33.25,90`.

mod sim;

use acoustic_combiner::combiner::{CombinerEvent, ControlCommand, PositioningCombiner};
use acoustic_combiner::core::{DeviceType, SystemClock};
use acoustic_combiner::hardware::{CommError, CommResult, LineSink, MockAuxLink, MockInterrogator};
use acoustic_combiner::utils::CombinerConfig;
use anyhow::Context;
use clap::Parser;
use sim::{SimDevices, SimEvent, SimSettings};
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "acoustic-combiner", about = "Acoustic positioning combiner bench console")]
struct Args {
    /// JSON configuration file; defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Print the output line formats and exit
    #[arg(long)]
    emit_format: bool,
    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    emit_config: bool,
    /// Override the polled address mask (e.g. 0x7)
    #[arg(long, value_parser = parse_mask)]
    mask: Option<u16>,
    /// Override the water salinity (PSU)
    #[arg(long)]
    salinity: Option<f64>,
    /// Simulate an LBL base station instead of USBL
    #[arg(long)]
    lbl: bool,
    /// Simulated vessel start latitude
    #[arg(long, default_value = "44.5", allow_negative_numbers = true)]
    lat: f64,
    /// Simulated vessel start longitude
    #[arg(long, default_value = "33.25", allow_negative_numbers = true)]
    lon: f64,
    /// Simulated report period (ms)
    #[arg(long, default_value = "1000")]
    period_ms: u64,
    /// Do not echo output lines to stdout
    #[arg(short, long)]
    quiet: bool,
}

fn parse_mask(raw: &str) -> Result<u16, String> {
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => raw.parse::<u16>(),
    };
    parsed.map_err(|e| format!("invalid address mask '{raw}': {e}"))
}

/// Prints every output line to stdout
#[derive(Debug, Default)]
struct ConsoleSink {
    open: bool,
}

impl LineSink for ConsoleSink {
    fn open(&mut self) -> CommResult<()> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> CommResult<()> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn send_line(&mut self, line: &str) -> CommResult<()> {
        if !self.open {
            return Err(CommError::NotConnected {
                link: "stdout".to_string(),
            });
        }
        println!("{}", line.trim_end());
        Ok(())
    }

    fn describe(&self) -> String {
        "stdout".to_string()
    }
}

fn load_config(args: &Args) -> anyhow::Result<CombinerConfig> {
    let mut config = match &args.config {
        Some(path) => {
            CombinerConfig::from_file(path).with_context(|| format!("loading configuration from {}", path.display()))?
        }
        None => CombinerConfig::default(),
    };

    if let Some(mask) = args.mask {
        config.set_address_mask(mask).context("--mask")?;
    }
    if let Some(salinity) = args.salinity {
        config.set_salinity(salinity).context("--salinity")?;
    }
    config.validate()?;
    Ok(config)
}

fn describe_event(event: &CombinerEvent) {
    match event {
        CombinerEvent::UserDataResult {
            address,
            request,
            response,
        } => println!("RDATA,{address},{request},{response}"),
        CombinerEvent::LocalAddress { address } => println!("RRA,{address}"),
        CombinerEvent::InterrogationChanged(active) => println!("ITG,{active}"),
        CombinerEvent::DeviceInfo {
            device_type,
            serial_number,
            version,
        } => println!("DINFO,{device_type:?},{serial_number},{version}"),
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "acoustic_combiner=info".into()),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    if args.emit_config {
        println!("{}", config.to_json_string()?);
        return Ok(());
    }

    let devices = SimDevices {
        interrogator: MockInterrogator::new(),
        gnss: MockAuxLink::new(),
        compass: MockAuxLink::new(),
    };

    let mut combiner = PositioningCombiner::new(config, Box::new(devices.interrogator.clone()), Arc::new(SystemClock))?
        .with_gnss(Box::new(devices.gnss.clone()))
        .with_compass(Box::new(devices.compass.clone()))
        .with_configured_outputs();
    if !args.quiet {
        combiner = combiner.with_output(Box::new(ConsoleSink::default()));
    }

    if args.emit_format {
        println!("{}", combiner.output_format());
        return Ok(());
    }

    let combiner = Arc::new(combiner);
    combiner.add_event_listener(Box::new(describe_event));

    let settings = SimSettings {
        device_type: if args.lbl { DeviceType::LblBase } else { DeviceType::UsblBase },
        start_lat_deg: args.lat,
        start_lon_deg: args.lon,
        period: Duration::from_millis(args.period_ms.max(50)),
    };
    let (events_tx, events_rx) = mpsc::channel();
    sim::spawn(settings, devices, events_tx).context("starting simulator")?;

    let dispatcher = Arc::clone(&combiner);
    thread::Builder::new()
        .name("dispatch".to_string())
        .spawn(move || loop {
            match events_rx.recv_timeout(Duration::from_secs(1)) {
                Ok(SimEvent::Interrogator(event)) => dispatcher.handle_interrogator_event(event),
                Ok(SimEvent::Gnss(event)) => dispatcher.handle_gnss_event(event),
                Ok(SimEvent::Compass(event)) => dispatcher.handle_compass_event(event),
                Err(RecvTimeoutError::Timeout) => dispatcher.tick(),
                Err(RecvTimeoutError::Disconnected) => break,
            }
        })
        .context("starting dispatcher")?;

    if !combiner.connect() {
        warn!("Could not connect, use OCON to retry");
    }
    info!("Ready. Enter control commands, QUIT to exit");

    for line in io::stdin().lock().lines() {
        let line = line.context("reading stdin")?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("QUIT") || line.eq_ignore_ascii_case("EXIT") {
            break;
        }

        match line.parse::<ControlCommand>() {
            Ok(command) => {
                let reply = combiner.execute(command);
                if !reply.is_success() {
                    warn!("Command '{line}' failed");
                }
                println!("{reply}");
            }
            Err(e) => {
                error!("Rejected command '{line}': {e}");
                println!("ERR,{e}");
            }
        }
    }

    combiner.disconnect();
    info!("Bye");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mask() {
        assert_eq!(parse_mask("7"), Ok(7));
        assert_eq!(parse_mask("0x0F"), Ok(15));
        assert!(parse_mask("0xZZ").is_err());
        assert!(parse_mask("70000").is_err());
    }

    #[test]
    fn test_console_sink_requires_open() {
        let mut sink = ConsoleSink::default();
        assert!(sink.send_line("@AZMLOC").is_err());
        sink.open().unwrap();
        assert!(sink.send_line("@AZMLOC").is_ok());
    }

    #[test]
    fn test_args_overrides() {
        let args = Args::parse_from(["acoustic-combiner", "--mask", "0x3", "--salinity", "35"]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.address_mask, 3);
        assert_eq!(config.salinity_psu, 35.0);

        let args = Args::parse_from(["acoustic-combiner", "--salinity", "80"]);
        assert!(load_config(&args).is_err());
    }
}
