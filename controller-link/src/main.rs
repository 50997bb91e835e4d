//! Entry point for `controller-link`.
//!
//! Drives a [`Controller`] against simulated controllers: connect, then run
//! one operation.  All protocol work lives in the library; `main.rs` owns
//! only process setup (logging, argument parsing).

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use controller_link::simulator::{SimulatedController, SimulatedTransport, SimulatorConfig};
use controller_link::{
    Command, CommandKind, ConnectOptions, Controller, ControllerCriteria, Criteria, LinkContext,
    LinkEvent, OtaOptions, Reply,
};

/// Talk to TNGL lighting controllers.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Number of simulated controllers in range.
    #[arg(long, default_value_t = 1)]
    controllers: usize,

    /// Only connect to a controller with this name.
    #[arg(long, global = true)]
    name: Option<String>,

    /// Seed for the simulator's fault model.
    #[arg(long, default_value_t = 0, global = true)]
    seed: u64,

    /// Probability that a frame is lost in transit.
    #[arg(long, default_value_t = 0.0, global = true)]
    failure_rate: f64,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Print the connected controller's info block.
    Info,
    /// Compile a TNGL file and write it as the controller's program.
    Upload { file: PathBuf },
    /// Install a firmware image.
    Ota {
        file: PathBuf,
        #[arg(long)]
        chunk_size: Option<usize>,
    },
    /// Run an argument-less command by name, e.g. `read-firmware-version`.
    Call { command: String },
}

fn simulated(count: usize, config: SimulatorConfig) -> SimulatedTransport {
    let controllers = (0..count)
        .map(|i| {
            let mac = [0x0c, 0x8b, 0x95, 0x00, 0x00, i as u8];
            SimulatedController::new(&format!("controller-{}", i + 1), mac)
                .with_rssi(-40 - 5 * i as i16)
        })
        .collect();
    SimulatedTransport::new(config, controllers)
}

fn print_reply(reply: &Reply) {
    match reply {
        Reply::ControllerInfo(info) => {
            println!("name        {}", info.name);
            println!("label       {}", info.label);
            println!("mac         {}", info.mac_string());
            println!("firmware    {}", info.fw_version);
            println!("pcb/product {}/{}", info.pcb_code, info.product_code);
            println!("program     {}", hex::encode(info.program_fingerprint));
            println!("history     {}", hex::encode(info.event_history_fingerprint));
            println!("config      {}", hex::encode(info.config_fingerprint));
            println!("network     {}", hex::encode(info.network_signature));
        }
        Reply::ProgramFingerprint(fp) => println!("{}", hex::encode(fp)),
        Reply::NetworkSignature(sig) => println!("{}", hex::encode(sig)),
        Reply::Program(bytes) | Reply::EventHistory(bytes) => println!("{}", hex::encode(bytes)),
        other => println!("{:?}", other),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    if cli.controllers == 0 {
        bail!("at least one controller is needed");
    }

    let transport = simulated(
        cli.controllers,
        SimulatorConfig {
            seed: cli.seed,
            failure_rate: cli.failure_rate,
            ..SimulatorConfig::default()
        },
    );
    let controller = Controller::new(LinkContext::default());
    controller.assign_transport(Arc::new(transport));

    let criteria = match &cli.name {
        Some(name) => Criteria::from(ControllerCriteria::default().name(name.as_str())),
        None => Criteria::any(),
    };
    let advert = controller
        .connect(ConnectOptions {
            criteria,
            autonomous_reconnection: false,
            ..ConnectOptions::default()
        })
        .await
        .context("connecting")?;
    log::info!("connected to {} ({} dBm)", advert.name, advert.rssi);

    match cli.mode {
        Mode::Info => {
            let info = controller.read_controller_info().await?;
            print_reply(&Reply::ControllerInfo(Box::new(info)));
        }
        Mode::Upload { file } => {
            let source = fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let program = controller
                .upload_tngl(&source)
                .await
                .with_context(|| format!("uploading {}", file.display()))?;
            println!(
                "wrote {} byte(s), fingerprint {}",
                program.len(),
                program.fingerprint_hex()
            );
        }
        Mode::Ota { file, chunk_size } => {
            let firmware =
                fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
            let mut events = controller.subscribe();
            let progress = tokio::spawn(async move {
                while let Ok(event) = events.recv().await {
                    match event {
                        LinkEvent::OtaProgress(percent) => println!("{:>6.2}%", percent),
                        LinkEvent::Ota(state) if state.is_terminal() => break,
                        _ => {}
                    }
                }
            });
            let options = OtaOptions {
                chunk_size,
                ..OtaOptions::default()
            };
            let result = controller.update_firmware(&firmware, &options).await;
            let _ = progress.await;
            result.context("firmware update")?;
            println!("firmware installed");
        }
        Mode::Call { command } => {
            let kind = CommandKind::from_name(&command)
                .with_context(|| format!("unknown command \"{}\"", command))?;
            let request = Command::without_arguments(kind)
                .with_context(|| format!("\"{}\" needs arguments", command))?;
            let reply = controller.request(&request).await?;
            print_reply(&reply);
        }
    }

    controller.disconnect().await?;
    Ok(())
}
