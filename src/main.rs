//! packwatch agent binary.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

use packwatch::config::{AgentConfig, DEFAULT_CONFIG_PATH, SourceType, UpdateConfig};
use packwatch::transport::serial::SerialConfig;
use packwatch::{
    Broadcaster, Channel, ChannelBank, DecoderSource, Error, ExitRestarter, HttpUpdateSource,
    NetContext, Poller, Result, RunSwitch, SerialSource, SerialTransport, Transport,
    UpdateManager, VersionStore, list_ports,
};

/// Serial chunks buffered between the read task and the channel.
const SERIAL_QUEUE: usize = 64;

/// Decoded units buffered per bit-level decoder.
const DECODER_QUEUE: usize = 256;

#[derive(Debug, Parser)]
#[command(name = "packwatch", version, about = "Battery pack telemetry agent")]
struct Args {
    /// Configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Print a default configuration and exit.
    #[arg(long)]
    print_default_config: bool,

    /// List serial ports and exit.
    #[arg(long)]
    list_ports: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    if args.print_default_config {
        println!("{}", AgentConfig::default().to_toml()?);
        return Ok(());
    }
    if args.list_ports {
        for port in list_ports()? {
            println!("{port}");
        }
        return Ok(());
    }

    let config = AgentConfig::load(&args.config)?;

    let run = match &config.run_enable.pin {
        Some(pin) => RunSwitch::with_pin(pin),
        None => RunSwitch::new(),
    };
    if !run.is_enabled() {
        return Err(Error::RunDisabled);
    }

    let net = NetContext::connect(&config.influx, config.syslog.as_ref()).await?;
    net.log("packwatch starting");

    let mut bus = SerialTransport::new(
        SerialConfig::new(&config.serial.port)
            .baud_rate(config.serial.baud_rate)
            .connection_delay(config.serial.settle()),
    );
    bus.connect().await?;
    let reader = bus.take_reader();

    let mut channels = Vec::with_capacity(config.channels.len());
    let mut serial_tx = None;
    for channel in &config.channels {
        match channel.source {
            SourceType::Serial => {
                let (tx, source) = SerialSource::channel(SERIAL_QUEUE);
                serial_tx = Some(tx);
                channels.push(Channel::new(&channel.name, source));
            }
            SourceType::Decoder => {
                let path = channel.samples.as_ref().ok_or_else(|| Error::Config {
                    message: format!("decoder channel {} has no samples device", channel.name),
                })?;
                let samples = tokio::fs::File::open(path).await?;
                let (feed, source) = DecoderSource::channel(DECODER_QUEUE);
                let name = channel.name.clone();
                tokio::spawn(async move {
                    if let Err(e) = feed.run(samples).await {
                        tracing::error!("({}) decoder stopped: {}", name, e);
                    }
                });
                channels.push(Channel::new(&channel.name, source));
            }
        }
        tracing::info!("channel {} on {:?}", channel.name, channel.source);
    }

    if let (Some(reader), Some(tx)) = (reader, serial_tx) {
        tokio::spawn(async move {
            if let Err(e) = SerialTransport::run_read_loop_with_reader(reader, tx).await {
                tracing::error!("serial reader stopped: {}", e);
            }
        });
    }
    let bank = ChannelBank::new(channels);

    if config.update.enabled {
        self_update(&config.update, &net).await;
    }

    let bus = Arc::new(Mutex::new(bus));
    let broadcaster = Broadcaster::new(Arc::clone(&bus), bank.clone())
        .interval(config.broadcaster.interval())
        .spawn(run.clone());

    let stopper = run.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
            stopper.stop();
        }
    });

    Poller::new(bank, net)
        .idle(config.poll.idle())
        .run(run.clone())
        .await;

    run.stop();
    if let Err(e) = broadcaster.await {
        tracing::warn!("broadcaster task failed: {}", e);
    }
    bus.lock().await.disconnect().await?;
    tracing::info!("packwatch stopped");
    Ok(())
}

async fn self_update(config: &UpdateConfig, net: &NetContext) {
    let source = match HttpUpdateSource::new(&config.repo_url, &config.filename) {
        Ok(source) => source,
        Err(e) => {
            net.log(&format!("update skipped: {e}"));
            return;
        }
    };

    let manager = UpdateManager::new(
        source,
        VersionStore::new(&config.version_file),
        &config.staging_file,
        &config.target,
        ExitRestarter,
    );
    let outcome = manager.run(net).await;
    tracing::debug!("update outcome: {:?}", outcome);
}
