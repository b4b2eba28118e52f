// src/main.rs
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use ocmfet_acq::client::{CommandSender, CommandSink};
use ocmfet_acq::commands::DeviceCommand;
use ocmfet_acq::config::AcquisitionConfig;
use ocmfet_acq::drivers::{
    AcquisitionCore, ChannelBufferSet, DecodePipeline, EncodingMode, FilterChain,
    OfflineRecording, SampleDecoder,
};
use ocmfet_acq::engine;
use ocmfet_acq::listeners::{bind_udp, spawn_message_listener, ListenerEvent, SocketOptions};
use ocmfet_acq::types::{AcqMessage, ControlCommand};
#[derive(Parser)]
#[command(name = "ocmfet-acq")]
#[command(about = "Acquisition client for the OCMFET UDP board", long_about = None)]
struct Cli {
    /// JSON configuration file; built-in defaults when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Packed-triplet board (two 24-bit channels)
    #[arg(long, global = true)]
    zero: bool,
    #[command(subcommand)]
    command: Commands,
}
#[derive(Subcommand)]
enum Commands {
    /// Stream from the board and log per-batch RMS
    Live {
        #[arg(long, default_value_t = 10.0)]
        seconds: f64,
        /// Sample rate in Hz, one of the configured choices
        #[arg(long)]
        rate: Option<f64>,
        /// Leave the board streaming on exit
        #[arg(long)]
        no_stop: bool,
    },
    /// Decode a raw recording and report the last window
    Offline {
        file: PathBuf,
        #[arg(long, default_value_t = 1024)]
        chunk_frames: usize,
    },
    /// Send one command line to the board and print its replies
    Send {
        #[arg(required = true, num_args = 1..)]
        command: Vec<String>,
        #[arg(long, default_value_t = 500)]
        wait_ms: u64,
    },
}
fn load_config(cli: &Cli) -> Result<AcquisitionConfig> {
    let mut config = match &cli.config {
        Some(path) => AcquisitionConfig::load(path)?,
        None if cli.zero => AcquisitionConfig::packed_triplet(),
        None => AcquisitionConfig::default(),
    };
    if cli.zero && config.encoding_mode != EncodingMode::PackedTriplet {
        config.encoding_mode = EncodingMode::PackedTriplet;
        config.channel_count = 2;
        config.validate().context("--zero conflicts with the config file")?;
    }
    Ok(config)
}
fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    match cli.command {
        Commands::Live {
            seconds,
            rate,
            no_stop,
        } => run_live(config, seconds, rate, no_stop),
        Commands::Offline { file, chunk_frames } => run_offline(config, file, chunk_frames),
        Commands::Send { command, wait_ms } => run_send(config, command.join(" "), wait_ms),
    }
}
fn micro_amps(values: &[f64]) -> String {
    values
        .iter()
        .map(|v| format!("{:.4}", v * 1e6))
        .collect::<Vec<_>>()
        .join(" ")
}
fn run_live(
    config: AcquisitionConfig,
    seconds: f64,
    rate: Option<f64>,
    no_stop: bool,
) -> Result<()> {
    let (tx, rx) = mpsc::channel();
    let (tx_cmd, rx_cmd) = mpsc::channel();
    let handle = engine::spawn_thread(config, tx, rx_cmd).context("starting acquisition engine")?;
    if let Some(rate) = rate {
        tx_cmd.send(ControlCommand::SetSampleRate(rate))?;
    }
    tx_cmd.send(ControlCommand::StartStream)?;
    let deadline = Instant::now() + Duration::from_secs_f64(seconds.max(0.0));
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        match rx.recv_timeout(left) {
            Ok(AcqMessage::Ready { data_addr, msg_addr }) => {
                info!("listening: data {data_addr:?}, messages {msg_addr}")
            }
            Ok(AcqMessage::Frame(frame)) => info!(
                "ptr {} window {:.2}s rms[uA] {}",
                frame.ptr,
                frame.duration_seconds(),
                micro_amps(&frame.batch_rms)
            ),
            Ok(AcqMessage::Console(text)) => info!("[board] {}", text.trim_end()),
            Ok(AcqMessage::ListenerFailed { kind, error }) => {
                warn!("{kind} listener failed: {error}")
            }
            Ok(AcqMessage::Log(text)) => warn!("{text}"),
            Ok(AcqMessage::Stopped) => break,
            Ok(_) => {}
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    if !no_stop {
        tx_cmd.send(ControlCommand::StopStream).ok();
    }
    tx_cmd.send(ControlCommand::Shutdown).ok();
    handle
        .join()
        .map_err(|_| anyhow!("acquisition engine panicked"))
}
fn run_offline(config: AcquisitionConfig, file: PathBuf, chunk_frames: usize) -> Result<()> {
    let recording = OfflineRecording::open(
        &file,
        config.encoding_mode,
        config.channel_count,
        chunk_frames,
    )
    .with_context(|| format!("opening {}", file.display()))?;
    info!(
        "{}: {} samples per channel, {:.3} s at {} Hz",
        file.display(),
        recording.samples_per_channel(),
        recording.duration_seconds(config.sample_rate_hz),
        config.sample_rate_hz
    );
    let mut buffers = ChannelBufferSet::new(
        config.channel_count,
        config.sample_rate_hz,
        config.time_range_s,
    )?;
    buffers.change_filters(FilterChain::from_kinds(config.sample_rate_hz, &config.filters)?);
    let core = AcquisitionCore::new(
        SampleDecoder::new(config.encoding_mode, config.scale_ua_per_unit),
        buffers,
    )?;
    let mut pipeline = DecodePipeline::new(recording, core);
    let chunks = pipeline.drain()?;
    let frame = pipeline.latest_frame();
    info!(
        "{chunks} chunks, {} dropped, last window {:.3} s",
        pipeline.core().dropped_batches(),
        frame.duration_seconds()
    );
    let spectrum = pipeline.latest_spectrum().ok();
    for (channel, samples) in frame.samples.iter().enumerate() {
        if samples.is_empty() {
            continue;
        }
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let rms = (samples.iter().map(|v| v * v).sum::<f64>() / n).sqrt();
        let (min, max) = samples
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let peak = spectrum
            .as_ref()
            .and_then(|s| s.peak_frequency(channel))
            .map(|f| format!("{f:.1} Hz"))
            .unwrap_or_else(|| "-".into());
        println!(
            "ch{}: mean {} rms {} min {} max {} [uA], peak {peak}",
            channel + 1,
            micro_amps(&[mean]),
            micro_amps(&[rms]),
            micro_amps(&[min]),
            micro_amps(&[max]),
        );
    }
    Ok(())
}
fn run_send(config: AcquisitionConfig, text: String, wait_ms: u64) -> Result<()> {
    let command: DeviceCommand = text.parse()?;
    let options = SocketOptions {
        recv_buffer_bytes: 0,
        poll_interval: config.poll_interval(),
    };
    let socket = bind_udp(config.local_msg_addr(), options)
        .with_context(|| format!("binding {}", config.local_msg_addr()))?;
    let mut sender = CommandSender::new(socket.try_clone()?, config.server_msg_addr());
    let (tx, rx) = mpsc::channel();
    let listener = spawn_message_listener(socket, tx)?;
    sender.send_command(&command)?;
    let deadline = Instant::now() + Duration::from_millis(wait_ms);
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        match rx.recv_timeout(left) {
            Ok(ListenerEvent::Message(reply)) => println!("{}", reply.trim_end()),
            Ok(ListenerEvent::Failed { error, .. }) => return Err(error.into()),
            Ok(_) => {}
            Err(_) => break,
        }
    }
    listener.shutdown();
    Ok(())
}
