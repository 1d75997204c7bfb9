use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use turntalk::config::Overrides;
use turntalk::transport::WsConnector;
use turntalk::voice::{
    CaptureEvent, CaptureSource, DEFAULT_SAMPLE_RATE, EnergyMeasure,
    MicrophoneCapture, SilenceCutoffPolicy, SpeakerPlayer, encode_wav, handoff, peak, rms,
};
use turntalk::{Config, Session, SessionError, SessionEvent};

/// Turntalk - talk to a remote voice peer, one turn at a time
#[derive(Parser)]
#[command(name = "turntalk", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/turntalk/config.toml)
    #[arg(long, env = "TURNTALK_CONFIG")]
    config: Option<PathBuf>,

    /// Peer WebSocket endpoint
    #[arg(long)]
    url: Option<String>,

    /// Energy above which a block counts as speech
    #[arg(long)]
    silence_threshold: Option<f32>,

    /// Energy measure: rms or peak
    #[arg(long)]
    energy: Option<EnergyMeasure>,

    /// Silent blocks that end an utterance
    #[arg(long, conflicts_with = "silence_ms")]
    silence_frames: Option<u32>,

    /// Milliseconds of silence that end an utterance
    #[arg(long)]
    silence_ms: Option<u64>,

    /// Capture sample rate in Hz
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Samples per analysis block
    #[arg(long)]
    block_size: Option<usize>,

    /// Print session events as JSON lines
    #[arg(long)]
    json: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Test microphone input and speech classification
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Encode raw little-endian f32 samples into a WAV file
    Encode {
        /// Raw input file
        input: PathBuf,
        /// WAV output file
        output: PathBuf,
        /// Sample rate written into the header
        #[arg(long, default_value_t = DEFAULT_SAMPLE_RATE)]
        rate: u32,
    },
}

impl Cli {
    fn overrides(&self) -> Overrides {
        let cutoff = self
            .silence_frames
            .map(SilenceCutoffPolicy::FrameCount)
            .or_else(|| {
                self.silence_ms
                    .map(|ms| SilenceCutoffPolicy::Duration(Duration::from_millis(ms)))
            });

        Overrides {
            endpoint: self.url.clone(),
            sample_rate: self.sample_rate,
            block_size: self.block_size,
            silence_threshold: self.silence_threshold,
            energy_measure: self.energy,
            cutoff,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,turntalk=info",
        1 => "info,turntalk=debug",
        2 => "debug",
        _ => "trace",
    };

    // Conversation output owns stdout
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    config.apply(cli.overrides());
    config.validate()?;
    tracing::debug!(?config, "loaded configuration");

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(&config, duration).await,
            Command::TestSpeaker => test_speaker().await,
            Command::Encode {
                input,
                output,
                rate,
            } => encode(&input, &output, rate),
        };
    }

    converse(config, cli.json).await
}

#[allow(clippy::future_not_send)]
async fn converse(config: Config, json: bool) -> anyhow::Result<()> {
    tracing::info!(endpoint = %config.endpoint, "starting turntalk");

    let capture = MicrophoneCapture::new(config.voice.sample_rate, config.voice.block_size)?;
    let player = SpeakerPlayer::new()?;
    let connector = WsConnector::new(config.endpoint.clone());

    let (mut session, mut events) =
        Session::new(config.session_config(), connector, capture, player);

    let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = shutdown_tx.send(()).await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for ctrl-c");
                // Keep the sender alive so the session is not stopped
                std::future::pending::<()>().await;
            }
        }
    });

    let printer = tokio::spawn(async move {
        let mut fatal = None;
        while let Some(event) = events.recv().await {
            print_event(&event, json);
            if let SessionEvent::Error { error } = event
                && is_fatal(&error)
            {
                fatal = Some(error);
            }
        }
        fatal
    });

    let result = session.run(&mut shutdown_rx).await;
    drop(session);

    let fatal = printer.await.context("event printer panicked")?;
    result?;

    if let Some(error) = fatal {
        anyhow::bail!("session ended: {error}");
    }

    Ok(())
}

const fn is_fatal(error: &SessionError) -> bool {
    matches!(
        error,
        SessionError::CaptureUnavailable(_)
            | SessionError::TransportClosed
            | SessionError::Transport(_)
    )
}

fn print_event(event: &SessionEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!(error = %e, "failed to serialize event"),
        }
        return;
    }

    match event {
        SessionEvent::ReadyToListen => println!("[listening]"),
        SessionEvent::UtteranceReady { duration_ms, .. } => {
            #[allow(clippy::cast_precision_loss)]
            let secs = *duration_ms as f64 / 1000.0;
            println!("[sent {secs:.1}s of speech]");
        }
        SessionEvent::TranscriptReceived { text } => println!("you:  {text}"),
        SessionEvent::ReplyReceived { text } => println!("peer: {text}"),
        SessionEvent::ResponseComplete { bytes } if *bytes > 0 => println!("[speaking]"),
        SessionEvent::ResponseComplete { .. } => {}
        SessionEvent::Error { error } => eprintln!("error: {error}"),
    }
}

#[allow(clippy::future_not_send)]
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let voice = &config.voice;
    let mut capture = MicrophoneCapture::new(voice.sample_rate, voice.block_size)?;
    let (analyzer, mut handoff) = handoff(
        voice.handoff_capacity,
        voice.energy_measure,
        voice.silence_threshold,
    );
    capture.arm(analyzer)?;

    println!(
        "Sample rate: {} Hz, {} channel(s)",
        capture.sample_rate(),
        capture.channels()
    );
    println!(
        "Threshold: {} ({:?})",
        voice.silence_threshold, voice.energy_measure
    );
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let mut blocks = 0_usize;
        let mut voiced = 0_usize;
        let mut energy = 0.0_f32;
        let mut peak_level = 0.0_f32;

        while let Some(event) = handoff.try_recv() {
            match event {
                CaptureEvent::Block(block) => {
                    blocks += 1;
                    if block.class.is_voiced() {
                        voiced += 1;
                    }
                    energy = energy.max(rms(&block.samples));
                    peak_level = peak_level.max(peak(&block.samples));
                }
                CaptureEvent::Fault(message) => println!("[{:2}s] fault: {message}", i + 1),
            }
        }

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | voiced {}/{} | [{}]",
            i + 1,
            energy,
            peak_level,
            voiced,
            blocks,
            meter
        );
    }

    capture.disarm();

    let dropped = handoff.take_dropped();
    if dropped > 0 {
        println!("\n{dropped} blocks dropped (queue full)");
    }

    println!("\n---");
    println!("If voiced blocks track your speech, the threshold is well set.");
    println!("Otherwise adjust --silence-threshold.");

    Ok(())
}

async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let mut player = SpeakerPlayer::new()?;

    let sample_rate = 24_000_u32;
    let frequency = 440.0_f32;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..sample_rate * 2)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);

    player.play_samples(samples, sample_rate).await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");

    Ok(())
}

fn encode(input: &std::path::Path, output: &std::path::Path, rate: u32) -> anyhow::Result<()> {
    let raw = std::fs::read(input).with_context(|| format!("failed to read {}", input.display()))?;

    if !raw.len().is_multiple_of(4) {
        anyhow::bail!(
            "{} is {} bytes, not a whole number of f32 samples",
            input.display(),
            raw.len()
        );
    }

    let samples: Vec<f32> = raw
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    let wav = encode_wav(&samples, rate)?;
    std::fs::write(output, wav.as_bytes())
        .with_context(|| format!("failed to write {}", output.display()))?;

    println!(
        "Wrote {} samples ({} ms at {} Hz) to {}",
        wav.sample_count(),
        wav.duration_ms(),
        rate,
        output.display()
    );

    Ok(())
}
