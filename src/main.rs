use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use live_voice::api::ApiServer;
use live_voice::session::{Command as SessionCommand, Notice, SessionController, SessionObserver, SessionStatus};
use live_voice::transport::WsTransport;
use live_voice::voice::{
    AudioBuffer, CAPTURE_SAMPLE_RATE, CaptureDevice, CaptureHandle, CpalCapture, CpalPlayback,
    PLAYBACK_SAMPLE_RATE, PlaybackDevice, PlaybackScheduler, samples_to_wav,
};
use live_voice::Config;

/// Live voice - real-time voice assistant relay and client
#[derive(Parser)]
#[command(name = "live-voice", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/live-voice/config.toml)
    #[arg(short, long, env = "LIVE_VOICE_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Run the relay server (default)
    Serve,
    /// Start a voice conversation through the relay
    Talk,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Write the captured audio to a WAV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // .env is optional
    let _ = dotenvy::dotenv();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,live_voice=info",
        1 => "info,live_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let load_config = || match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(load_config()?).await,
        Command::Talk => talk(load_config()?).await,
        Command::TestMic { duration, output } => test_mic(duration, output).await,
        Command::TestSpeaker => test_speaker().await,
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    tracing::info!(
        addr = %config.server.socket_addr(),
        origins = ?config.server.allowed_origins,
        "starting live voice relay"
    );

    let server = ApiServer::new(config);
    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("shutting down"),
    }

    Ok(())
}

/// Prints session state for the terminal client
struct ConsoleObserver;

impl SessionObserver for ConsoleObserver {
    fn status_changed(&mut self, status: SessionStatus) {
        let hint = match status {
            SessionStatus::Idle => "press Enter to start, q to quit",
            SessionStatus::Connecting => "connecting...",
            SessionStatus::Listening => "listening, press Enter to stop",
            SessionStatus::Speaking => "assistant speaking",
        };
        println!("[{status}] {hint}");
    }

    fn notify(&mut self, notice: &Notice) {
        tracing::debug!(reason = notice.reason(), "session notice");
        eprintln!("! {}", notice.message());
    }
}

/// Voice conversation driven from the terminal
#[allow(clippy::future_not_send)]
async fn talk(config: Config) -> anyhow::Result<()> {
    let endpoint = config.endpoint();
    tracing::info!(relay = %endpoint.url, "starting voice client");

    let mut controller = SessionController::new(
        CpalCapture::new(),
        WsTransport::new(),
        CpalPlayback::new(),
        ConsoleObserver,
        endpoint,
    );

    let (commands, rx) = mpsc::unbounded_channel();
    let _ = commands.send(SessionCommand::Start);

    // Enter toggles the session; q or EOF quits by dropping the sender
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().eq_ignore_ascii_case("q") {
                break;
            }
            if commands.send(SessionCommand::Toggle).is_err() {
                break;
            }
        }
    });

    tokio::select! {
        () = controller.run(rx) => {}
        _ = tokio::signal::ctrl_c() => controller.stop(),
    }

    Ok(())
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64, output: Option<PathBuf>) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<f32>>();
    let mut capture = CpalCapture::new()
        .acquire(Box::new(move |frame| {
            let _ = tx.send(frame);
        }))
        .await?;

    println!("Sample rate: {CAPTURE_SAMPLE_RATE} Hz");
    println!("---");

    let mut recorded = Vec::new();
    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let mut samples = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            samples.extend(frame);
        }
        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
        recorded.extend(samples);
    }

    capture.release();

    if let Some(path) = output {
        let wav = samples_to_wav(&recorded, CAPTURE_SAMPLE_RATE)?;
        std::fs::write(&path, wav)?;
        println!("Wrote {} samples to {}", recorded.len(), path.display());
    }

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a scheduled sine wave
///
/// The tone is split into several buffers so gaps in scheduling are audible.
#[allow(clippy::future_not_send)]
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear an unbroken 440Hz tone for 2 seconds\n");

    let (ended_tx, mut ended_rx) = mpsc::unbounded_channel();
    let output = CpalPlayback::new().open(Arc::new(move |id| {
        let _ = ended_tx.send(id);
    }))?;
    let mut scheduler = PlaybackScheduler::new(output);

    let frequency = 440.0_f32;
    let chunk = PLAYBACK_SAMPLE_RATE as usize / 4;
    for n in 0..8 {
        #[allow(clippy::cast_precision_loss)]
        let samples: Vec<f32> = (n * chunk..(n + 1) * chunk)
            .map(|i| {
                let t = i as f32 / PLAYBACK_SAMPLE_RATE as f32;
                (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
            })
            .collect();
        scheduler.schedule(&AudioBuffer::mono(samples, PLAYBACK_SAMPLE_RATE));
    }

    println!("Scheduled {} buffers ending at {:.2}s", scheduler.in_flight(), scheduler.cursor());

    let wait = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(id) = ended_rx.recv().await {
            if scheduler.complete(id) {
                break;
            }
        }
    });
    if wait.await.is_err() {
        println!("Playback did not finish in time");
        scheduler.interrupt();
    }

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}
