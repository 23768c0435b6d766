use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pibot_voice::daemon::{build_prompter, build_transcriber, shutdown_on_ctrl_c};
use pibot_voice::voice::{
    AudioSource, MicrophoneSource, RecognitionConfig, SegmentingRecognizer,
    Transcriber, recognize_frames, wav_to_frames,
};
use pibot_voice::{Config, Daemon, Error, Recording};

/// PiBot - voice turn-taking engine for a small robot
#[derive(Parser)]
#[command(name = "pibot", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Print prompts instead of speaking them
    #[arg(long, env = "PIBOT_NO_VOICE")]
    no_voice: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the engine until Ctrl-C (default)
    Run,
    /// Show microphone levels against the endpointing thresholds
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Speak a line through the configured TTS
    TestTts {
        /// Text to speak
        #[arg(default_value = "你好，我是机器人。")]
        text: String,
    },
    /// Wait for one wake phrase and print its command
    Listen,
    /// Record one command and print the recognized text
    Record,
    /// Transcribe a 16-bit mono WAV file
    Transcribe {
        /// Path to the WAV file
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,pibot_voice=info",
        1 => "info,pibot_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load_with_options(cli.no_voice)?;
    tracing::debug!(?config, "loaded configuration");

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_engine(config).await,
        Command::TestMic { duration } => test_mic(&config, duration).await,
        Command::TestTts { text } => test_tts(&config, &text).await,
        Command::Listen => listen(config).await,
        Command::Record => record(config).await,
        Command::Transcribe { path } => transcribe(&config, &path).await,
    }
}

async fn run_engine(config: Config) -> anyhow::Result<()> {
    let phrases: Vec<String> = config.wake_words.iter().map(|w| w.phrase.clone()).collect();
    let daemon = Daemon::new(config)?;

    tracing::info!(wake_words = ?phrases, "pibot ready");

    // Run until interrupted
    daemon.run().await?;

    Ok(())
}

/// Show per-second microphone levels
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    let engine = &config.engine;
    println!("Testing microphone for {duration} seconds...");
    println!(
        "Speech at or above {:.0}, silence below {:.0}\n",
        engine.speaking_threshold, engine.silence_threshold
    );

    let source = MicrophoneSource::new(engine.sample_rate, engine.frame_samples);
    let mut stream = source.open().await?;
    let cancel = shutdown_on_ctrl_c();

    for i in 0..duration {
        let deadline = Instant::now() + Duration::from_secs(1);
        let mut levels = Vec::new();
        while Instant::now() < deadline && !cancel.is_cancelled() {
            match stream.read_frame(engine.read_timeout).await {
                Ok(Some(frame)) => levels.push(frame.level()),
                Ok(None) => {}
                Err(e) => println!("read error: {e}"),
            }
        }
        if cancel.is_cancelled() {
            break;
        }

        #[allow(clippy::cast_precision_loss)]
        let mean = if levels.is_empty() {
            0.0
        } else {
            levels.iter().sum::<f32>() / levels.len() as f32
        };
        let peak = levels.iter().copied().fold(0.0_f32, f32::max);
        let verdict = if mean >= engine.speaking_threshold {
            "speech"
        } else if mean < engine.silence_threshold {
            "silence"
        } else {
            "ambiguous"
        };

        // Visual meter, full scale at twice the speech threshold
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (mean / (engine.speaking_threshold * 2.0) * 50.0).clamp(0.0, 50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] level: {mean:7.1} | peak: {peak:7.1} | [{meter}] {verdict}",
            i + 1
        );
    }

    stream.close().await;

    println!("\n---");
    println!("If speaking moved the level above the speech threshold, your mic is working!");
    println!("If the level stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: arecord -l (to list devices)");
    println!("  3. Try: alsamixer (to check capture levels)");

    Ok(())
}

/// Speak one line
async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");
    let prompter = build_prompter(config);
    prompter.speak(text).await?;
    println!("\n---");
    println!("If you heard the speech, TTS is working!");
    Ok(())
}

/// One wake wait
async fn listen(config: Config) -> anyhow::Result<()> {
    let daemon = Daemon::new(config)?;
    let cancel = shutdown_on_ctrl_c();

    println!("Listening for a wake phrase...");
    match daemon.controller().wait_for_wake(&cancel).await {
        Ok(Some(entry)) => println!("Heard \"{}\" -> {}", entry.phrase, entry.tag),
        Ok(None) => println!("No wake phrase detected"),
        Err(Error::Cancelled) => println!("Cancelled"),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// One command recording
async fn record(config: Config) -> anyhow::Result<()> {
    let sample_rate = config.engine.sample_rate;
    let daemon = Daemon::new(config)?;
    let cancel = shutdown_on_ctrl_c();

    println!("Speak your command...");
    match daemon
        .controller()
        .record_command(&cancel)
        .await
        .and_then(Recording::require_speech)
    {
        Ok(recording) => {
            println!(
                "Ended by {:?} after {:.1}s of audio",
                recording.end,
                recording.duration(sample_rate).as_secs_f32()
            );
            if recording.is_understood() {
                println!("You said: {}", recording.text);
            } else {
                println!("Nothing recognized");
            }
        }
        Err(Error::NoSpeechTimeout) => println!("No speech detected"),
        Err(Error::Cancelled) => println!("Cancelled"),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Transcribe a WAV file through a fresh session
async fn transcribe(config: &Config, path: &std::path::Path) -> anyhow::Result<()> {
    let file = std::fs::File::open(path)?;
    let (frames, sample_rate) =
        wav_to_frames(std::io::BufReader::new(file), config.engine.frame_samples)?;

    let transcriber: Arc<dyn Transcriber> = Arc::new(build_transcriber(config)?);
    let endpoint = pibot_voice::EngineConfig {
        sample_rate,
        ..config.engine.clone()
    }
    .endpoint_config();
    let recognizer = SegmentingRecognizer::new(transcriber, endpoint);
    let recognition = RecognitionConfig {
        sample_rate,
        ..config.engine.command_recognition()
    };

    let wait = config.engine.final_wait(&recognizer);
    match recognize_frames(&recognizer, &recognition, &frames, wait).await {
        Ok(text) => println!("{text}"),
        Err(Error::RecognitionEmpty) => println!("(no speech recognized)"),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}
