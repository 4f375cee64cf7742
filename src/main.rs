use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use voxrelay::audio::wav::WavClip;
use voxrelay::cli::{Cli, Commands, ReplayEvent, load_config, replay};
use voxrelay::config::Config;
use voxrelay::llm::chat::MockChatModel;
use voxrelay::stt::transcriber::MockTranscriber;
use voxrelay::transport::TcpTransport;
use voxrelay::tts::synthesizer::MockSynthesizer;
use voxrelay::{RmsProbability, VoicePipeline};

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.default_log_filter())),
        )
        .init();

    let config = load_config(cli.config.as_deref())?;
    config.validate()?;

    match cli.command {
        Commands::Config { path } => {
            if path {
                let path = cli.config.clone().unwrap_or_else(Config::default_path);
                println!("{}", path.display());
            } else {
                print!("{}", toml::to_string_pretty(&config)?);
            }
        }
        Commands::Replay { wav, save_dir } => {
            let clip = WavClip::open(&wav)?;
            println!(
                "{}: {} ms at {} Hz",
                wav.display(),
                clip.duration_ms(),
                clip.sample_rate
            );
            for event in replay(&clip, &config, save_dir.as_deref())? {
                match event {
                    ReplayEvent::Onset { at_ms } => println!("{at_ms:>8} ms  onset"),
                    ReplayEvent::Utterance {
                        end_ms,
                        duration_ms,
                        saved,
                    } => match saved {
                        Some(path) => println!(
                            "{end_ms:>8} ms  utterance ({duration_ms} ms) -> {}",
                            path.display()
                        ),
                        None => println!("{end_ms:>8} ms  utterance ({duration_ms} ms)"),
                    },
                }
            }
        }
        Commands::Relay { wav, reply, bind } => {
            run_relay(config, &wav, &reply, bind)?;
        }
    }
    Ok(())
}

/// Plays a WAV file into the pipeline at the configured frame size, with
/// canned models, and serves the reply audio over TCP.
fn run_relay(
    mut config: Config,
    wav: &std::path::Path,
    reply: &str,
    bind: Option<String>,
) -> Result<()> {
    if let Some(bind) = bind {
        config.transport.bind_address = bind;
    }
    let clip = WavClip::open(wav)?;
    config.audio.sample_rate = clip.sample_rate;

    let transport = TcpTransport::bind(&config.transport.bind_address)?;
    eprintln!(
        "voxrelay: listening on {}",
        transport
            .local_addr()
            .context("listener has no local address")?
    );

    let mut handle = VoicePipeline::new(config.clone()).start(
        RmsProbability::new(config.detector.rms_speech_level),
        MockTranscriber::new("canned").with_response("(speech)"),
        MockChatModel::new(reply),
        MockSynthesizer::new(config.audio.frame_samples),
        Box::new(transport),
    )?;
    handle.push_audio(&clip.samples);
    handle.finish();

    let panicked = handle.wait();
    if panicked > 0 {
        anyhow::bail!("{panicked} pipeline thread(s) panicked");
    }
    Ok(())
}
