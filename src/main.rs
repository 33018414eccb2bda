mod config;
mod domain;
mod infrastructure;
mod pipeline;
mod preprocessing;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use config::NarrationConfig;
use domain::entities::{Script, Waveform};
use env_logger::{Builder, Env};
use indicatif::{ProgressBar, ProgressStyle};
use infrastructure::audio::{load_wav, write_wav};
use infrastructure::synthesis::{CommandSynthesizer, Synthesizer};
use log::{error, info, warn};
use pipeline::assembler::Assembler;
use preprocessing::segmenter::parse_script;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "narrate")]
#[command(about = "Narrate a break-annotated script with a cloned voice")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synthesize a script into a single WAV file
    Render {
        /// Script containing prose and <break time="X" /> markers
        script: PathBuf,

        /// Output WAV file path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Reference recording of the voice to clone
        #[arg(long)]
        speaker_wav: Option<PathBuf>,

        /// Language code passed to the voice model
        #[arg(long)]
        language: Option<String>,

        /// Skip post-processing
        #[arg(long)]
        raw: bool,

        /// Write whatever was assembled here if synthesis fails midway
        #[arg(long)]
        save_partial: Option<PathBuf>,
    },

    /// Print the parsed script as JSON
    Parse {
        script: PathBuf,
    },

    /// Run only the post-processing chain on an existing WAV
    Polish {
        input: PathBuf,

        /// Output WAV file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn init_logger() {
    let env = Env::default().filter_or("RUST_LOG", "narrate=info");
    Builder::from_env(env)
        .format(|buf, record| writeln!(buf, "[{}] {}", record.level(), record.args()))
        .target(env_logger::Target::Stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<NarrationConfig> {
    match path {
        Some(path) => NarrationConfig::load(path)
            .with_context(|| format!("failed to load config '{}'", path.display())),
        None => Ok(NarrationConfig::default()),
    }
}

fn read_script(path: &Path) -> Result<Script> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read script '{}'", path.display()))?;
    let script = parse_script(&text)
        .with_context(|| format!("failed to parse script '{}'", path.display()))?;
    Ok(script)
}

fn render(
    mut config: NarrationConfig,
    script_path: &Path,
    output: Option<PathBuf>,
    speaker_wav: Option<PathBuf>,
    language: Option<String>,
    raw: bool,
    save_partial: Option<PathBuf>,
) -> Result<()> {
    if let Some(path) = output {
        config.output.path = path;
    }
    if let Some(path) = speaker_wav {
        config.synthesis.speaker_wav = path;
    }
    if let Some(language) = language {
        config.synthesis.language = language;
    }
    config.validate()?;

    if !config.synthesis.speaker_wav.exists() {
        bail!(
            "reference voice '{}' not found",
            config.synthesis.speaker_wav.display()
        );
    }

    let script = read_script(script_path)?;
    info!(
        "Parsed {} segments ({} speech, {:.2}s of pauses)",
        script.len(),
        script.speech_count(),
        script.total_pause_seconds()
    );

    let synthesis = &config.synthesis;
    let mut synthesizer = CommandSynthesizer::new(
        synthesis.command.clone(),
        &synthesis.speaker_wav,
        &synthesis.language,
        synthesis.options.clone(),
    )?;
    if let Some(dir) = &synthesis.temp_dir {
        synthesizer = synthesizer.with_temp_dir(dir);
    }

    let pb = ProgressBar::new(script.speech_count() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("#>-"),
    );
    pb.set_message("Generating speech");

    let timeline = narrate(
        &mut synthesizer,
        &config,
        &script,
        raw,
        save_partial.as_deref(),
        pb,
    )?;

    write_wav(&config.output.path, &timeline, config.output.bits_per_sample)?;
    info!(
        "Success! Saved {:.2}s of audio to {}",
        timeline.duration_secs(),
        config.output.path.display()
    );
    Ok(())
}

/// Assembles `script` and runs the post-processing chain unless `raw`.
///
/// If synthesis fails and `save_partial` is set, the audio assembled so far is
/// written there. The synthesis error is returned even when that write fails.
fn narrate<S: Synthesizer + ?Sized>(
    synthesizer: &mut S,
    config: &NarrationConfig,
    script: &Script,
    raw: bool,
    save_partial: Option<&Path>,
    pb: ProgressBar,
) -> Result<Waveform> {
    let sample_rate = config.timeline.sample_rate;
    let mut timeline = Waveform::empty(sample_rate);
    let assembled = Assembler::new(synthesizer, sample_rate)
        .with_progress(pb.clone())
        .assemble_into(script, &mut timeline);

    if let Err(err) = assembled {
        pb.abandon_with_message("Generation failed");
        if let Some(path) = save_partial {
            match write_wav(path, &timeline, config.output.bits_per_sample) {
                Ok(()) => warn!(
                    "Saved {:.2}s of partial audio to {}",
                    timeline.duration_secs(),
                    path.display()
                ),
                Err(write_err) => error!(
                    "Could not save partial audio to {}: {}",
                    path.display(),
                    write_err
                ),
            }
        }
        return Err(err.into());
    }
    pb.finish_with_message("Generation completed!");

    if !raw {
        let chain = config.post_processing.build_chain();
        if !chain.is_empty() {
            info!("Post-processing: {}", chain.names().join(" -> "));
            timeline = chain.apply(timeline)?;
        }
    }

    Ok(timeline)
}

fn polish(config: NarrationConfig, input: &Path, output: Option<PathBuf>) -> Result<()> {
    let output = output.unwrap_or(config.output.path);
    let voice = load_wav(input).with_context(|| format!("failed to load '{}'", input.display()))?;
    info!(
        "Loaded {:.2}s at {} Hz from {}",
        voice.duration_secs(),
        voice.sample_rate,
        input.display()
    );

    let chain = config.post_processing.build_chain();
    let polished = chain.apply(voice)?;

    write_wav(&output, &polished, config.output.bits_per_sample)?;
    info!("Saved {}", output.display());
    Ok(())
}

fn main() -> Result<()> {
    init_logger();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Render {
            script,
            output,
            speaker_wav,
            language,
            raw,
            save_partial,
        } => render(config, &script, output, speaker_wav, language, raw, save_partial)?,

        Commands::Parse { script } => {
            let script = read_script(&script)?;
            info!(
                "{} segments, {:.2}s of pauses",
                script.len(),
                script.total_pause_seconds()
            );
            println!("{}", serde_json::to_string_pretty(script.segments())?);
        }

        Commands::Polish { input, output } => polish(config, &input, output)?,
    }

    Ok(())
}
