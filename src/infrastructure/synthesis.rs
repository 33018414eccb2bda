use crate::domain::entities::Waveform;
use crate::infrastructure::audio::load_wav;
use anyhow::{Context, bail};
use log::{debug, warn};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([a-z_]+)\}").expect("placeholder pattern is valid"));

/// Turns one piece of text into audio. Implementations own whatever model or
/// process actually does the work.
pub trait Synthesizer {
    fn synthesize(&mut self, text: &str) -> anyhow::Result<Waveform>;
}

impl<F> Synthesizer for F
where
    F: FnMut(&str) -> anyhow::Result<Waveform>,
{
    fn synthesize(&mut self, text: &str) -> anyhow::Result<Waveform> {
        self(text)
    }
}

/// Knobs forwarded to the voice model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisOptions {
    /// Speaking rate multiplier. Default: 1.0
    pub speed: f32,
    /// Sampling variance; higher is more expressive. Default: 0.75
    pub temperature: f32,
    /// Penalty against repeated tokens. Default: 2.0
    pub repetition_penalty: f32,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            speed: 1.0,
            temperature: 0.75,
            repetition_penalty: 2.0,
        }
    }
}

/// Runs an external TTS program once per segment.
///
/// Each argument of the command template may contain the placeholders
/// `{text}`, `{speaker_wav}`, `{language}`, `{output}`, `{speed}`,
/// `{temperature}` and `{repetition_penalty}`. The program must write a WAV
/// file to `{output}`, which is a temporary file removed as soon as it has
/// been read back (or the call fails).
#[derive(Debug, Clone)]
pub struct CommandSynthesizer {
    command: Vec<String>,
    speaker_wav: PathBuf,
    language: String,
    options: SynthesisOptions,
    temp_dir: Option<PathBuf>,
}

impl CommandSynthesizer {
    pub fn new(
        command: Vec<String>,
        speaker_wav: impl Into<PathBuf>,
        language: impl Into<String>,
        options: SynthesisOptions,
    ) -> anyhow::Result<Self> {
        if command.is_empty() {
            bail!("synthesis command is empty");
        }
        let synthesizer = Self {
            command,
            speaker_wav: speaker_wav.into(),
            language: language.into(),
            options,
            temp_dir: None,
        };
        for name in synthesizer.unforwarded_options() {
            warn!(
                "synthesis option `{}` is set but the command has no `{{{}}}` placeholder; the model will not see it",
                name, name
            );
        }
        Ok(synthesizer)
    }

    /// Options changed from their defaults that no command argument forwards.
    pub fn unforwarded_options(&self) -> Vec<&'static str> {
        let defaults = SynthesisOptions::default();
        let changed = [
            ("speed", self.options.speed != defaults.speed),
            ("temperature", self.options.temperature != defaults.temperature),
            (
                "repetition_penalty",
                self.options.repetition_penalty != defaults.repetition_penalty,
            ),
        ];
        changed
            .into_iter()
            .filter(|&(name, changed)| {
                let placeholder = format!("{{{}}}", name);
                changed && !self.command.iter().any(|arg| arg.contains(&placeholder))
            })
            .map(|(name, _)| name)
            .collect()
    }

    /// Places per-segment temp files in `dir` instead of the system temp directory.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Fills every placeholder in one pass; substituted values are never rescanned.
    /// Unknown placeholders are left as written.
    fn render_arg(&self, template: &str, text: &str, output: &Path) -> String {
        PLACEHOLDER
            .replace_all(template, |caps: &Captures| match &caps[1] {
                "text" => text.to_string(),
                "speaker_wav" => self.speaker_wav.to_string_lossy().into_owned(),
                "language" => self.language.clone(),
                "output" => output.to_string_lossy().into_owned(),
                "speed" => self.options.speed.to_string(),
                "temperature" => self.options.temperature.to_string(),
                "repetition_penalty" => self.options.repetition_penalty.to_string(),
                _ => caps[0].to_string(),
            })
            .into_owned()
    }
}

impl Synthesizer for CommandSynthesizer {
    fn synthesize(&mut self, text: &str) -> anyhow::Result<Waveform> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("narrate-chunk-").suffix(".wav");
        let chunk = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .context("failed to create temporary chunk file")?;

        let program = &self.command[0];
        let args: Vec<String> = self.command[1..]
            .iter()
            .map(|arg| self.render_arg(arg, text, chunk.path()))
            .collect();

        debug!(
            "running `{}` -> {}",
            program,
            chunk.path().display()
        );
        let output = Command::new(program)
            .args(&args)
            .output()
            .with_context(|| format!("failed to launch `{}`", program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            let tail: Vec<&str> = tail.into_iter().rev().collect();
            bail!(
                "`{}` exited with {}: {}",
                program,
                output.status,
                tail.join(" | ")
            );
        }

        let waveform = load_wav(chunk.path())
            .with_context(|| format!("failed to read synthesized chunk from `{}`", program))?;
        chunk.close().context("failed to remove temporary chunk file")?;

        Ok(waveform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = SynthesisOptions::default();
        assert_eq!(opts.speed, 1.0);
        assert_eq!(opts.temperature, 0.75);
        assert_eq!(opts.repetition_penalty, 2.0);
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(CommandSynthesizer::new(vec![], "v.wav", "en", SynthesisOptions::default()).is_err());
    }

    #[test]
    fn test_render_arg_placeholders() {
        let synth = CommandSynthesizer::new(
            vec!["tts".into()],
            "brian.wav",
            "en",
            SynthesisOptions::default(),
        )
        .unwrap();
        let rendered = synth.render_arg(
            "{language}:{speaker_wav}:{output}:{speed}:{temperature}:{repetition_penalty}:{text}",
            "say {output}",
            Path::new("/tmp/x.wav"),
        );
        assert_eq!(rendered, "en:brian.wav:/tmp/x.wav:1:0.75:2:say {output}");
    }

    #[test]
    fn test_render_arg_does_not_rescan_values() {
        let synth = CommandSynthesizer::new(
            vec!["tts".into()],
            "/voices/{text}/brian.wav",
            "{output}",
            SynthesisOptions::default(),
        )
        .unwrap();
        let rendered = synth.render_arg(
            "{speaker_wav}|{language}|{unknown}|{text}",
            "prose",
            Path::new("/tmp/x.wav"),
        );
        assert_eq!(rendered, "/voices/{text}/brian.wav|{output}|{unknown}|prose");
    }

    #[test]
    fn test_unforwarded_options_detected() {
        let options = SynthesisOptions {
            speed: 0.9,
            temperature: 0.8,
            repetition_penalty: 2.0,
        };
        let synth = CommandSynthesizer::new(
            vec!["tts".into(), "--speed".into(), "{speed}".into()],
            "ref.wav",
            "en",
            options,
        )
        .unwrap();
        assert_eq!(synth.unforwarded_options(), vec!["temperature"]);
    }

    #[test]
    fn test_default_options_need_no_placeholders() {
        let synth = CommandSynthesizer::new(
            vec!["tts".into(), "{text}".into()],
            "ref.wav",
            "en",
            SynthesisOptions::default(),
        )
        .unwrap();
        assert!(synth.unforwarded_options().is_empty());
    }

    #[test]
    fn test_closure_is_a_synthesizer() {
        let mut synth = |text: &str| -> anyhow::Result<Waveform> {
            Ok(Waveform::new(vec![0.0; text.len()], 8000))
        };
        assert_eq!(synth.synthesize("abc").unwrap().len(), 3);
    }

    #[cfg(unix)]
    mod command {
        use super::*;
        use crate::infrastructure::audio::write_wav;

        #[test]
        fn test_command_output_is_loaded_and_cleaned_up() {
            let dir = tempfile::tempdir().unwrap();
            let fixture = dir.path().join("fixture.wav");
            write_wav(&fixture, &Waveform::new(vec![0.1; 800], 8000), 16).unwrap();
            let log = dir.path().join("paths.log");
            let said = dir.path().join("said.txt");

            let command = vec![
                "sh".to_string(),
                "-c".to_string(),
                "cp \"$1\" \"$2\" && echo \"$2\" > \"$3\" && printf %s \"$4\" > \"$5\"".to_string(),
                "sh".to_string(),
                fixture.to_string_lossy().into_owned(),
                "{output}".to_string(),
                log.to_string_lossy().into_owned(),
                "{text}".to_string(),
                said.to_string_lossy().into_owned(),
            ];
            let mut synth = CommandSynthesizer::new(command, "ref.wav", "en", SynthesisOptions::default())
                .unwrap()
                .with_temp_dir(dir.path());

            let wave = synth.synthesize("Hello there.").unwrap();
            assert_eq!(wave.len(), 800);
            assert_eq!(wave.sample_rate, 8000);
            assert_eq!(std::fs::read_to_string(&said).unwrap(), "Hello there.");

            let chunk_path = std::fs::read_to_string(&log).unwrap();
            assert!(!Path::new(chunk_path.trim()).exists());
        }

        #[test]
        fn test_failing_command_still_removes_temp_file() {
            let dir = tempfile::tempdir().unwrap();
            let log = dir.path().join("paths.log");
            let command = vec![
                "sh".to_string(),
                "-c".to_string(),
                "echo \"$1\" > \"$2\"; echo model exploded >&2; exit 3".to_string(),
                "sh".to_string(),
                "{output}".to_string(),
                log.to_string_lossy().into_owned(),
            ];
            let mut synth = CommandSynthesizer::new(command, "ref.wav", "en", SynthesisOptions::default())
                .unwrap()
                .with_temp_dir(dir.path());

            let err = synth.synthesize("Hello").unwrap_err();
            assert!(format!("{err:#}").contains("model exploded"));

            let chunk_path = std::fs::read_to_string(&log).unwrap();
            assert!(!Path::new(chunk_path.trim()).exists());
        }

        #[test]
        fn test_missing_program_is_an_error() {
            let mut synth = CommandSynthesizer::new(
                vec!["narrate-no-such-program-xyz".to_string()],
                "ref.wav",
                "en",
                SynthesisOptions::default(),
            )
            .unwrap();
            assert!(synth.synthesize("hi").is_err());
        }
    }
}
