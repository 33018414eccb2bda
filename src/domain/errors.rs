use thiserror::Error;

pub type Result<T> = std::result::Result<T, NarrationError>;

#[derive(Error, Debug)]
pub enum NarrationError {
    #[error("malformed break marker `{marker}` at byte {offset}: {reason}")]
    Parse {
        marker: String,
        offset: usize,
        reason: String,
    },
    #[error("script contains no speech or pauses")]
    EmptyScript,
    #[error("synthesis failed for segment {index} ({text:?}): {source}")]
    Synthesis {
        index: usize,
        text: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("post-processing step `{step}` failed: {source}")]
    PostProcessing {
        step: &'static str,
        #[source]
        source: Box<NarrationError>,
    },
    #[error("{0}")]
    Effect(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Audio processing error: {0}")]
    Audio(#[from] dasp_rs::AudioError),
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}
