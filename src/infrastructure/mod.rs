pub mod audio;
pub mod effects;
pub mod synthesis;
