pub mod audio_format;
pub mod capture_result;
pub mod config;
pub mod device;
pub mod error;
pub mod state;
pub mod status;
