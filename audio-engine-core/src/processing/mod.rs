pub mod format_converter;
pub mod level_monitor;
pub mod wav_format;
