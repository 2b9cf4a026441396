pub mod device_selector;
pub mod engine;
mod shared;
mod tap;
