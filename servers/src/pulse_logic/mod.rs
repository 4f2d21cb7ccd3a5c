pub mod config;
pub mod console;
pub mod downstream;
pub mod logger;
pub mod pipeline;
pub mod state;
