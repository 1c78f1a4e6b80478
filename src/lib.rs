pub mod commands;
pub mod models;
pub mod services;
pub mod utils;

pub use commands::AdminApi;
pub use utils::{init_logger, AppError, LogConfig, Result};
