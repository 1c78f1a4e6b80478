pub mod audit_service;
pub mod config_service;
pub mod data_exchange_service;
pub mod image_policy;
pub mod image_service;
pub mod import_service;
pub mod menu_store;
pub mod rate_limiter;
pub mod tabular;

pub use audit_service::AuditService;
pub use config_service::{ConfigService, Settings};
pub use data_exchange_service::DataExchangeService;
pub use image_service::ImageService;
pub use import_service::ImportService;
pub use menu_store::{JsonMenuStore, MenuRepository};
pub use rate_limiter::RateLimiter;
