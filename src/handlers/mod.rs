mod gateway;
mod health;

pub use gateway::{SUPPORTED_METHODS, is_supported_method, proxy};
pub use health::health_check;
