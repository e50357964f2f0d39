pub mod cancel;
pub mod credentials;
pub mod executor;
pub mod listener;
pub mod logger;
pub mod ui;
