pub mod app;
pub mod config;
pub mod core;
pub mod logging;
pub mod navigation;
pub mod session;
pub mod testing;

pub use pulse_api::ApiError;

pub type Result<T> = std::result::Result<T, ApiError>;

pub use crate::app::{Backend, PulseApp};
pub use crate::config::{FeedConfig, FieldMap, LoggingConfig, PulseConfig};
pub use crate::core::{Created, FeedEngine, FeedFactory, FeedSnapshot, FeedSpec, FeedStatus};
pub use crate::navigation::{AuthScreen, FeedScope, Route, Router};
pub use crate::session::{SessionMachine, SessionStatus};
