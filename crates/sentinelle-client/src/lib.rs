pub mod analysis;
pub mod collector;
pub mod config;
mod http;
pub mod notify;

pub use analysis::HttpAnalysisProvider;
pub use collector::HttpCollector;
pub use config::ServiceConfig;
pub use notify::{HttpNotificationSink, Notifier, TracingNotificationSink};
