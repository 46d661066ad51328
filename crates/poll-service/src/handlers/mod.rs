//! HTTP request handlers.

pub mod metrics;
pub mod polls;
pub mod presenters;

pub use metrics::metrics_handler;
pub use polls::list_polls;
pub use presenters::create_presenter;
