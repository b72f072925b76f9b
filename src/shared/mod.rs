pub mod global_context;
pub mod telemetry;

pub use global_context::GlobalConfig;
pub use telemetry::init_tracing;
