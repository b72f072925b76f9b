use tracing::warn;

use crate::shared::global_context::GlobalConfig;

/// Installs the fmt subscriber at the configured level. The library never
/// calls this itself; binaries and demos do. Returns false when a global
/// subscriber was already set.
pub fn init_tracing(config: &GlobalConfig) -> bool {
    let level = config.level().unwrap_or(tracing::Level::INFO);
    let installed = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init()
        .is_ok();

    if installed && config.level().is_err() {
        warn!("Unknown log level '{}', using info", config.log_level);
    }
    installed
}
