//! Application state shared by every handler.

use kawach_runtime::Engine;

/// Handler state: the engine handle.
///
/// Cloning is cheap; every clone shares the engine's locks, feed and stores.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Validator, coordinator and queries
    pub engine: Engine,
}

impl AppState {
    /// State serving `engine`
    #[must_use]
    pub const fn new(engine: Engine) -> Self {
        Self { engine }
    }
}
