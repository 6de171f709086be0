//! Shared runtime state for admgr-daemon.
//!
//! The dependency record is built once at startup and handed to every
//! handler via `State<Arc<AppState>>` — there are no process-wide
//! singletons. The coordinator itself is stateless; all shared state is the
//! database behind it.

use admgr_core::SlotService;

/// Static build metadata included in the health response.
#[derive(Clone, Debug)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

/// Cloneable (Arc) handle shared across all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: SlotService,
    pub build: BuildInfo,
}

impl AppState {
    pub fn new(service: SlotService) -> Self {
        Self {
            service,
            build: BuildInfo {
                service: "admgr-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
        }
    }
}
