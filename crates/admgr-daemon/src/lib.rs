//! admgr-daemon library surface.
//!
//! `main.rs` stays thin; the router and handlers live in [`routes`], shared
//! state in [`state`], and response shapes in [`api_types`]. Everything is
//! public so the scenario tests in `tests/` can compose the router without
//! binding a socket.

pub mod api_types;
pub mod routes;
pub mod state;
