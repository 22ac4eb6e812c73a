// Library root: exposes every module so the CLI and the integration tests
// can drive a live-bidding session.

pub mod api;
pub mod auth;
pub mod config;
pub mod protocol;
pub mod session;
pub mod stream;
pub mod view;
