//! `fl-gateway`: admin HTTP surface and CLI around the channel
//! supervisor.

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod display;
pub mod state;
