// src/colloquy/mod.rs

pub mod client_wrapper;
pub mod clients;
pub mod config;
pub mod event;
pub mod history;
pub mod orchestrator;
pub mod relay;
pub mod server;
pub mod session;
pub mod sse;
pub mod transport;
pub mod turn;
