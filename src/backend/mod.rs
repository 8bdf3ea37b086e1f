//! Everything to do with talking to a generation backend: picking one
//! (spec §4.2), calling its REST surface (spec §9, `assistant.py` HTTP
//! helpers), and relaying its WebSocket progress stream (spec §4.3).

pub mod client;
pub mod selector;
pub mod ws;

pub use client::BackendClient;
pub use selector::BackendSelector;
