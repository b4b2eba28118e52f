// src/lib.rs
//! Receive-side core of the OCMFET acquisition client: UDP listeners, sample
//! decoding, rolling channel windows with zero-phase filtering, and the
//! controller that keeps them in step with the board.
pub mod client;
pub mod commands;
pub mod config;
pub mod drivers;
pub mod engine;
pub mod listeners;
pub mod types;
