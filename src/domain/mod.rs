//! Domain layer: the canonical payment model and the ports adapters plug into.

pub mod amount;
pub mod operation;
pub mod ports;
pub mod webhook;
