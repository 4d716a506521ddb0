//! Application layer orchestrating the payment core.
//!
//! [`gateway::PaymentGateway`] is the entry point the rest of the store calls.
//! It routes to provider adapters and runs the webhook path through the
//! verifier and the reconciler, serializing work per operation id.

pub mod gateway;
pub mod locks;
pub mod reconciler;
pub mod verifier;
