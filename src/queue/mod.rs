//! Delayed dispatch queue, its consumer, and the per-message dispatch logic
//! (§4.5).

pub mod broker;
pub mod consumer;
pub mod dispatch;
pub mod message;

pub const DISPATCH_QUEUE: &str = "dispatch";
pub const DISPATCH_DLQ_QUEUE: &str = "dispatch-dlq";
