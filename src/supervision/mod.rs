//! Tiered approval gate for sensitive tool calls.
//!
//! [`gate::SupervisionService`] runs the rule → model → human pipeline;
//! [`bridge::ChannelBridge`] is the default in-process path to a reviewer.

pub mod bridge;
pub mod gate;
pub mod rules;
