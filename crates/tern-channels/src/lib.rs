//! Outbound messaging transports for Tern.

pub mod slack;

pub use slack::SlackTransport;
