//! Chat model providers for Tern.

pub mod gemini;

pub use gemini::GeminiChat;
