//! Infrastructure implementations for Cascade.
//!
//! Concrete providers behind the core `Provider` trait. Currently one
//! backend: an OpenAI-compatible chat-completions client that serves
//! OpenAI, Google Gemini, Mistral, and local OpenAI-compatible servers
//! from one codebase via configurable base URLs.

pub mod llm;
