//! Ollama LLM integration module
//!
//! The reasoning backend used in production: a client for Ollama's
//! `/api/generate` endpoint with JSON mode and deterministic decoding.

pub mod client;

pub use client::{GenerateResponse, OllamaClient, StreamChunk, DEFAULT_MODEL, DEFAULT_OLLAMA_URL};
