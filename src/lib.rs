//! # Conductor
//!
//! Multi-agent orchestration over an OpenAI-compatible LLM backend.
//!
//! This library provides:
//! - An agent task loop with tools and hand-offs between agents
//! - Streaming execution with per-token callbacks
//! - A fixed orchestration pipeline (triage, research, report) with
//!   heartbeats and a timeout
//! - An HTTP API serving JSON and server-sent events
//!
//! ## Architecture
//!
//! A query flows through the pipeline like this:
//! 1. The triage agent classifies the query
//! 2. The research agent gathers facts with its tools
//! 3. The report agent writes the final answer
//!
//! Simple questions skip straight to the delegation agent, which may hand
//! off to either specialist.
//!
//! ## Example
//!
//! ```rust,ignore
//! use conductor::{agents::BuiltinAgents, llm::OpenAiClient, orchestrator::*};
//!
//! let llm = Arc::new(OpenAiClient::new(api_key, "https://api.openai.com/v1"));
//! let orchestrator = Orchestrator::new(BuiltinAgents::new(llm, "gpt-4o")?, Default::default());
//! let result = orchestrator.handle_query("What changed in Rust 1.80?", RunConfig::default()).await;
//! ```

pub mod agent;
pub mod agents;
pub mod api;
pub mod config;
pub mod llm;
pub mod memory;
pub mod orchestrator;
pub mod tools;

pub use config::Config;
