//! Summarization for reeldigest.
//!
//! One capability interface, [`SummarizationBackend`], with a fixed set of
//! variants gathered in [`Summarizer`]. The variant is picked once from
//! configuration at startup; every failure surfaces as a summarize error no
//! matter which variant raised it.

pub mod agent;
pub mod backend;
pub mod local;
pub mod parse;
pub mod prompt;

pub use agent::{AgentKind, CliAgentBackend};
pub use backend::{SummarizationBackend, Summarizer, SummaryRequest};
pub use local::LocalModelBackend;
pub use parse::parse_summary;
pub use prompt::{InstructionTemplate, RenderedPrompt, render_prompt};
