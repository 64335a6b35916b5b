//! The agent loop: the part of lexstream that decides what happens next.
//!
//! For each user message the loop:
//!
//! 1. **Persists** the user turn
//! 2. **Completes** the conversation so far, streaming text to the client
//! 3. **If tool calls**: runs them concurrently, persists the results in
//!    call order, and goes back to step 2
//! 4. **Otherwise**: persists the answer and ends the stream
//!
//! Every run ends with exactly one [`StreamEvent::End`], whether it
//! answered, failed, or hit the round limit.

pub mod loop_runner;
pub mod prompt;
pub mod stream_event;

pub use loop_runner::{AgentLoop, AgentRun, RunSummary};
pub use prompt::LEGAL_RESEARCH_PROMPT;
pub use stream_event::StreamEvent;
