//! The agent round loop.
//!
//! One call to [`AgentLoop::run`] answers one user message. Each round asks
//! the model for its next step; if the step requests tools, they run
//! concurrently, their results are appended in declaration order, and the
//! next round sees them. The loop ends on the first answer with no tool
//! calls, on a completion failure, or at the round limit. Either way the
//! event stream ends with exactly one [`StreamEvent::End`].

use crate::stream_event::StreamEvent;
use futures::future::join_all;
use lexstream_config::AppConfig;
use lexstream_core::error::{Error, ProviderError, Result, ToolError};
use lexstream_core::history::HistoryStore;
use lexstream_core::message::{ConversationId, Message, MessageToolCall};
use lexstream_core::provider::ToolDefinition;
use lexstream_core::tool::{ToolCall, ToolRegistry, ToolResult};
use lexstream_providers::{CompletionClient, CompletionEvent};
use lexstream_tools::SEARCH_TOOL_NAME;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Bounded so a slow client applies backpressure to the model stream.
const EVENT_BUFFER: usize = 64;

/// What a finished run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Completion rounds issued.
    pub rounds: u32,
    /// Tool calls executed across all rounds.
    pub tool_calls: usize,
}

/// A run in progress.
pub struct AgentRun {
    /// Live events, in production order. Closes after [`StreamEvent::End`].
    pub events: mpsc::Receiver<StreamEvent>,
    /// Resolves once the run has stopped and its turns are persisted.
    pub outcome: JoinHandle<Result<RunSummary>>,
}

/// The agent loop controller. Cheap to clone; every collaborator is shared.
#[derive(Clone)]
pub struct AgentLoop {
    client: Arc<CompletionClient>,
    tools: Arc<ToolRegistry>,
    history: Arc<dyn HistoryStore>,
    system_prompt: Arc<str>,
    max_rounds: u32,
    tool_timeout: Duration,
}

impl AgentLoop {
    pub fn new(
        client: Arc<CompletionClient>,
        tools: Arc<ToolRegistry>,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        Self {
            client,
            tools,
            history,
            system_prompt: Arc::from(crate::prompt::LEGAL_RESEARCH_PROMPT),
            max_rounds: 8,
            tool_timeout: Duration::from_secs(30),
        }
    }

    /// Build a loop with the limits and prompt from `config`.
    pub fn from_config(
        config: &AppConfig,
        client: Arc<CompletionClient>,
        tools: Arc<ToolRegistry>,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        let mut agent = Self::new(client, tools, history)
            .with_max_rounds(config.agent.max_rounds)
            .with_tool_timeout(Duration::from_secs(config.agent.tool_timeout_secs));
        if let Some(prompt) = &config.agent.system_prompt_override {
            agent = agent.with_system_prompt(prompt.clone());
        }
        agent
    }

    /// Set the maximum number of completion rounds per user message.
    pub fn with_max_rounds(mut self, max: u32) -> Self {
        self.max_rounds = max.max(1);
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Arc::from(prompt.into());
        self
    }

    pub fn history(&self) -> &Arc<dyn HistoryStore> {
        &self.history
    }

    pub fn max_rounds(&self) -> u32 {
        self.max_rounds
    }

    /// Answer `user_text` within `conversation_id`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn run(&self, conversation_id: ConversationId, user_text: impl Into<String>) -> AgentRun {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let agent = self.clone();
        let user_text = user_text.into();

        let outcome = tokio::spawn(async move {
            let started = Instant::now();
            let mut emitter = Emitter::new(tx);
            info!(conversation_id = %conversation_id, "Agent run started");

            let result = agent.drive(&conversation_id, user_text, &mut emitter).await;
            let duration_ms = started.elapsed().as_millis() as u64;
            match &result {
                Ok(summary) => info!(
                    conversation_id = %conversation_id,
                    rounds = summary.rounds,
                    tool_calls = summary.tool_calls,
                    duration_ms,
                    "Agent run completed"
                ),
                Err(Error::ClientDisconnected) => {
                    info!(conversation_id = %conversation_id, duration_ms, "Client went away, run stopped")
                }
                Err(e @ Error::RoundLimitExceeded { .. }) => {
                    warn!(conversation_id = %conversation_id, error = %e, duration_ms, "Agent run cut off")
                }
                Err(e) => error!(conversation_id = %conversation_id, error = %e, duration_ms, "Agent run failed"),
            }

            emitter.emit(StreamEvent::End).await;
            result
        });

        AgentRun { events: rx, outcome }
    }

    async fn drive(
        &self,
        id: &ConversationId,
        user_text: String,
        emitter: &mut Emitter,
    ) -> Result<RunSummary> {
        self.history.append(id, vec![Message::user(user_text)]).await?;

        let definitions = self.tools.definitions();
        let mut summary = RunSummary::default();

        loop {
            if emitter.is_closed() {
                return Err(Error::ClientDisconnected);
            }
            if summary.rounds >= self.max_rounds {
                return Err(Error::RoundLimitExceeded {
                    limit: self.max_rounds,
                });
            }
            summary.rounds += 1;

            let turns = self.history.load(id).await?;
            debug!(conversation_id = %id, round = summary.rounds, turns = turns.len(), "Starting round");

            let Some(assistant) = self.complete(&turns, definitions.clone(), emitter).await? else {
                // Nothing partial is persisted.
                return Err(Error::ClientDisconnected);
            };

            if !assistant.has_tool_calls() {
                self.history.append(id, vec![assistant]).await?;
                return Ok(summary);
            }

            let calls = assistant.tool_calls.clone();
            self.history.append(id, vec![assistant]).await?;
            summary.tool_calls += calls.len();
            self.run_tools(id, &calls, emitter).await?;
        }
    }

    /// Stream one completion, forwarding text as it arrives.
    ///
    /// `Ok(None)` means the client disconnected and the completion was abandoned.
    async fn complete(
        &self,
        turns: &[Message],
        tools: Vec<ToolDefinition>,
        emitter: &mut Emitter,
    ) -> Result<Option<Message>> {
        let mut stream = self.client.complete(&self.system_prompt, turns, tools);

        while let Some(event) = stream.recv().await {
            match event? {
                CompletionEvent::Delta(content) => {
                    if !emitter.emit(StreamEvent::Content { content }).await {
                        return Ok(None);
                    }
                }
                CompletionEvent::Final(message) => return Ok(Some(message)),
            }
        }

        Err(ProviderError::StreamInterrupted("completion ended without a final turn".into()).into())
    }

    /// Execute one round of tool calls and persist their results.
    async fn run_tools(
        &self,
        id: &ConversationId,
        calls: &[MessageToolCall],
        emitter: &mut Emitter,
    ) -> Result<()> {
        for call in calls.iter().filter(|c| c.name == SEARCH_TOOL_NAME) {
            emitter
                .emit(StreamEvent::SearchStart {
                    query: search_query(call),
                })
                .await;
        }

        let outcomes = join_all(calls.iter().map(|call| self.execute(call))).await;

        let mut results = Vec::with_capacity(calls.len());
        let mut url_lists = Vec::new();
        for (call, outcome) in calls.iter().zip(outcomes) {
            let content = match outcome {
                Ok(result) => {
                    if call.name == SEARCH_TOOL_NAME {
                        url_lists.extend(result_urls(&result));
                    }
                    result.output
                }
                Err(e) => {
                    warn!(conversation_id = %id, tool = %call.name, call_id = %call.id, error = %e, "Tool call failed");
                    format!("Error: {e}")
                }
            };
            results.push(Message::tool_result(&call.id, &call.name, content));
        }

        self.history.append(id, results).await?;

        for urls in url_lists {
            emitter.emit(StreamEvent::SearchResults { urls }).await;
        }
        Ok(())
    }

    async fn execute(&self, call: &MessageToolCall) -> std::result::Result<ToolResult, ToolError> {
        let arguments = call
            .parsed_arguments()
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        let request = ToolCall {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments,
        };

        let started = Instant::now();
        let result = tokio::time::timeout(self.tool_timeout, self.tools.execute(&request))
            .await
            .map_err(|_| ToolError::Timeout {
                tool_name: call.name.clone(),
                timeout_secs: self.tool_timeout.as_secs(),
            })?;
        debug!(
            tool = %call.name,
            call_id = %call.id,
            duration_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "Tool call finished"
        );
        result
    }
}

/// The query a search call asked for, or an empty string.
fn search_query(call: &MessageToolCall) -> String {
    call.parsed_arguments()
        .ok()
        .and_then(|args| args.get("query").and_then(|q| q.as_str()).map(str::to_string))
        .unwrap_or_default()
}

/// URLs of a search result, when its structured output is a list.
///
/// Anything else (an object, a bare string, no data) yields `None` and no
/// results event is sent for it.
fn result_urls(result: &ToolResult) -> Option<Vec<String>> {
    let items = result.data.as_ref()?.as_array()?;
    Some(
        items
            .iter()
            .filter_map(|item| item.get("url").and_then(|u| u.as_str()).map(str::to_string))
            .collect(),
    )
}

/// Sending side of the event stream. Remembers when the client has gone.
struct Emitter {
    tx: mpsc::Sender<StreamEvent>,
    closed: bool,
}

impl Emitter {
    fn new(tx: mpsc::Sender<StreamEvent>) -> Self {
        Self { tx, closed: false }
    }

    /// Returns `false` once the receiver has been dropped.
    async fn emit(&mut self, event: StreamEvent) -> bool {
        if self.closed {
            return false;
        }
        if self.tx.send(event).await.is_err() {
            self.closed = true;
        }
        !self.closed
    }

    fn is_closed(&self) -> bool {
        self.closed || self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lexstream_core::Role;
    use lexstream_core::provider::{ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk};
    use lexstream_core::tool::Tool;
    use lexstream_history::InMemoryHistory;
    use lexstream_providers::CompletionSettings;
    use lexstream_tools::{SearchBackend, SearchHit, registry_with_backend};
    use std::sync::Mutex;

    // --- Scripted collaborators ---

    /// Replays scripted assistant turns, streaming text word by word.
    struct ScriptedProvider {
        script: Mutex<Vec<std::result::Result<Message, ProviderError>>>,
        requests: Mutex<Vec<ProviderRequest>>,
        chunk_pause: Duration,
    }

    impl ScriptedProvider {
        fn new(script: Vec<std::result::Result<Message, ProviderError>>) -> Self {
            Self {
                script: Mutex::new(script.into_iter().rev().collect()),
                requests: Mutex::new(Vec::new()),
                chunk_pause: Duration::ZERO,
            }
        }

        fn with_chunk_pause(mut self, pause: Duration) -> Self {
            self.chunk_pause = pause;
            self
        }

        fn requests(&self) -> Vec<ProviderRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _request: ProviderRequest) -> std::result::Result<ProviderResponse, ProviderError> {
            unreachable!("the agent loop always streams")
        }

        async fn stream(&self, request: ProviderRequest) -> std::result::Result<ChunkReceiver, ProviderError> {
            self.requests.lock().unwrap().push(request);
            let next = self.script.lock().unwrap().pop().unwrap_or_else(|| {
                Err(ProviderError::ApiError {
                    status_code: 500,
                    message: "script exhausted".into(),
                })
            });
            let message = next?;
            let pause = self.chunk_pause;

            let (tx, rx) = mpsc::channel(4);
            tokio::spawn(async move {
                for word in message.content.split_inclusive(' ') {
                    tokio::time::sleep(pause).await;
                    let chunk = StreamChunk {
                        content: Some(word.to_string()),
                        ..StreamChunk::default()
                    };
                    if tx.send(Ok(chunk)).await.is_err() {
                        return;
                    }
                }
                let _ = tx
                    .send(Ok(StreamChunk {
                        tool_calls: message.tool_calls,
                        done: true,
                        ..StreamChunk::default()
                    }))
                    .await;
            });
            Ok(rx)
        }
    }

    /// Search backend whose latency is read from the query ("slow:30 ...").
    struct StubSearch {
        urls_per_query: usize,
        fail: bool,
    }

    #[async_trait]
    impl SearchBackend for StubSearch {
        async fn search(&self, query: &str, max_results: usize) -> std::result::Result<Vec<SearchHit>, ToolError> {
            if let Some(ms) = query
                .strip_prefix("slow:")
                .and_then(|rest| rest.split_whitespace().next())
                .and_then(|n| n.parse::<u64>().ok())
            {
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            if self.fail {
                return Err(ToolError::ExecutionFailed {
                    tool_name: SEARCH_TOOL_NAME.into(),
                    reason: "upstream 502".into(),
                });
            }
            let slug = query.replace(' ', "-");
            Ok((1..=self.urls_per_query.min(max_results))
                .map(|i| SearchHit {
                    title: format!("{query} {i}"),
                    url: format!("https://law.example.com/{slug}/{i}"),
                    content: "excerpt".into(),
                    score: None,
                })
                .collect())
        }

        fn name(&self) -> &str {
            "stub"
        }
    }

    /// A second tool whose output is a list, to check only search emits results.
    struct ListTool;

    #[async_trait]
    impl Tool for ListTool {
        fn name(&self) -> &str {
            "list_sources"
        }
        fn description(&self) -> &str {
            "Lists sources"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(&self, _arguments: serde_json::Value) -> std::result::Result<ToolResult, ToolError> {
            let data = serde_json::json!([{"url": "https://not-a-search.example"}]);
            Ok(ToolResult {
                call_id: String::new(),
                success: true,
                output: data.to_string(),
                data: Some(data),
            })
        }
    }

    fn search_call(id: &str, query: &str) -> MessageToolCall {
        MessageToolCall {
            id: id.into(),
            name: SEARCH_TOOL_NAME.into(),
            arguments: serde_json::json!({ "query": query }).to_string(),
        }
    }

    fn tool_turn(text: &str, calls: Vec<MessageToolCall>) -> std::result::Result<Message, ProviderError> {
        Ok(Message::assistant_with_tools(text, calls))
    }

    fn answer(text: &str) -> std::result::Result<Message, ProviderError> {
        Ok(Message::assistant(text))
    }

    struct Harness {
        agent: AgentLoop,
        provider: Arc<ScriptedProvider>,
        history: Arc<InMemoryHistory>,
    }

    fn harness_with(provider: ScriptedProvider, registry: ToolRegistry) -> Harness {
        let provider = Arc::new(provider);
        let history = Arc::new(InMemoryHistory::new());
        let client = Arc::new(CompletionClient::new(provider.clone(), CompletionSettings::default()));
        let agent = AgentLoop::new(client, Arc::new(registry), history.clone());
        Harness { agent, provider, history }
    }

    fn harness(provider: ScriptedProvider) -> Harness {
        let registry = registry_with_backend(
            Arc::new(StubSearch {
                urls_per_query: 3,
                fail: false,
            }),
            4,
        );
        harness_with(provider, registry)
    }

    async fn collect(run: AgentRun) -> (Vec<StreamEvent>, Result<RunSummary>) {
        let AgentRun { mut events, outcome } = run;
        let mut out = Vec::new();
        while let Some(ev) = events.recv().await {
            out.push(ev);
        }
        (out, outcome.await.unwrap())
    }

    fn kinds(events: &[StreamEvent]) -> Vec<&'static str> {
        let mut kinds: Vec<&'static str> = events.iter().map(StreamEvent::kind).collect();
        kinds.dedup_by(|a, b| *a == "content" && *b == "content");
        kinds
    }

    fn text_of(events: &[StreamEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Content { content } => Some(content.as_str()),
                _ => None,
            })
            .collect()
    }

    // --- Tests ---

    #[tokio::test]
    async fn direct_answer_streams_and_persists() {
        let h = harness(ScriptedProvider::new(vec![answer(
            "Four years under Code of Civil Procedure 337.",
        )]));
        let id = ConversationId::from("c1");

        let (events, outcome) = collect(h.agent.run(id.clone(), "What is the SOL for written contracts?")).await;

        assert_eq!(kinds(&events), vec!["content", "end"]);
        assert!(events.iter().filter(|e| e.kind() == "content").count() > 1);
        assert_eq!(text_of(&events), "Four years under Code of Civil Procedure 337.");
        assert_eq!(outcome.unwrap(), RunSummary { rounds: 1, tool_calls: 0 });

        let turns = h.history.load(&id).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[1].role, Role::Assistant);
        assert_eq!(turns[1].content, "Four years under Code of Civil Procedure 337.");
    }

    #[tokio::test]
    async fn system_prompt_leads_every_request_and_is_not_stored() {
        let h = harness(ScriptedProvider::new(vec![answer("ok")]));
        let agent = h.agent.clone().with_system_prompt("Custom rules.");
        let id = ConversationId::from("c1");
        collect(agent.run(id.clone(), "hi")).await.1.unwrap();

        let request = &h.provider.requests()[0];
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(request.messages[0].content, "Custom rules.");
        assert_eq!(request.tools[0].name, SEARCH_TOOL_NAME);
        assert!(h.history.load(&id).await.unwrap().iter().all(|t| t.role != Role::System));
    }

    #[tokio::test]
    async fn search_round_emits_start_then_results() {
        let h = harness(ScriptedProvider::new(vec![
            tool_turn("Let me check. ", vec![search_call("call_1", "California breach of contract SOL 2023")]),
            answer("It is four years for written contracts."),
        ]));
        let id = ConversationId::from("c1");

        let (events, outcome) = collect(h.agent.run(id.clone(), "And oral contracts?")).await;

        assert_eq!(
            kinds(&events),
            vec!["content", "search_start", "search_results", "content", "end"]
        );
        let start = events.iter().find(|e| e.kind() == "search_start").unwrap();
        assert_eq!(
            start,
            &StreamEvent::SearchStart {
                query: "California breach of contract SOL 2023".into()
            }
        );
        match events.iter().find(|e| e.kind() == "search_results").unwrap() {
            StreamEvent::SearchResults { urls } => assert_eq!(urls.len(), 3),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(outcome.unwrap(), RunSummary { rounds: 2, tool_calls: 1 });

        let turns = h.history.load(&id).await.unwrap();
        let roles: Vec<Role> = turns.iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
        assert_eq!(turns[2].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(turns[2].name.as_deref(), Some(SEARCH_TOOL_NAME));

        // The second completion saw the tool result.
        let second = &h.provider.requests()[1];
        assert_eq!(second.messages.last().unwrap().role, Role::Tool);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_results_are_appended_in_declaration_order() {
        let h = harness(ScriptedProvider::new(vec![
            tool_turn(
                "",
                vec![
                    search_call("call_a", "slow:30 negligence"),
                    search_call("call_b", "slow:10 duty of care"),
                    search_call("call_c", "slow:20 causation"),
                ],
            ),
            answer("Summary."),
        ]));
        let id = ConversationId::from("c1");

        let (events, outcome) = collect(h.agent.run(id.clone(), "Elements of negligence?")).await;
        assert_eq!(outcome.unwrap().tool_calls, 3);

        let queries: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::SearchStart { query } => Some(query.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(queries, vec!["slow:30 negligence", "slow:10 duty of care", "slow:20 causation"]);

        let first_urls: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::SearchResults { urls } => Some(urls[0].as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(first_urls.len(), 3);
        assert!(first_urls[0].contains("negligence"));
        assert!(first_urls[1].contains("duty-of-care"));
        assert!(first_urls[2].contains("causation"));

        let turns = h.history.load(&id).await.unwrap();
        let result_ids: Vec<&str> = turns
            .iter()
            .filter(|t| t.role == Role::Tool)
            .filter_map(|t| t.tool_call_id.as_deref())
            .collect();
        assert_eq!(result_ids, vec!["call_a", "call_b", "call_c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn tool_calls_run_concurrently() {
        let h = harness(ScriptedProvider::new(vec![
            tool_turn(
                "",
                vec![search_call("a", "slow:1000 one"), search_call("b", "slow:1000 two")],
            ),
            answer("done"),
        ]));
        let started = tokio::time::Instant::now();
        collect(h.agent.run(ConversationId::from("c"), "q")).await.1.unwrap();
        assert!(started.elapsed() < Duration::from_millis(1_500));
    }

    #[tokio::test]
    async fn unknown_tool_becomes_error_result_and_loop_continues() {
        let h = harness(ScriptedProvider::new(vec![
            tool_turn(
                "",
                vec![MessageToolCall {
                    id: "call_x".into(),
                    name: "case_law_db".into(),
                    arguments: "{}".into(),
                }],
            ),
            answer("I could not reach that database."),
        ]));
        let id = ConversationId::from("c1");

        let (events, outcome) = collect(h.agent.run(id.clone(), "Find Smith v. Jones")).await;

        assert!(outcome.is_ok());
        assert_eq!(kinds(&events), vec!["content", "end"]);
        let turns = h.history.load(&id).await.unwrap();
        assert_eq!(turns[2].role, Role::Tool);
        assert_eq!(turns[2].content, "Error: Tool not found: case_law_db");
        assert_eq!(turns[3].content, "I could not reach that database.");
    }

    #[tokio::test]
    async fn failed_search_emits_no_results_event() {
        let registry = registry_with_backend(
            Arc::new(StubSearch {
                urls_per_query: 3,
                fail: true,
            }),
            4,
        );
        let h = harness_with(
            ScriptedProvider::new(vec![
                tool_turn("", vec![search_call("call_1", "zoning variance")]),
                answer("Search is unavailable."),
            ]),
            registry,
        );
        let id = ConversationId::from("c1");

        let (events, outcome) = collect(h.agent.run(id.clone(), "q")).await;

        assert!(outcome.is_ok());
        assert_eq!(kinds(&events), vec!["search_start", "content", "end"]);
        let turns = h.history.load(&id).await.unwrap();
        assert!(turns[2].content.starts_with("Error: Tool execution failed"));
    }

    #[tokio::test]
    async fn list_output_from_other_tools_is_not_announced() {
        let mut registry = registry_with_backend(
            Arc::new(StubSearch {
                urls_per_query: 1,
                fail: false,
            }),
            4,
        );
        registry.register(Box::new(ListTool));
        let h = harness_with(
            ScriptedProvider::new(vec![
                tool_turn(
                    "",
                    vec![MessageToolCall {
                        id: "call_l".into(),
                        name: "list_sources".into(),
                        arguments: "{}".into(),
                    }],
                ),
                answer("ok"),
            ]),
            registry,
        );

        let (events, _) = collect(h.agent.run(ConversationId::from("c"), "q")).await;
        assert_eq!(kinds(&events), vec!["content", "end"]);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tool_times_out_into_error_result() {
        let h = harness(ScriptedProvider::new(vec![
            tool_turn("", vec![search_call("call_1", "slow:5000 easement")]),
            answer("Timed out, answering from memory."),
        ]));
        let agent = h.agent.clone().with_tool_timeout(Duration::from_secs(1));
        let id = ConversationId::from("c1");

        let (events, outcome) = collect(agent.run(id.clone(), "q")).await;

        assert!(outcome.is_ok());
        assert!(!events.iter().any(|e| e.kind() == "search_results"));
        let turns = h.history.load(&id).await.unwrap();
        assert_eq!(turns[2].content, format!("Error: Tool timed out: {SEARCH_TOOL_NAME} after 1s"));
    }

    #[tokio::test]
    async fn completion_failure_ends_stream_early() {
        let h = harness(ScriptedProvider::new(vec![Err(ProviderError::RateLimited {
            retry_after_secs: 5,
        })]));
        let id = ConversationId::from("c1");

        let (events, outcome) = collect(h.agent.run(id.clone(), "q")).await;

        assert_eq!(events, vec![StreamEvent::End]);
        assert!(matches!(outcome, Err(Error::Provider(ProviderError::RateLimited { .. }))));
        // Only the user turn was stored.
        assert_eq!(h.history.load(&id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn round_limit_is_distinct_from_completion_failure() {
        let script = (0..5)
            .map(|i| tool_turn("", vec![search_call(&format!("call_{i}"), "again")]))
            .collect();
        let h = harness(ScriptedProvider::new(script));
        let agent = h.agent.clone().with_max_rounds(2);
        let id = ConversationId::from("c1");

        let (events, outcome) = collect(agent.run(id.clone(), "loop forever")).await;

        assert!(matches!(outcome, Err(Error::RoundLimitExceeded { limit: 2 })));
        assert_eq!(events.last(), Some(&StreamEvent::End));
        assert_eq!(events.iter().filter(|e| e.is_end()).count(), 1);
        assert_eq!(h.provider.requests().len(), 2);

        // Every tool call still has its result.
        let turns = h.history.load(&id).await.unwrap();
        let calls: usize = turns.iter().map(|t| t.tool_calls.len()).sum();
        let results = turns.iter().filter(|t| t.role == Role::Tool).count();
        assert_eq!(calls, 2);
        assert_eq!(results, 2);
    }

    #[tokio::test]
    async fn follow_up_sees_prior_turns_and_history_only_grows() {
        let h = harness(ScriptedProvider::new(vec![answer("First answer."), answer("Second answer.")]));
        let id = ConversationId::from("c1");

        collect(h.agent.run(id.clone(), "First question")).await.1.unwrap();
        let before = h.history.load(&id).await.unwrap();
        collect(h.agent.run(id.clone(), "Second question")).await.1.unwrap();
        let after = h.history.load(&id).await.unwrap();

        assert_eq!(&after[..before.len()], &before[..]);
        assert_eq!(after.len(), 4);

        let second = &h.provider.requests()[1];
        let contents: Vec<&str> = second.messages.iter().skip(1).map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["First question", "First answer.", "Second question"]);
    }

    #[tokio::test]
    async fn identical_inputs_reproduce_event_kinds() {
        let script = || {
            ScriptedProvider::new(vec![
                tool_turn("Searching. ", vec![search_call("call_1", "lease termination notice")]),
                answer("Thirty days in most states."),
            ])
        };
        let first = harness(script());
        let second = harness(script());

        let (a, _) = collect(first.agent.run(ConversationId::from("x"), "q")).await;
        let (b, _) = collect(second.agent.run(ConversationId::from("x"), "q")).await;
        assert_eq!(kinds(&a), kinds(&b));
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_during_completion_drops_partial_answer() {
        let h = harness(
            ScriptedProvider::new(vec![answer("one two three four five six seven eight")])
                .with_chunk_pause(Duration::from_millis(50)),
        );
        let id = ConversationId::from("c1");

        let AgentRun { mut events, outcome } = h.agent.run(id.clone(), "q");
        let first = events.recv().await.unwrap();
        assert_eq!(first.kind(), "content");
        drop(events);

        assert!(matches!(outcome.await.unwrap(), Err(Error::ClientDisconnected)));
        let turns = h.history.load(&id).await.unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].role, Role::User);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_during_tools_finishes_the_round() {
        let h = harness(ScriptedProvider::new(vec![
            tool_turn("", vec![search_call("call_1", "slow:200 probate")]),
            answer("never requested"),
        ]));
        let id = ConversationId::from("c1");

        let AgentRun { mut events, outcome } = h.agent.run(id.clone(), "q");
        let first = events.recv().await.unwrap();
        assert_eq!(first.kind(), "search_start");
        drop(events);

        assert!(matches!(outcome.await.unwrap(), Err(Error::ClientDisconnected)));
        let turns = h.history.load(&id).await.unwrap();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[2].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(h.provider.requests().len(), 1);
    }

    #[test]
    fn search_query_extraction() {
        assert_eq!(search_query(&search_call("c", "quiet title")), "quiet title");
        let no_query = MessageToolCall {
            id: "c".into(),
            name: SEARCH_TOOL_NAME.into(),
            arguments: "{}".into(),
        };
        assert_eq!(search_query(&no_query), "");
    }

    #[test]
    fn urls_come_only_from_list_data() {
        let list = ToolResult {
            call_id: "c".into(),
            success: true,
            output: String::new(),
            data: Some(serde_json::json!([{"url": "https://a"}, {"title": "no url"}, {"url": 7}])),
        };
        assert_eq!(result_urls(&list), Some(vec!["https://a".to_string()]));

        let object = ToolResult {
            data: Some(serde_json::json!({"url": "https://a"})),
            ..list.clone()
        };
        assert_eq!(result_urls(&object), None);

        let none = ToolResult { data: None, ..list };
        assert_eq!(result_urls(&none), None);
    }
}
