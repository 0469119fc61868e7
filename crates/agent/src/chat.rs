//! Chat turn orchestration.
//!
//! One [`ChatService`] drives both conversations and works; the thread kind
//! only selects the prompt mode. A turn runs in two phases:
//!
//! 1. [`ChatService::begin_turn`] validates, resolves the thread, assembles
//!    the prompt, persists the user turn and creates the empty assistant turn.
//! 2. [`PendingTurn::stream_to`] streams the model output to the client while
//!    persisting it, then records the assistant turn on the thread.
//!
//! Once phase 1 succeeds the turn is accepted: phase 2 reports failures in
//! the [`StreamReport`] instead of returning them.

use std::sync::Arc;
use storyloom_config::ChatConfig;
use storyloom_core::error::{ProviderError, RepositoryError, ValidationError};
use storyloom_core::{
    ChatMessage, ChunkStore, ClientSink, Provider, ProviderRequest, Result, Role, Thread,
    ThreadKind, ThreadRef, ThreadRepository, Turn, TurnRepository,
};
use storyloom_providers::ProviderRouter;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::collector::{CollectorLimits, StreamCollector, StreamReport};
use crate::context::{PromptAssembler, PromptMode};
use crate::retrieval::{IndexRequest, RetrievalService};

/// A request to add one user message to a thread and stream the reply.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub user_id: String,
    /// Model id, resolved through the provider router.
    pub model: String,
    pub kind: ThreadKind,
    /// Existing thread to continue; a new one is created when absent.
    pub thread_id: Option<String>,
    /// Caller-supplied messages, appended to the prompt verbatim.
    pub messages: Vec<ChatMessage>,
}

impl ChatRequest {
    /// A request that starts a new conversation.
    pub fn new(
        user_id: impl Into<String>,
        model: impl Into<String>,
        messages: Vec<ChatMessage>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            model: model.into(),
            kind: ThreadKind::Conversation,
            thread_id: None,
            messages,
        }
    }

    /// Target a thread of the given kind; `None` creates one.
    pub fn on_thread(mut self, kind: ThreadKind, thread_id: Option<String>) -> Self {
        self.kind = kind;
        self.thread_id = thread_id;
        self
    }

    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        if self.user_id.trim().is_empty() {
            return Err(ValidationError::MissingUserId);
        }
        if self.model.trim().is_empty() {
            return Err(ValidationError::MissingModel);
        }
        match self.messages.last() {
            None => Err(ValidationError::NoMessages),
            Some(m) if m.content.trim().is_empty() => Err(ValidationError::EmptyContent),
            Some(_) => Ok(()),
        }
    }

    fn existing_thread(&self) -> Option<ThreadRef> {
        self.thread_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| ThreadRef::new(self.kind, id))
    }
}

/// Turn lifecycle tunables.
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub history_limit: usize,
    pub persist_threshold_chars: usize,
    pub index_threshold_chars: usize,
    pub title_max_chars: usize,
    pub default_title: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self::from(&ChatConfig::default())
    }
}

impl From<&ChatConfig> for ChatSettings {
    fn from(config: &ChatConfig) -> Self {
        Self {
            history_limit: config.history_limit,
            persist_threshold_chars: config.persist_threshold_chars,
            index_threshold_chars: config.index_threshold_chars,
            title_max_chars: config.title_max_chars,
            default_title: config.default_title.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

/// Title from the first user message: trimmed, cut to `max_chars` with an
/// ellipsis, or `default` when there is nothing to use.
pub fn generate_title(messages: &[ChatMessage], max_chars: usize, default: &str) -> String {
    let Some(first) = messages.iter().find(|m| m.role == Role::User) else {
        return default.to_string();
    };
    let title = first.content.trim();
    if title.is_empty() {
        return default.to_string();
    }
    if title.chars().count() > max_chars {
        let cut: String = title.chars().take(max_chars).collect();
        return format!("{cut}...");
    }
    title.to_string()
}

/// The chat turn orchestrator.
#[derive(Clone)]
pub struct ChatService {
    threads: Arc<dyn ThreadRepository>,
    turns: Arc<dyn TurnRepository>,
    chunks: Arc<dyn ChunkStore>,
    router: Arc<ProviderRouter>,
    retrieval: Option<Arc<RetrievalService>>,
    assembler: PromptAssembler,
    settings: ChatSettings,
}

impl std::fmt::Debug for ChatService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatService")
            .field("default_provider", &self.router.default_provider())
            .field("retrieval", &self.retrieval.is_some())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ChatService {
    /// Build over one store that backs threads, turns and chunks.
    pub fn new<S>(store: Arc<S>, router: Arc<ProviderRouter>) -> Self
    where
        S: ThreadRepository + TurnRepository + ChunkStore + 'static,
    {
        Self {
            threads: store.clone(),
            turns: store.clone(),
            chunks: store,
            router,
            retrieval: None,
            assembler: PromptAssembler::default(),
            settings: ChatSettings::default(),
        }
    }

    /// Enable retrieval and indexing.
    pub fn with_retrieval(mut self, retrieval: Arc<RetrievalService>) -> Self {
        self.retrieval = Some(retrieval);
        self
    }

    pub fn with_assembler(mut self, assembler: PromptAssembler) -> Self {
        self.assembler = assembler;
        self
    }

    pub fn with_settings(mut self, settings: ChatSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn router(&self) -> &ProviderRouter {
        &self.router
    }

    pub fn retrieval(&self) -> Option<&Arc<RetrievalService>> {
        self.retrieval.as_ref()
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    /// Run a whole turn, streaming output into `sink`.
    pub async fn send_message(
        &self,
        request: ChatRequest,
        sink: &mut dyn ClientSink,
    ) -> Result<TurnOutcome> {
        let pending = self.begin_turn(request).await?;
        Ok(pending.stream_to(sink).await)
    }

    /// Everything up to the model call.
    ///
    /// Fails without side effects on validation or routing errors. Fails
    /// after partial side effects only when storage rejects the thread, the
    /// user turn or the empty assistant turn.
    pub async fn begin_turn(&self, request: ChatRequest) -> Result<PendingTurn> {
        request.validate()?;

        let (provider, upstream_model) = self.router.resolve(&request.model).ok_or_else(|| {
            ProviderError::NotConfigured(format!("no provider for model '{}'", request.model))
        })?;

        let (thread, is_new) = self.resolve_thread(&request).await?;
        let thread_ref = thread.reference();
        let mode = PromptMode::from(thread_ref.kind);

        let latest = request
            .messages
            .last()
            .ok_or(ValidationError::NoMessages)?;
        let query = (latest.role == Role::User).then(|| latest.content.clone());

        // Read before the new user turn exists, so it is not duplicated.
        let history = if is_new {
            Vec::new()
        } else {
            self.recent_history(&thread_ref).await
        };

        let mut prompt: Vec<ChatMessage> = Vec::new();
        prompt.extend(self.assembler.preamble(mode));
        if let (Some(retrieval), Some(q)) = (&self.retrieval, query.as_deref()) {
            prompt.extend(retrieval.build_context(q, &request.user_id, Some(&thread_ref)).await);
        }
        prompt.extend(history.iter().map(Turn::to_message));
        prompt.extend(request.messages.iter().cloned());

        let mut indexing = Vec::new();
        let user_turn_id = match query {
            Some(content) => {
                let turn = Turn::new(thread_ref.clone(), &request.user_id, Role::User, content, &request.model);
                self.turns.create_turn(&turn).await?;
                self.threads.append_turn_id(&thread_ref, &turn.id).await?;
                if let Some(retrieval) = &self.retrieval {
                    indexing.push(retrieval.index(IndexRequest::for_turn(&turn)));
                }
                Some(turn.id)
            }
            None => None,
        };

        let assistant = Turn::new(thread_ref.clone(), &request.user_id, Role::Assistant, "", &request.model);
        self.turns.create_turn(&assistant).await?;

        info!(
            thread_id = %thread_ref.id,
            kind = %thread_ref.kind,
            user_id = %request.user_id,
            turn_id = %assistant.id,
            provider = provider.name(),
            model = %upstream_model,
            prompt_messages = prompt.len(),
            "Turn accepted"
        );

        let mut provider_request = ProviderRequest::new(upstream_model, prompt);
        provider_request.temperature = self.settings.temperature;
        provider_request.max_tokens = self.settings.max_tokens;

        Ok(PendingTurn {
            thread: thread_ref,
            title: thread.title,
            user_turn_id,
            assistant_turn_id: assistant.id,
            provider,
            request: provider_request,
            threads: Arc::clone(&self.threads),
            turns: Arc::clone(&self.turns),
            retrieval: self.retrieval.clone(),
            limits: CollectorLimits {
                flush_at: self.settings.persist_threshold_chars,
                index_at: self.settings.index_threshold_chars,
            },
            indexing,
        })
    }

    async fn resolve_thread(&self, request: &ChatRequest) -> Result<(Thread, bool)> {
        if let Some(existing) = request.existing_thread() {
            let thread = self
                .threads
                .get_thread(&existing, &request.user_id)
                .await?
                .ok_or_else(|| RepositoryError::not_found(existing.kind.as_str(), existing.id.clone()))?;
            return Ok((thread, false));
        }

        let title = generate_title(
            &request.messages,
            self.settings.title_max_chars,
            &self.settings.default_title,
        );
        let thread = Thread::new(request.kind, &request.user_id, title);
        self.threads.create_thread(&thread).await?;
        debug!(thread_id = %thread.id, kind = %thread.kind, "Created thread");
        Ok((thread, true))
    }

    /// Most recent non-empty turns, oldest first. Read failures count as no
    /// history.
    ///
    /// Reads twice the limit so assistant turns left empty by a failed stream
    /// do not crowd out real ones.
    async fn recent_history(&self, thread: &ThreadRef) -> Vec<Turn> {
        let limit = self.settings.history_limit;
        match self.turns.list_recent(thread, limit.saturating_mul(2)).await {
            Ok(mut turns) => {
                turns.retain(|t| !t.content.is_empty());
                turns.truncate(limit);
                turns.reverse();
                turns
            }
            Err(e) => {
                warn!(thread_id = %thread.id, error = %e, "Failed to load history");
                Vec::new()
            }
        }
    }

    /// Delete a thread with its turns and their chunks.
    pub async fn delete_thread(&self, thread: &ThreadRef, user_id: &str) -> Result<()> {
        if self.threads.get_thread(thread, user_id).await?.is_none() {
            return Err(RepositoryError::not_found(thread.kind.as_str(), thread.id.clone()).into());
        }

        let chunks = self.chunks.delete_chunks_by_thread(thread).await?;
        let turns = self.turns.delete_turns_by_thread(thread).await?;
        self.threads.delete_thread(thread).await?;

        info!(thread_id = %thread.id, kind = %thread.kind, turns, chunks, "Deleted thread");
        Ok(())
    }
}

/// A turn whose prompt is ready and whose ids are already known.
pub struct PendingTurn {
    thread: ThreadRef,
    title: String,
    user_turn_id: Option<String>,
    assistant_turn_id: String,
    provider: Arc<dyn Provider>,
    request: ProviderRequest,
    threads: Arc<dyn ThreadRepository>,
    turns: Arc<dyn TurnRepository>,
    retrieval: Option<Arc<RetrievalService>>,
    limits: CollectorLimits,
    indexing: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for PendingTurn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingTurn")
            .field("thread", &self.thread)
            .field("assistant_turn_id", &self.assistant_turn_id)
            .field("provider", &self.provider.name())
            .finish_non_exhaustive()
    }
}

impl PendingTurn {
    pub fn thread(&self) -> &ThreadRef {
        &self.thread
    }

    pub fn thread_id(&self) -> &str {
        &self.thread.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn user_turn_id(&self) -> Option<&str> {
        self.user_turn_id.as_deref()
    }

    pub fn assistant_turn_id(&self) -> &str {
        &self.assistant_turn_id
    }

    /// The assembled prompt about to be sent.
    pub fn prompt(&self) -> &[ChatMessage] {
        &self.request.messages
    }

    /// Stream the reply into `sink`, persisting as it arrives.
    ///
    /// Never fails: client, provider and append failures end up in the
    /// report, and the assistant turn is recorded on the thread regardless.
    pub async fn stream_to(self, sink: &mut dyn ClientSink) -> TurnOutcome {
        let PendingTurn {
            thread,
            title,
            user_turn_id,
            assistant_turn_id,
            provider,
            request,
            threads,
            turns,
            retrieval,
            limits,
            mut indexing,
        } = self;

        let mut collector = StreamCollector::new(sink, turns, retrieval, &assistant_turn_id, limits);

        match provider.stream(request).await {
            Ok(mut rx) => {
                while let Some(item) = rx.recv().await {
                    match item {
                        Ok(chunk) => {
                            if let Some(text) = chunk.content.as_deref() {
                                collector.push(text).await;
                            }
                            if chunk.done {
                                break;
                            }
                        }
                        Err(e) => {
                            collector.record_provider_error(e);
                            break;
                        }
                    }
                }
            }
            Err(e) => collector.record_provider_error(e),
        }

        let (report, handles) = collector.finish().await;
        indexing.extend(handles);

        if let Err(e) = threads.append_turn_id(&thread, &assistant_turn_id).await {
            warn!(thread_id = %thread.id, turn_id = %assistant_turn_id, error = %e, "Failed to record assistant turn on thread");
        }

        info!(
            thread_id = %thread.id,
            turn_id = %assistant_turn_id,
            chars = report.streamed_chars,
            clean = report.is_clean(),
            "Turn finished"
        );

        TurnOutcome {
            thread,
            title,
            user_turn_id,
            assistant_turn_id,
            report,
            indexing,
        }
    }
}

/// Result of an accepted turn.
#[derive(Debug)]
pub struct TurnOutcome {
    pub thread: ThreadRef,
    pub title: String,
    pub user_turn_id: Option<String>,
    pub assistant_turn_id: String,
    pub report: StreamReport,
    /// Background indexing spawned by this turn. Dropping them leaves the
    /// tasks running.
    pub indexing: Vec<JoinHandle<()>>,
}

impl TurnOutcome {
    pub fn thread_id(&self) -> &str {
        &self.thread.id
    }

    /// Wait for this turn's background indexing to finish.
    pub async fn wait_for_indexing(&mut self) {
        for handle in self.indexing.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "Indexing task panicked or was cancelled");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NARRATIVE_PREAMBLE;
    use crate::test_helpers::{KeywordEmbedder, ScriptedProvider};
    use storyloom_core::Error;
    use storyloom_memory::InMemoryStore;

    struct Harness {
        store: Arc<InMemoryStore>,
        provider: Arc<ScriptedProvider>,
        service: ChatService,
    }

    fn harness(provider: ScriptedProvider) -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let provider = Arc::new(provider);
        let mut router = ProviderRouter::new("openai");
        router.register("openai", provider.clone(), "gpt-test");
        let service = ChatService::new(store.clone(), Arc::new(router));
        Harness {
            store,
            provider,
            service,
        }
    }

    fn with_rag(h: Harness) -> Harness {
        let retrieval = Arc::new(RetrievalService::new(
            h.store.clone(),
            Arc::new(KeywordEmbedder::default()),
        ));
        Harness {
            service: h.service.with_retrieval(retrieval),
            ..h
        }
    }

    #[tokio::test]
    async fn new_conversation_round_trip() {
        let h = harness(ScriptedProvider::new("openai", &["Hi t", "here"]));
        let mut sink: Vec<u8> = Vec::new();

        let outcome = h
            .service
            .send_message(ChatRequest::new("u1", "openai", vec![ChatMessage::user("Hello")]), &mut sink)
            .await
            .unwrap();

        assert_eq!(outcome.title, "Hello");
        assert_eq!(sink, b"Hi there");
        assert!(outcome.report.is_clean());

        let user_turn = h
            .store
            .get_turn(outcome.user_turn_id.as_deref().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user_turn.role, Role::User);
        assert_eq!(user_turn.content, "Hello");

        let assistant = h.store.get_turn(&outcome.assistant_turn_id).await.unwrap().unwrap();
        assert_eq!(assistant.role, Role::Assistant);
        assert_eq!(assistant.content, "Hi there");

        let thread = h.store.get_thread(&outcome.thread, "u1").await.unwrap().unwrap();
        assert_eq!(
            thread.turn_ids,
            vec![user_turn.id.clone(), outcome.assistant_turn_id.clone()]
        );

        let sent = h.provider.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].model, "gpt-test");
        assert_eq!(sent[0].messages, vec![ChatMessage::user("Hello")]);
    }

    #[tokio::test]
    async fn invalid_requests_have_no_side_effects() {
        let h = harness(ScriptedProvider::new("openai", &["x"]));
        let mut sink: Vec<u8> = Vec::new();

        let cases = [
            ChatRequest::new("", "openai", vec![ChatMessage::user("hi")]),
            ChatRequest::new("u", " ", vec![ChatMessage::user("hi")]),
            ChatRequest::new("u", "openai", vec![]),
            ChatRequest::new("u", "openai", vec![ChatMessage::user("   ")]),
        ];
        for request in cases {
            let err = h.service.send_message(request, &mut sink).await.unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "got {err:?}");
        }
        assert!(h.provider.requests().is_empty());
        assert!(h.store.list_recent(&ThreadRef::conversation("any"), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unroutable_model_fails_before_side_effects() {
        let store = Arc::new(InMemoryStore::new());
        let service = ChatService::new(store.clone(), Arc::new(ProviderRouter::new("openai")));
        let mut sink: Vec<u8> = Vec::new();

        let err = service
            .send_message(ChatRequest::new("u", "gpt-4o", vec![ChatMessage::user("hi")]), &mut sink)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provider(ProviderError::NotConfigured(_))));
    }

    #[tokio::test]
    async fn foreign_thread_is_rejected() {
        let h = harness(ScriptedProvider::new("openai", &["ok"]));
        let thread = Thread::new(ThreadKind::Conversation, "owner", "t");
        h.store.create_thread(&thread).await.unwrap();

        let request = ChatRequest::new("intruder", "openai", vec![ChatMessage::user("hi")])
            .on_thread(ThreadKind::Conversation, Some(thread.id.clone()));
        let err = h.service.begin_turn(request).await.unwrap_err();
        assert!(matches!(err, Error::Repository(RepositoryError::NotFound { .. })));
        assert!(h.provider.requests().is_empty());
    }

    #[tokio::test]
    async fn history_is_chronological_and_excludes_new_message() {
        let h = harness(ScriptedProvider::new("openai", &["second answer"]));
        let mut sink: Vec<u8> = Vec::new();

        let first = h
            .service
            .send_message(ChatRequest::new("u", "openai", vec![ChatMessage::user("first question")]), &mut sink)
            .await
            .unwrap();

        let request = ChatRequest::new("u", "openai", vec![ChatMessage::user("second question")])
            .on_thread(ThreadKind::Conversation, Some(first.thread.id.clone()));
        let pending = h.service.begin_turn(request).await.unwrap();

        assert_eq!(pending.title(), "first question");
        assert_eq!(
            pending.prompt(),
            &[
                ChatMessage::user("first question"),
                ChatMessage::assistant("second answer"),
                ChatMessage::user("second question"),
            ]
        );
    }

    #[tokio::test]
    async fn empty_turns_do_not_crowd_out_history() {
        let h = harness(ScriptedProvider::new("openai", &["ok"]));
        let h = Harness {
            service: h.service.with_settings(ChatSettings {
                history_limit: 2,
                ..ChatSettings::default()
            }),
            ..h
        };
        let thread = Thread::new(ThreadKind::Conversation, "u", "Saga");
        h.store.create_thread(&thread).await.unwrap();
        let thread_ref = ThreadRef::conversation(thread.id.clone());

        let script = [
            (Role::User, "q1"),
            (Role::Assistant, "a1"),
            (Role::User, "q2"),
            (Role::Assistant, ""),
        ];
        let base = chrono::Utc::now() - chrono::Duration::minutes(10);
        for (i, (role, content)) in script.into_iter().enumerate() {
            let mut turn = Turn::new(thread_ref.clone(), "u", role, content, "gpt-test");
            turn.created_at = base + chrono::Duration::seconds(i as i64);
            h.store.create_turn(&turn).await.unwrap();
        }

        let request = ChatRequest::new("u", "openai", vec![ChatMessage::user("q3")])
            .on_thread(ThreadKind::Conversation, Some(thread.id.clone()));
        let pending = h.service.begin_turn(request).await.unwrap();

        assert_eq!(
            pending.prompt(),
            &[
                ChatMessage::assistant("a1"),
                ChatMessage::user("q2"),
                ChatMessage::user("q3"),
            ]
        );
    }

    #[test]
    fn service_debug_is_readable() {
        let h = harness(ScriptedProvider::new("openai", &[]));
        let rendered = format!("{:?}", h.service);
        assert!(rendered.contains("default_provider: \"openai\""));
        assert!(rendered.contains("retrieval: false"));
    }

    #[tokio::test]
    async fn provider_failure_keeps_partial_content() {
        let provider = ScriptedProvider::new("openai", &["partial "; 30])
            .then_fail(ProviderError::StreamInterrupted("reset".into()));
        let h = harness(provider);
        let mut sink: Vec<u8> = Vec::new();

        let outcome = h
            .service
            .send_message(ChatRequest::new("u", "openai", vec![ChatMessage::user("go")]), &mut sink)
            .await
            .unwrap();

        assert!(matches!(
            outcome.report.provider_error,
            Some(ProviderError::StreamInterrupted(_))
        ));
        let assistant = h.store.get_turn(&outcome.assistant_turn_id).await.unwrap().unwrap();
        assert_eq!(assistant.content, "partial ".repeat(30));

        let thread = h.store.get_thread(&outcome.thread, "u").await.unwrap().unwrap();
        assert_eq!(thread.turn_ids.last(), Some(&outcome.assistant_turn_id));
    }

    #[tokio::test]
    async fn pre_stream_failure_still_records_assistant_turn() {
        let h = harness(ScriptedProvider::failing(
            "openai",
            ProviderError::RateLimited { retry_after_secs: 5 },
        ));
        let mut sink: Vec<u8> = Vec::new();

        let outcome = h
            .service
            .send_message(ChatRequest::new("u", "openai", vec![ChatMessage::user("go")]), &mut sink)
            .await
            .unwrap();

        assert!(outcome.report.provider_error.is_some());
        assert_eq!(outcome.report.streamed_chars, 0);
        let assistant = h.store.get_turn(&outcome.assistant_turn_id).await.unwrap().unwrap();
        assert!(assistant.content.is_empty());
        let thread = h.store.get_thread(&outcome.thread, "u").await.unwrap().unwrap();
        assert_eq!(thread.turn_ids.len(), 2);
    }

    #[tokio::test]
    async fn work_turns_open_with_narrative_preamble() {
        let h = harness(ScriptedProvider::new("openai", &["Once upon a time"]));
        let request = ChatRequest::new("u", "openai", vec![ChatMessage::user("Begin the saga")])
            .on_thread(ThreadKind::Work, None);

        let pending = h.service.begin_turn(request).await.unwrap();
        assert_eq!(pending.thread().kind, ThreadKind::Work);
        assert_eq!(pending.prompt()[0], ChatMessage::system(NARRATIVE_PREAMBLE));
        assert_eq!(pending.prompt().len(), 2);
    }

    #[tokio::test]
    async fn dialogue_preamble_is_optional() {
        let h = harness(ScriptedProvider::new("openai", &["ok"]));
        let service = h
            .service
            .with_assembler(PromptAssembler::new().with_dialogue_preamble(Some("Be concise.".into())));
        let pending = service
            .begin_turn(ChatRequest::new("u", "openai", vec![ChatMessage::user("hi")]))
            .await
            .unwrap();
        assert_eq!(pending.prompt()[0], ChatMessage::system("Be concise."));
    }

    #[tokio::test]
    async fn retrieved_context_comes_from_other_threads() {
        let long_answer = "The dragon sleeps beneath the castle. ".repeat(4);
        let h = with_rag(harness(ScriptedProvider::new("openai", &[long_answer.as_str()])));
        let mut sink: Vec<u8> = Vec::new();

        let mut first = h
            .service
            .send_message(
                ChatRequest::new("u", "openai", vec![ChatMessage::user("Tell me where the dragon sleeps, in detail please")]),
                &mut sink,
            )
            .await
            .unwrap();
        first.wait_for_indexing().await;
        assert!(h.store.count_chunks_for_turn(&first.assistant_turn_id).await.unwrap() > 0);

        // Same thread: its own chunks are excluded.
        let same = h
            .service
            .begin_turn(
                ChatRequest::new("u", "openai", vec![ChatMessage::user("the dragon?")])
                    .on_thread(ThreadKind::Conversation, Some(first.thread.id.clone())),
            )
            .await
            .unwrap();
        assert!(same.prompt().iter().all(|m| m.role != Role::System));

        // A new conversation sees them.
        let fresh = h
            .service
            .begin_turn(ChatRequest::new("u", "openai", vec![ChatMessage::user("the dragon?")]))
            .await
            .unwrap();
        assert_eq!(fresh.prompt()[0].role, Role::System);
        assert!(fresh.prompt()[0].content.contains("dragon sleeps"));
    }

    #[tokio::test]
    async fn delete_thread_cascades() {
        let long_answer = "A robot tends the garden at night. ".repeat(4);
        let h = with_rag(harness(ScriptedProvider::new("openai", &[long_answer.as_str()])));
        let mut sink: Vec<u8> = Vec::new();

        let mut outcome = h
            .service
            .send_message(ChatRequest::new("u", "openai", vec![ChatMessage::user("hello robot")]), &mut sink)
            .await
            .unwrap();
        outcome.wait_for_indexing().await;
        assert!(!h.store.all_chunks().await.is_empty());

        let err = h.service.delete_thread(&outcome.thread, "other").await.unwrap_err();
        assert!(matches!(err, Error::Repository(RepositoryError::NotFound { .. })));

        h.service.delete_thread(&outcome.thread, "u").await.unwrap();
        assert!(h.store.all_chunks().await.is_empty());
        assert!(h.store.get_turn(&outcome.assistant_turn_id).await.unwrap().is_none());
        assert!(h.store.get_thread(&outcome.thread, "u").await.unwrap().is_none());
    }

    #[test]
    fn titles() {
        assert_eq!(generate_title(&[ChatMessage::user("  Hello  ")], 50, "New"), "Hello");
        assert_eq!(generate_title(&[], 50, "New"), "New");
        assert_eq!(generate_title(&[ChatMessage::assistant("x")], 50, "New"), "New");

        let long = "故".repeat(60);
        let title = generate_title(&[ChatMessage::user(long)], 50, "New");
        assert_eq!(title.chars().count(), 53);
        assert!(title.ends_with("..."));
    }
}
