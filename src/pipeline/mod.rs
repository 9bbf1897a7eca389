//! One generic request pipeline, parameterized by prompt strategy.
//!
//! ```text
//!  structured: INIT → EXPANDING → SEARCHING → SYNTHESIZING (JSON, batch)
//!                   → VALIDATING (identifier registry) → FORMATTING (streamed) → DONE
//!  free_text:  INIT → SEARCHING (raw query) → SYNTHESIZING (streamed)
//!                   → VALIDATING (link correction) → DONE
//! ```
//!
//! Every run ends with exactly one `done` or `error` event unless the caller
//! disconnects first, in which case it stops emitting.

pub mod events;
pub mod history;
pub mod messages;
pub mod stage;

use futures_util::{FutureExt, StreamExt};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::{Config, ExpansionExhaustion, PipelineConfig, PromptStrategy};
use crate::llm::query_expand::{heuristic_expansion, QueryExpander};
use crate::llm::retry::{classify_text, Attempt, RetryOutcome, RetryPolicy};
use crate::llm::synthesize::{build_formatting_prompt, clip_documents, AnswerSynthesizer, SynthesisContext};
use crate::llm::LanguageModel;
use crate::models::{ExpandedQuerySet, PipelineRequest, PipelineResult, RetrievedDocument};
use crate::search::hybrid::HybridSearcher;
use crate::validation::identifiers::{IdentifierRegistry, IdentifierSet};
use crate::validation::json::parse_pages;
use crate::validation::ResponseValidator;
use events::{EventSink, PipelineEvent};
use history::{fit_history, FittedRequest};
use messages::ProgressMessages;
use stage::{Stage, StageTracker};

/// The caller disconnected; unwind the run without emitting anything more.
struct Disconnected;

type Step<T> = Result<T, Disconnected>;

pub struct Pipeline {
    expander: QueryExpander,
    synthesizer: AnswerSynthesizer,
    searcher: Arc<HybridSearcher>,
    validator: ResponseValidator,
    registry: Arc<IdentifierRegistry>,
    retry: RetryPolicy,
    config: PipelineConfig,
    messages: ProgressMessages,
}

impl Pipeline {
    pub fn new(
        expansion_llm: Arc<dyn LanguageModel>,
        synthesis_llm: Arc<dyn LanguageModel>,
        searcher: Arc<HybridSearcher>,
        registry: Arc<IdentifierRegistry>,
        config: &Config,
    ) -> Self {
        let retry = RetryPolicy::from_config(&config.retry);
        let expansion_policy = retry
            .clone()
            .with_attempt_timeout(config.pipeline.expansion_timeout());

        Self {
            expander: QueryExpander::new(expansion_llm, expansion_policy),
            synthesizer: AnswerSynthesizer::new(synthesis_llm, config.pipeline.max_chars_per_node),
            searcher,
            validator: ResponseValidator::new(&config.validation),
            registry,
            retry,
            config: config.pipeline.clone(),
            messages: ProgressMessages::default(),
        }
    }

    /// Start a run in the background and return its event stream. Cancelling
    /// `cancel` or dropping the receiver stops the run at its next yield point.
    pub fn spawn(self: &Arc<Self>, request: PipelineRequest, cancel: CancellationToken) -> mpsc::Receiver<PipelineEvent> {
        let (sink, rx) = EventSink::channel(self.config.event_buffer, cancel);
        let pipeline = self.clone();
        tokio::spawn(async move {
            pipeline.run(request, &sink).await;
        });
        rx
    }

    /// Drive one request to completion, emitting into `sink`. Returns the
    /// final stage.
    pub async fn run(&self, request: PipelineRequest, sink: &EventSink) -> Stage {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "pipeline",
            %request_id,
            strategy = ?self.config.strategy,
        );

        let mut tracker = StageTracker::default();
        async {
            let outcome = AssertUnwindSafe(self.execute(&request, sink, &mut tracker))
                .catch_unwind()
                .await;

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(Disconnected)) => {
                    tracing::info!("Client disconnected during {}", tracker.current());
                    tracker.advance(Stage::Cancelled);
                }
                Err(_) => {
                    tracing::error!("Pipeline panicked during {}", tracker.current());
                    if !tracker.current().is_terminal() {
                        let apology = self.apology(Vec::new(), Vec::new());
                        if sink.emit(PipelineEvent::error(&apology)).await {
                            tracker.advance(Stage::Error);
                        } else {
                            tracker.advance(Stage::Cancelled);
                        }
                    }
                }
            }
        }
        .instrument(span)
        .await;

        tracker.current()
    }

    async fn execute(&self, request: &PipelineRequest, sink: &EventSink, tracker: &mut StageTracker) -> Step<()> {
        let fitted = fit_history(
            &request.query,
            request.history.as_deref(),
            self.config.max_query_chars,
            self.config.min_history_chars,
        );
        tracing::info!(
            query_chars = fitted.query.chars().count(),
            history_chars = fitted.history.as_deref().map(|h| h.chars().count()).unwrap_or(0),
            "Pipeline started"
        );
        self.say(sink, &self.messages.preparing).await?;

        match self.config.strategy {
            PromptStrategy::Structured => self.run_structured(request, &fitted, sink, tracker).await,
            PromptStrategy::FreeText => self.run_free_text(request, &fitted, sink, tracker).await,
        }
    }

    // ─── Structured ─────────────────────────────────────────────

    async fn run_structured(
        &self,
        request: &PipelineRequest,
        fitted: &FittedRequest,
        sink: &EventSink,
        tracker: &mut StageTracker,
    ) -> Step<()> {
        tracker.advance(Stage::Expanding);
        let Some(queries) = self.expand(request, fitted, sink).await? else {
            let apology = self.apology(Vec::new(), Vec::new());
            return self.finish(sink, tracker, PipelineEvent::error(&apology), Stage::Error).await;
        };
        let terms = queries.all_terms();
        tracing::info!(terms = terms.len(), "Query expanded");
        self.say(sink, &self.messages.searching).await?;

        tracker.advance(Stage::Searching);
        let documents = self.retrieve_expanded(&queries).await;
        let candidate_ids = identifiers_of(&documents);
        self.say(sink, &self.messages.documents_found(documents.len())).await?;

        tracker.advance(Stage::Synthesizing);
        let ctx = SynthesisContext {
            query: &fitted.query,
            history: fitted.history.as_deref(),
            documents: &documents,
            file_context: queries.file_context_summary.as_deref(),
        };
        let prompt = self.synthesizer.structured_prompt(&ctx);
        let min_chars = self.config.min_answer_chars;
        let outcome = self
            .retry
            .run("structured synthesis", sink.cancel_token(), |_| {
                let prompt = prompt.as_str();
                async move { classify_text(self.synthesizer.complete(prompt).await, min_chars) }
            })
            .await;
        let raw = match self.settle(sink, outcome)? {
            Some(raw) => raw,
            None => {
                let apology = self.apology(terms, candidate_ids);
                return self.finish(sink, tracker, PipelineEvent::error(&apology), Stage::Error).await;
            }
        };

        let pages = parse_pages(&raw);
        self.say(sink, &self.messages.pages_selected(pages.len())).await?;

        tracker.advance(Stage::Validating);
        let authority = match self.registry.ensure_loaded().await {
            Some(set) => set,
            None => {
                tracing::warn!("Identifier registry unavailable, validating against retrieved documents");
                Arc::new(IdentifierSet::from_iter(candidate_ids.clone()))
            }
        };
        let pages = self.validator.validate_pages(pages, &authority, &documents);
        self.say(sink, &self.messages.validated).await?;

        tracker.advance(Stage::Formatting);
        let prompt = build_formatting_prompt(&fitted.query, fitted.history.as_deref(), &pages);
        let outcome = self.stream_answer("answer formatting", &prompt, sink).await;
        let answer_text = self
            .settle(sink, outcome)?
            .unwrap_or_else(|| self.messages.apology.clone());

        let result = PipelineResult {
            answer_text,
            recommended_links: pages,
            search_terms_used: terms,
            all_candidate_identifiers: candidate_ids,
        };
        self.finish(sink, tracker, PipelineEvent::done(&result), Stage::Done).await
    }

    /// Expansion per the request shape. `Ok(None)` means the run must abort.
    async fn expand(
        &self,
        request: &PipelineRequest,
        fitted: &FittedRequest,
        sink: &EventSink,
    ) -> Step<Option<ExpandedQuerySet>> {
        let cancel = sink.cancel_token();
        let vector_count = self.config.vector_queries;
        let lexical_count = self.config.lexical_queries;

        let outcome = match &request.attachment_context {
            Some(attachment) => {
                self.expander
                    .expand_multimodal(&fitted.query, attachment, self.config.multimodal_queries, cancel)
                    .await
            }
            None => {
                self.expander
                    .expand(
                        &fitted.query,
                        fitted.history.as_deref(),
                        vector_count,
                        lexical_count,
                        cancel,
                    )
                    .await
            }
        };

        if let Some(queries) = self.settle(sink, outcome)? {
            return Ok(Some(queries));
        }

        match self.config.on_expansion_exhausted {
            ExpansionExhaustion::Abort => Ok(None),
            ExpansionExhaustion::Heuristic => {
                tracing::warn!("Expansion exhausted, continuing with key phrases");
                let mut queries = heuristic_expansion(&fitted.query, vector_count, lexical_count);
                queries.file_context_summary = request
                    .attachment_context
                    .as_ref()
                    .map(|a| a.summary.trim().to_string())
                    .filter(|s| !s.is_empty());
                Ok(Some(queries))
            }
        }
    }

    // ─── Free text ──────────────────────────────────────────────

    async fn run_free_text(
        &self,
        request: &PipelineRequest,
        fitted: &FittedRequest,
        sink: &EventSink,
        tracker: &mut StageTracker,
    ) -> Step<()> {
        tracker.advance(Stage::Searching);
        let results = self.searcher.search_raw(&fitted.query).await;
        let documents = clip_documents(&results.documents, self.synthesizer.max_chars_per_node());
        let candidate_ids = identifiers_of(&documents);
        let terms = vec![fitted.query.clone()];
        self.say(sink, &self.messages.documents_found(documents.len())).await?;

        tracker.advance(Stage::Synthesizing);
        let file_context = request.attachment_context.as_ref().map(|a| a.summary.as_str());
        let ctx = SynthesisContext {
            query: &fitted.query,
            history: fitted.history.as_deref(),
            documents: &documents,
            file_context,
        };
        let prompt = self.synthesizer.free_text_prompt(&ctx);
        let outcome = self.stream_answer("free-text synthesis", &prompt, sink).await;
        let Some(answer) = self.settle(sink, outcome)? else {
            let apology = self.apology(terms, candidate_ids);
            return self.finish(sink, tracker, PipelineEvent::error(&apology), Stage::Error).await;
        };

        tracker.advance(Stage::Validating);
        let corrected = self.validator.validate_free_text(&answer, &documents);
        self.say(sink, &self.messages.validated).await?;

        let result = PipelineResult {
            answer_text: corrected.answer_text,
            recommended_links: corrected.links,
            search_terms_used: terms,
            all_candidate_identifiers: candidate_ids,
        };
        self.finish(sink, tracker, PipelineEvent::done(&result), Stage::Done).await
    }

    // ─── Shared steps ───────────────────────────────────────────

    async fn retrieve_expanded(&self, queries: &ExpandedQuerySet) -> Vec<RetrievedDocument> {
        let results = self.searcher.search(queries).await;
        clip_documents(&results.documents, self.synthesizer.max_chars_per_node())
    }

    /// Stream a completion, forwarding every delta as a `partial` event, and
    /// retry failed or too-short answers. A disconnect ends the loop.
    async fn stream_answer(&self, label: &str, prompt: &str, sink: &EventSink) -> RetryOutcome<String> {
        let min_chars = self.config.min_answer_chars;
        self.retry
            .run(label, sink.cancel_token(), |_| async move {
                let mut stream = match self.synthesizer.stream(prompt).await {
                    Ok(stream) => stream,
                    Err(e) => return Attempt::Retry(format!("{e:#}")),
                };

                let mut text = String::new();
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(delta) if delta.is_empty() => {}
                        Ok(delta) => {
                            if !sink.emit(PipelineEvent::partial(delta.as_str())).await {
                                return Attempt::Fatal("client disconnected".into());
                            }
                            text.push_str(&delta);
                        }
                        Err(e) => return Attempt::Retry(format!("stream interrupted: {e:#}")),
                    }
                }
                classify_text(Ok(text), min_chars)
            })
            .await
    }

    /// Completed value, `None` for exhausted or fatal, `Err` on disconnect.
    fn settle<T>(&self, sink: &EventSink, outcome: RetryOutcome<T>) -> Step<Option<T>> {
        if sink.is_cancelled() {
            return Err(Disconnected);
        }
        match outcome {
            RetryOutcome::Completed { value, .. } => Ok(Some(value)),
            RetryOutcome::Cancelled { .. } => Err(Disconnected),
            RetryOutcome::Exhausted { .. } | RetryOutcome::Fatal { .. } => Ok(None),
        }
    }

    async fn say(&self, sink: &EventSink, message: &str) -> Step<()> {
        if sink.progress(message).await {
            Ok(())
        } else {
            Err(Disconnected)
        }
    }

    async fn finish(
        &self,
        sink: &EventSink,
        tracker: &mut StageTracker,
        event: PipelineEvent,
        terminal: Stage,
    ) -> Step<()> {
        if !sink.emit(event).await {
            return Err(Disconnected);
        }
        tracker.advance(terminal);
        tracing::info!("Pipeline finished: {terminal}");
        Ok(())
    }

    fn apology(&self, search_terms_used: Vec<String>, all_candidate_identifiers: Vec<String>) -> PipelineResult {
        PipelineResult {
            answer_text: self.messages.apology.clone(),
            recommended_links: Vec::new(),
            search_terms_used,
            all_candidate_identifiers,
        }
    }
}

fn identifiers_of(documents: &[RetrievedDocument]) -> Vec<String> {
    documents.iter().map(|d| d.identifier.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchConfig;
    use events::EventKind;
    use crate::llm::TextStream;
    use crate::models::{AttachmentContext, SourceKind};
    use crate::search::SearchBackend;
    use crate::validation::identifiers::{IdentifierSource, StaticIdentifiers};
    use async_trait::async_trait;
    use futures_util::stream;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Reply {
        Text(&'static str),
        Chunks(Vec<&'static str>),
        /// One chunk, then the connection drops.
        Broken(&'static str),
        Fail,
    }

    /// Plays back one reply per call; an empty script fails.
    struct ScriptedModel {
        replies: Mutex<VecDeque<Reply>>,
        calls: AtomicUsize,
    }

    impl ScriptedModel {
        fn new(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn next(&self) -> Option<Reply> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies.lock().pop_front()
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
            match self.next() {
                Some(Reply::Text(text)) => Ok(text.to_string()),
                _ => anyhow::bail!("upstream unavailable"),
            }
        }

        async fn stream_complete(&self, _prompt: &str) -> anyhow::Result<TextStream> {
            match self.next() {
                Some(Reply::Chunks(chunks)) => Ok(stream::iter(chunks.into_iter().map(|c| Ok(c.to_string()))).boxed()),
                Some(Reply::Broken(first)) => Ok(stream::iter(vec![
                    Ok(first.to_string()),
                    Err(anyhow::anyhow!("connection reset")),
                ])
                .boxed()),
                _ => anyhow::bail!("upstream unavailable"),
            }
        }
    }

    struct FixedBackend {
        source: SourceKind,
        docs: Vec<(&'static str, &'static str)>,
    }

    #[async_trait]
    impl SearchBackend for FixedBackend {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn source(&self) -> SourceKind {
            self.source
        }

        async fn search(&self, _queries: &[String], limit: usize) -> Vec<RetrievedDocument> {
            self.docs
                .iter()
                .take(limit)
                .map(|(id, title)| RetrievedDocument {
                    identifier: id.to_string(),
                    title: title.to_string(),
                    content: format!("Conteúdo sobre {title}"),
                    relevance_score: 1.0,
                    source: self.source,
                })
                .collect()
        }
    }

    struct PanickingBackend;

    #[async_trait]
    impl SearchBackend for PanickingBackend {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn source(&self) -> SourceKind {
            SourceKind::Lexical
        }

        async fn search(&self, _queries: &[String], _limit: usize) -> Vec<RetrievedDocument> {
            panic!("index corrupted")
        }
    }

    fn config(strategy: PromptStrategy) -> Config {
        let mut config = Config::default();
        config.pipeline.strategy = strategy;
        config.pipeline.vector_queries = 1;
        config.pipeline.lexical_queries = 2;
        config.retry.delays_secs = vec![0, 0, 0];
        config
    }

    fn searcher(lexical: Vec<(&'static str, &'static str)>) -> Arc<HybridSearcher> {
        Arc::new(HybridSearcher::new(
            vec![Arc::new(FixedBackend {
                source: SourceKind::Vector,
                docs: vec![("https://acervo.org/xyz-124", "XYZ")],
            })],
            vec![Arc::new(FixedBackend {
                source: SourceKind::Lexical,
                docs: lexical,
            })],
            &SearchConfig::default(),
        ))
    }

    fn registry() -> Arc<IdentifierRegistry> {
        Arc::new(IdentifierRegistry::new(Arc::new(StaticIdentifiers(vec![
            "https://acervo.org/xyz-124".into(),
            "https://acervo.org/judeus-no-brasil".into(),
        ]))))
    }

    fn pipeline(
        strategy: PromptStrategy,
        expansion: Arc<ScriptedModel>,
        synthesis: Arc<ScriptedModel>,
        searcher: Arc<HybridSearcher>,
    ) -> Pipeline {
        Pipeline::new(expansion, synthesis, searcher, registry(), &config(strategy))
    }

    fn request(query: &str) -> PipelineRequest {
        PipelineRequest {
            query: query.into(),
            ..Default::default()
        }
    }

    async fn collect(pipeline: &Pipeline, request: PipelineRequest) -> (Stage, Vec<PipelineEvent>) {
        let (sink, mut rx) = EventSink::channel(64, CancellationToken::new());
        let stage = pipeline.run(request, &sink).await;
        drop(sink);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (stage, events)
    }

    fn single_terminal(events: &[PipelineEvent]) -> PipelineEvent {
        let terminals: Vec<_> = events.iter().filter(|e| e.is_terminal()).collect();
        assert_eq!(terminals.len(), 1, "expected one terminal event, got {events:?}");
        assert!(events.last().unwrap().is_terminal());
        terminals[0].clone()
    }

    fn partial_text(events: &[PipelineEvent]) -> String {
        events
            .iter()
            .filter(|e| e.kind == EventKind::Partial)
            .map(|e| e.payload.as_str())
            .collect()
    }

    const STRUCTURED_JSON: &str = r#"Aqui está: {"data":{"paginas":[
        {"url":"https://acervo.org/xyz-123","titulo":"XYZ","descricao":"d","justificativa":"j"},
        {"url":"https://outro.site/nada","titulo":"Nada"}
    ]}}"#;

    #[tokio::test]
    async fn test_structured_run_validates_and_streams() {
        let expansion = ScriptedModel::new(vec![Reply::Text("judeus no brasil, imigração judaica, sinagogas")]);
        let synthesis = ScriptedModel::new(vec![
            Reply::Text(STRUCTURED_JSON),
            Reply::Chunks(vec!["Recomendo a página ", "XYZ sobre o tema."]),
        ]);
        let pipeline = pipeline(
            PromptStrategy::Structured,
            expansion,
            synthesis,
            searcher(vec![("https://acervo.org/judeus-no-brasil", "Judeus no Brasil")]),
        );

        let (stage, events) = collect(&pipeline, request("judeus no brasil")).await;
        assert_eq!(stage, Stage::Done);

        let progress: Vec<_> = events
            .iter()
            .filter(|e| e.kind == EventKind::Progress)
            .map(|e| e.payload.clone())
            .collect();
        assert_eq!(progress[0], ProgressMessages::default().preparing);
        assert!(progress.iter().any(|p| p.contains("Encontrei 2 documentos")));
        assert!(progress.iter().any(|p| p.contains("Selecionei as 2 páginas")));

        let done = single_terminal(&events);
        assert_eq!(done.kind, EventKind::Done);
        let result = done.result().unwrap();
        assert_eq!(result.answer_text, "Recomendo a página XYZ sobre o tema.");
        assert_eq!(partial_text(&events), result.answer_text);
        assert_eq!(result.recommended_links.len(), 1);
        assert_eq!(result.recommended_links[0].identifier, "https://acervo.org/xyz-124");
        assert_eq!(
            result.search_terms_used,
            vec!["judeus no brasil", "imigração judaica", "sinagogas"]
        );
        assert_eq!(result.all_candidate_identifiers.len(), 2);
    }

    #[tokio::test]
    async fn test_expansion_exhaustion_aborts_with_apology() {
        let expansion = ScriptedModel::new(vec![Reply::Fail, Reply::Fail, Reply::Fail, Reply::Fail]);
        let synthesis = ScriptedModel::new(vec![]);
        let pipeline = pipeline(PromptStrategy::Structured, expansion.clone(), synthesis.clone(), searcher(vec![]));

        let (stage, events) = collect(&pipeline, request("judeus")).await;
        assert_eq!(stage, Stage::Error);
        assert_eq!(expansion.calls.load(Ordering::SeqCst), 4);
        assert_eq!(synthesis.calls.load(Ordering::SeqCst), 0);

        let error = single_terminal(&events);
        assert_eq!(error.kind, EventKind::Error);
        let result = error.result().unwrap();
        assert_eq!(result.answer_text, messages::APOLOGY);
        assert!(result.search_terms_used.is_empty());
        assert!(partial_text(&events).is_empty());
    }

    #[tokio::test]
    async fn test_expansion_exhaustion_can_fall_back_to_key_phrases() {
        let mut config = config(PromptStrategy::Structured);
        config.pipeline.on_expansion_exhausted = ExpansionExhaustion::Heuristic;
        config.retry.delays_secs = vec![];

        let expansion = ScriptedModel::new(vec![Reply::Fail]);
        let synthesis = ScriptedModel::new(vec![
            Reply::Text(STRUCTURED_JSON),
            Reply::Chunks(vec!["Resposta formatada final."]),
        ]);
        let pipeline = Pipeline::new(expansion, synthesis, searcher(vec![]), registry(), &config);

        let (stage, events) = collect(&pipeline, request("judeus no brasil")).await;
        assert_eq!(stage, Stage::Done);
        let result = single_terminal(&events).result().unwrap();
        assert_eq!(result.search_terms_used[0], "judeus no brasil");
    }

    #[tokio::test]
    async fn test_attachment_uses_multimodal_expansion() {
        let expansion = ScriptedModel::new(vec![Reply::Text(
            "QUERIES:\nimigração judaica no sul\nsinagogas gaúchas\nSUMMARY: Fotografia de uma sinagoga",
        )]);
        let synthesis = ScriptedModel::new(vec![
            Reply::Text(STRUCTURED_JSON),
            Reply::Chunks(vec!["Sobre a sua foto, veja XYZ."]),
        ]);
        let pipeline = pipeline(PromptStrategy::Structured, expansion, synthesis, searcher(vec![]));

        let mut req = request("o que é isto?");
        req.attachment_context = Some(AttachmentContext {
            subject: "sinagoga".into(),
            summary: "Foto antiga".into(),
            ..Default::default()
        });
        let (_, events) = collect(&pipeline, req).await;
        let result = single_terminal(&events).result().unwrap();
        assert!(result
            .search_terms_used
            .contains(&"sinagogas gaúchas".to_string()));
    }

    #[tokio::test]
    async fn test_formatting_exhaustion_keeps_validated_links() {
        let expansion = ScriptedModel::new(vec![Reply::Text("judeus, sinagogas, imigração")]);
        let synthesis = ScriptedModel::new(vec![Reply::Text(STRUCTURED_JSON)]);
        let pipeline = pipeline(PromptStrategy::Structured, expansion, synthesis, searcher(vec![]));

        let (stage, events) = collect(&pipeline, request("judeus")).await;
        assert_eq!(stage, Stage::Done);
        let result = single_terminal(&events).result().unwrap();
        assert_eq!(result.answer_text, messages::APOLOGY);
        assert_eq!(result.recommended_links.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_retrieval_still_completes() {
        let expansion = ScriptedModel::new(vec![Reply::Text("a, b, c")]);
        let synthesis = ScriptedModel::new(vec![
            Reply::Text(r#"{"data":{"paginas":[]}}"#),
            Reply::Chunks(vec!["Não encontrei páginas sobre isso."]),
        ]);
        let empty = Arc::new(HybridSearcher::new(vec![], vec![], &SearchConfig::default()));
        let pipeline = pipeline(PromptStrategy::Structured, expansion, synthesis, empty);

        let (stage, events) = collect(&pipeline, request("nada")).await;
        assert_eq!(stage, Stage::Done);
        assert!(events
            .iter()
            .any(|e| e.payload.contains("Encontrei 0 documentos")));
        let result = single_terminal(&events).result().unwrap();
        assert!(result.recommended_links.is_empty());
        assert!(result.all_candidate_identifiers.is_empty());
    }

    #[tokio::test]
    async fn test_free_text_retries_until_a_full_answer() {
        let synthesis = ScriptedModel::new(vec![
            Reply::Fail,
            Reply::Chunks(vec!["curta"]),
            Reply::Broken("Resposta interrompida "),
            Reply::Chunks(vec!["Leia sobre **XYZ** ", "em https://acervo.org/xyz-12 agora."]),
        ]);
        let pipeline = pipeline(
            PromptStrategy::FreeText,
            ScriptedModel::new(vec![]),
            synthesis.clone(),
            searcher(vec![]),
        );

        let (stage, events) = collect(&pipeline, request("xyz")).await;
        assert_eq!(stage, Stage::Done);
        assert_eq!(synthesis.calls.load(Ordering::SeqCst), 4);

        let result = single_terminal(&events).result().unwrap();
        assert_eq!(
            result.answer_text,
            "Leia sobre **XYZ** em https://acervo.org/xyz-124 agora."
        );
        assert_eq!(result.recommended_links[0].title, "XYZ");
        assert_eq!(result.search_terms_used, vec!["xyz"]);
    }

    #[tokio::test]
    async fn test_free_text_exhaustion_is_an_error() {
        let synthesis = ScriptedModel::new(vec![]);
        let pipeline = pipeline(
            PromptStrategy::FreeText,
            ScriptedModel::new(vec![]),
            synthesis.clone(),
            searcher(vec![]),
        );

        let (stage, events) = collect(&pipeline, request("xyz")).await;
        assert_eq!(stage, Stage::Error);
        assert_eq!(synthesis.calls.load(Ordering::SeqCst), 4);
        let result = single_terminal(&events).result().unwrap();
        assert_eq!(result.answer_text, messages::APOLOGY);
        assert_eq!(result.all_candidate_identifiers, vec!["https://acervo.org/xyz-124"]);
    }

    #[tokio::test]
    async fn test_cancelled_run_emits_nothing() {
        let pipeline = pipeline(
            PromptStrategy::FreeText,
            ScriptedModel::new(vec![]),
            ScriptedModel::new(vec![]),
            searcher(vec![]),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (sink, mut rx) = EventSink::channel(8, cancel);

        assert_eq!(pipeline.run(request("xyz"), &sink).await, Stage::Cancelled);
        drop(sink);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_receiver_cancels_spawned_run() {
        let pipeline = Arc::new(pipeline(
            PromptStrategy::FreeText,
            ScriptedModel::new(vec![]),
            ScriptedModel::new(vec![Reply::Chunks(vec!["uma resposta longa o bastante"])]),
            searcher(vec![]),
        ));
        let cancel = CancellationToken::new();
        let rx = pipeline.spawn(request("xyz"), cancel.clone());
        drop(rx);

        tokio::time::timeout(std::time::Duration::from_secs(5), cancel.cancelled())
            .await
            .expect("run should notice the closed receiver");
    }

    #[tokio::test]
    async fn test_panicking_backend_leaves_the_others_searching() {
        let searcher = Arc::new(HybridSearcher::new(
            vec![Arc::new(FixedBackend {
                source: SourceKind::Vector,
                docs: vec![("https://acervo.org/xyz-124", "XYZ")],
            })],
            vec![Arc::new(PanickingBackend)],
            &SearchConfig::default(),
        ));
        let pipeline = pipeline(
            PromptStrategy::FreeText,
            ScriptedModel::new(vec![]),
            ScriptedModel::new(vec![Reply::Chunks(vec![
                "Leia sobre **XYZ** ",
                "em https://acervo.org/xyz-124 agora.",
            ])]),
            searcher,
        );

        let (stage, events) = collect(&pipeline, request("xyz")).await;
        assert_eq!(stage, Stage::Done);
        let done = single_terminal(&events);
        assert_eq!(done.kind, EventKind::Done);
        let result = done.result().unwrap();
        assert_eq!(result.all_candidate_identifiers, vec!["https://acervo.org/xyz-124"]);
        assert_eq!(result.recommended_links[0].identifier, "https://acervo.org/xyz-124");
    }

    struct PanickingIdentifiers;

    #[async_trait]
    impl IdentifierSource for PanickingIdentifiers {
        async fn fetch_all(&self) -> anyhow::Result<Vec<String>> {
            panic!("identifier file corrupted")
        }
    }

    #[tokio::test]
    async fn test_panic_becomes_error_event() {
        let expansion = ScriptedModel::new(vec![Reply::Text("xyz, acervo, documentos")]);
        let synthesis = ScriptedModel::new(vec![Reply::Text(STRUCTURED_JSON)]);
        let registry = Arc::new(IdentifierRegistry::new(Arc::new(PanickingIdentifiers)));
        let pipeline = Pipeline::new(
            expansion,
            synthesis,
            searcher(vec![]),
            registry,
            &config(PromptStrategy::Structured),
        );

        let (stage, events) = collect(&pipeline, request("xyz")).await;
        assert_eq!(stage, Stage::Error);
        let error = single_terminal(&events);
        assert_eq!(error.kind, EventKind::Error);
        assert_eq!(error.result().unwrap().answer_text, messages::APOLOGY);
    }
}
