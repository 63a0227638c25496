use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::models::Message;
use crate::providers::{AiProvider, ChatRequest, ModelInfo, ProviderError, StreamEvent};
use crate::services::conversation::{ConversationStore, StreamedTurn};
use crate::services::request_log::RequestLog;
use crate::services::settings::AppSettings;
use crate::services::storage::{Durability, StoreError};

/// Parameters needed to dispatch a chat request to the provider.
pub struct ChatDispatchParams<'a> {
    pub provider: Arc<dyn AiProvider>,
    pub api_key: &'a str,
    pub settings: &'a AppSettings,
}

/// Progress reported while a turn runs.
#[derive(Debug)]
pub enum TurnEvent<'a> {
    Token(&'a str),
    PersistWarning(StoreError),
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub reply: String,
    pub tokens_in: Option<i64>,
    pub tokens_out: Option<i64>,
}

#[derive(Debug, Error)]
pub enum TurnError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("No response from the provider within {0:?}")]
    Timeout(Duration),

    #[error("Generation stopped")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TurnError {
    pub fn hint(&self) -> &'static str {
        match self {
            TurnError::Provider(e) => e.hint(),
            TurnError::Timeout(_) => {
                "The provider stopped responding. Check your connection and retry."
            }
            TurnError::Cancelled => "The reply was discarded. Send the message again to retry.",
            TurnError::Store(_) => "The reply could not be recorded. Try again.",
        }
    }
}

/// Build a `ChatRequest` from the conversation and settings.
pub fn build_request(api_key: &str, messages: &[Message], settings: &AppSettings) -> ChatRequest {
    ChatRequest {
        api_key: api_key.to_string(),
        model: settings.model.clone(),
        messages: messages.to_vec(),
        base_url: settings.base_url.clone(),
        temperature: Some(settings.temperature),
        max_tokens: settings.max_tokens,
        top_p: Some(settings.top_p),
    }
}

/// Run one chat turn: record the user message, fetch the reply, and commit
/// it. On any failure the partial reply is discarded and nothing from the
/// turn stays in the conversation.
pub async fn run_turn<F>(
    store: &mut ConversationStore,
    log: &mut RequestLog,
    params: &ChatDispatchParams<'_>,
    user_text: &str,
    cancel_token: CancellationToken,
    mut on_event: F,
) -> Result<TurnOutcome, TurnError>
where
    F: FnMut(TurnEvent<'_>),
{
    report(store.append_user(user_text), &mut on_event);

    let request = build_request(params.api_key, store.messages(), params.settings);
    tracing::debug!(provider = params.provider.name(), ?request, "Dispatching chat request");

    let mut turn = store.begin_streamed_turn();
    let result = if params.settings.stream_responses {
        stream_into(&mut turn, params, request, &cancel_token, &mut on_event).await
    } else {
        complete_into(&mut turn, params, request, &cancel_token, &mut on_event).await
    };

    match result {
        Ok((tokens_in, tokens_out)) => {
            let reply = turn.content().to_string();
            report(store.commit_streamed_turn(turn)?, &mut on_event);

            // Logging failures never reach the user.
            let _ = log.record(user_text, &reply);

            Ok(TurnOutcome {
                reply,
                tokens_in,
                tokens_out,
            })
        }
        Err(e) => {
            tracing::warn!("Chat turn failed: {}", e);
            match store.abort_streamed_turn(turn) {
                Ok(durability) => report(durability, &mut on_event),
                Err(stale) => tracing::error!("Failed to discard turn: {}", stale),
            }
            Err(e)
        }
    }
}

fn report<F>(durability: Durability, on_event: &mut F)
where
    F: FnMut(TurnEvent<'_>),
{
    if let Some(warning) = durability.warning() {
        on_event(TurnEvent::PersistWarning(warning));
    }
}

async fn stream_into<F>(
    turn: &mut StreamedTurn,
    params: &ChatDispatchParams<'_>,
    request: ChatRequest,
    cancel_token: &CancellationToken,
    on_event: &mut F,
) -> Result<(Option<i64>, Option<i64>), TurnError>
where
    F: FnMut(TurnEvent<'_>),
{
    let (tx, mut rx) = mpsc::channel::<StreamEvent>(64);
    let provider = Arc::clone(&params.provider);
    let idle_timeout = params.settings.stream_idle_timeout();

    let stream_handle = tokio::spawn(async move {
        if let Err(e) = provider.stream_message(request, tx.clone()).await {
            let _ = tx.send(StreamEvent::Error(e)).await;
        }
    });

    let result = loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break Err(TurnError::Cancelled),
            event = tokio::time::timeout(idle_timeout, rx.recv()) => {
                match event {
                    Err(_) => break Err(TurnError::Timeout(idle_timeout)),
                    Ok(Some(StreamEvent::Token(chunk))) => {
                        turn.append_chunk(&chunk);
                        on_event(TurnEvent::Token(&chunk));
                    }
                    Ok(Some(StreamEvent::Done { tokens_in, tokens_out })) => {
                        break Ok((tokens_in, tokens_out));
                    }
                    Ok(Some(StreamEvent::Error(e))) => break Err(e.into()),
                    Ok(None) => {
                        break Err(ProviderError::StreamInterrupted(
                            "Stream ended unexpectedly".to_string(),
                        )
                        .into());
                    }
                }
            }
        }
    };

    stream_handle.abort();
    result
}

async fn complete_into<F>(
    turn: &mut StreamedTurn,
    params: &ChatDispatchParams<'_>,
    request: ChatRequest,
    cancel_token: &CancellationToken,
    on_event: &mut F,
) -> Result<(Option<i64>, Option<i64>), TurnError>
where
    F: FnMut(TurnEvent<'_>),
{
    let timeout = params.settings.request_timeout();
    let response = tokio::select! {
        biased;
        _ = cancel_token.cancelled() => return Err(TurnError::Cancelled),
        result = tokio::time::timeout(timeout, params.provider.send_message(request)) => {
            result.map_err(|_| TurnError::Timeout(timeout))??
        }
    };

    tracing::debug!(model = %response.model, "Received complete reply");
    turn.append_chunk(&response.content);
    on_event(TurnEvent::Token(&response.content));
    Ok((response.tokens_in, response.tokens_out))
}

/// Check an API key against the provider's model listing.
pub async fn validate_api_key(
    provider: &dyn AiProvider,
    api_key: &str,
    settings: &AppSettings,
) -> Result<Vec<ModelInfo>, ProviderError> {
    let timeout = settings.request_timeout();
    tokio::time::timeout(
        timeout,
        provider.validate_credentials(api_key, &settings.base_url),
    )
    .await
    .map_err(|_| ProviderError::NetworkError(format!("No response within {:?}", timeout)))?
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::models::Role;
    use crate::providers::types::ChatResponse;
    use crate::services::session::{test_context, SessionContext};

    /// Replays a fixed list of stream events.
    struct ScriptedProvider {
        events: Vec<StreamEvent>,
        fail_before_stream: Option<ProviderError>,
        hang_after_events: bool,
        seen: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedProvider {
        fn new(events: Vec<StreamEvent>) -> Self {
            Self {
                events,
                fail_before_stream: None,
                hang_after_events: false,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn tokens(chunks: &[&str]) -> Self {
            let mut events: Vec<StreamEvent> = chunks
                .iter()
                .map(|c| StreamEvent::Token(c.to_string()))
                .collect();
            events.push(StreamEvent::Done {
                tokens_in: Some(10),
                tokens_out: Some(3),
            });
            Self::new(events)
        }
    }

    #[async_trait]
    impl AiProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn validate_credentials(
            &self,
            api_key: &str,
            _base_url: &str,
        ) -> Result<Vec<ModelInfo>, ProviderError> {
            if api_key == "good" {
                Ok(vec![ModelInfo {
                    id: "model-a".into(),
                }])
            } else {
                Err(ProviderError::AuthError("Invalid API key".into()))
            }
        }

        async fn send_message(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
            self.seen.lock().unwrap().push(request.clone());
            if let Some(e) = &self.fail_before_stream {
                return Err(e.clone());
            }
            let content = self
                .events
                .iter()
                .filter_map(|e| match e {
                    StreamEvent::Token(t) => Some(t.as_str()),
                    _ => None,
                })
                .collect();
            Ok(ChatResponse {
                content,
                model: request.model,
                tokens_in: None,
                tokens_out: None,
            })
        }

        async fn stream_message(
            &self,
            request: ChatRequest,
            tx: mpsc::Sender<StreamEvent>,
        ) -> Result<(), ProviderError> {
            self.seen.lock().unwrap().push(request);
            if let Some(e) = &self.fail_before_stream {
                return Err(e.clone());
            }
            for event in &self.events {
                if tx.send(event.clone()).await.is_err() {
                    return Ok(());
                }
            }
            if self.hang_after_events {
                std::future::pending::<()>().await;
            }
            Ok(())
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        ctx: SessionContext,
        store: ConversationStore,
        log: RequestLog,
        warnings: Vec<StoreError>,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let ctx = test_context(dir.path());
            Self::with_context(dir, ctx)
        }

        fn with_context(dir: tempfile::TempDir, ctx: SessionContext) -> Self {
            let store = ConversationStore::open(&ctx);
            let log = RequestLog::open(&ctx);
            Self {
                _dir: dir,
                ctx,
                store,
                log,
                warnings: Vec::new(),
            }
        }

        async fn run(
            &mut self,
            provider: Arc<dyn AiProvider>,
            text: &str,
            cancel_token: CancellationToken,
        ) -> (Result<TurnOutcome, TurnError>, Vec<String>) {
            let params = ChatDispatchParams {
                provider,
                api_key: "good",
                settings: &self.ctx.settings,
            };
            let mut running = String::new();
            let mut accumulated = Vec::new();
            let warnings = &mut self.warnings;
            let result = run_turn(
                &mut self.store,
                &mut self.log,
                &params,
                text,
                cancel_token,
                |event| match event {
                    TurnEvent::Token(chunk) => {
                        running.push_str(chunk);
                        accumulated.push(running.clone());
                    }
                    TurnEvent::PersistWarning(e) => warnings.push(e),
                },
            )
            .await;
            (result, accumulated)
        }

        fn stored(&self) -> Vec<Message> {
            let json = std::fs::read_to_string(self.ctx.conversation_path()).unwrap();
            serde_json::from_str(&json).unwrap()
        }
    }

    #[tokio::test]
    async fn test_streamed_turn_commits_and_logs() {
        let mut h = Harness::new();
        let provider = Arc::new(ScriptedProvider::tokens(&["Ol", "á, ", "tudo bem?"]));

        let (result, accumulated) = h
            .run(provider.clone(), "Oi Letícia", CancellationToken::new())
            .await;
        let outcome = result.unwrap();

        assert_eq!(outcome.reply, "Olá, tudo bem?");
        assert_eq!(outcome.tokens_in, Some(10));
        assert_eq!(accumulated, vec!["Ol", "Olá, ", "Olá, tudo bem?"]);

        assert_eq!(
            h.stored(),
            vec![
                Message::system("persona"),
                Message::user("Oi Letícia"),
                Message::assistant("Olá, tudo bem?"),
            ]
        );
        assert_eq!(h.log.entries().len(), 1);
        assert_eq!(h.log.entries()[0].response_length, 14);

        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen[0].messages.len(), 2);
        assert_eq!(seen[0].messages[0].role, Role::System);
        assert_eq!(seen[0].top_p, Some(1.0));
    }

    #[tokio::test]
    async fn test_empty_stream_commits_empty_reply() {
        let mut h = Harness::new();
        let provider = Arc::new(ScriptedProvider::tokens(&[]));

        let (result, accumulated) = h.run(provider, "hello", CancellationToken::new()).await;
        assert_eq!(result.unwrap().reply, "");
        assert!(accumulated.is_empty());
        assert_eq!(h.store.messages().last(), Some(&Message::assistant("")));
    }

    #[tokio::test]
    async fn test_stream_error_discards_partial_reply() {
        let mut h = Harness::new();
        let provider = Arc::new(ScriptedProvider::new(vec![
            StreamEvent::Token("par".into()),
            StreamEvent::Token("tial".into()),
            StreamEvent::Error(ProviderError::StreamInterrupted("reset".into())),
        ]));

        let (result, accumulated) = h.run(provider, "hello", CancellationToken::new()).await;
        let err = result.unwrap_err();

        assert!(matches!(
            err,
            TurnError::Provider(ProviderError::StreamInterrupted(_))
        ));
        assert_eq!(accumulated.len(), 2);
        assert_eq!(h.stored(), vec![Message::system("persona")]);
        assert!(h.log.entries().is_empty());
    }

    #[tokio::test]
    async fn test_closed_channel_without_done_is_interrupted() {
        let mut h = Harness::new();
        let provider = Arc::new(ScriptedProvider::new(vec![StreamEvent::Token("a".into())]));

        let (result, _) = h.run(provider, "hello", CancellationToken::new()).await;
        assert!(matches!(
            result,
            Err(TurnError::Provider(ProviderError::StreamInterrupted(_)))
        ));
        assert_eq!(h.store.conversation().len(), 1);
    }

    #[tokio::test]
    async fn test_auth_failure_has_credential_hint() {
        let mut h = Harness::new();
        let mut provider = ScriptedProvider::tokens(&["never"]);
        provider.fail_before_stream = Some(ProviderError::AuthError("Invalid API key".into()));

        let (result, _) = h.run(Arc::new(provider), "hello", CancellationToken::new()).await;
        let err = result.unwrap_err();
        assert_eq!(err.hint(), ProviderError::AuthError(String::new()).hint());
        assert_eq!(h.store.conversation().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_stream_times_out() {
        let mut h = Harness::new();
        let mut provider = ScriptedProvider::new(vec![StreamEvent::Token("slow".into())]);
        provider.hang_after_events = true;

        let (result, accumulated) = h
            .run(Arc::new(provider), "hello", CancellationToken::new())
            .await;
        assert!(matches!(result, Err(TurnError::Timeout(_))));
        assert_eq!(accumulated, vec!["slow"]);
        assert_eq!(h.stored(), vec![Message::system("persona")]);
    }

    #[tokio::test]
    async fn test_cancelled_turn_is_not_recorded() {
        let mut h = Harness::new();
        let provider = Arc::new(ScriptedProvider::tokens(&["a", "b"]));
        let cancel_token = CancellationToken::new();
        cancel_token.cancel();

        let (result, _) = h.run(provider, "hello", cancel_token).await;
        assert!(matches!(result, Err(TurnError::Cancelled)));
        assert_eq!(h.stored(), vec![Message::system("persona")]);
    }

    #[tokio::test]
    async fn test_non_streaming_uses_same_commit_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = test_context(dir.path());
        ctx.settings.stream_responses = false;
        let mut h = Harness::with_context(dir, ctx);
        let provider = Arc::new(ScriptedProvider::tokens(&["one ", "shot"]));

        let (result, accumulated) = h.run(provider, "hello", CancellationToken::new()).await;
        assert_eq!(result.unwrap().reply, "one shot");
        assert_eq!(accumulated, vec!["one shot"]);
        assert_eq!(h.store.messages().last(), Some(&Message::assistant("one shot")));
    }

    #[tokio::test]
    async fn test_log_failure_does_not_fail_turn() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        std::fs::create_dir_all(ctx.request_log_path().join("blocker")).unwrap();
        let mut h = Harness::with_context(dir, ctx);
        let provider = Arc::new(ScriptedProvider::tokens(&["fine"]));

        let (result, _) = h.run(provider, "hello", CancellationToken::new()).await;
        assert_eq!(result.unwrap().reply, "fine");
        assert_eq!(h.store.conversation().len(), 3);
    }

    #[tokio::test]
    async fn test_history_write_failure_is_reported_and_turn_commits() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        std::fs::create_dir_all(ctx.conversation_path().join("blocker")).unwrap();
        let mut h = Harness::with_context(dir, ctx);
        let provider = Arc::new(ScriptedProvider::tokens(&["still ", "here"]));

        let (result, _) = h.run(provider, "hello", CancellationToken::new()).await;
        assert_eq!(result.unwrap().reply, "still here");

        // One warning for the user message and one for the committed reply.
        assert_eq!(h.warnings.len(), 2);
        assert!(h
            .warnings
            .iter()
            .all(|w| matches!(w, StoreError::Io { .. })));
        assert_eq!(
            h.store.messages(),
            &[
                Message::system("persona"),
                Message::user("hello"),
                Message::assistant("still here"),
            ]
        );
        assert_eq!(h.log.entries().len(), 1);
    }

    #[tokio::test]
    async fn test_validate_api_key() {
        let provider = ScriptedProvider::tokens(&[]);
        let settings = AppSettings::default();

        let models = validate_api_key(&provider, "good", &settings).await.unwrap();
        assert_eq!(models[0].id, "model-a");
        assert!(matches!(
            validate_api_key(&provider, "bad", &settings).await,
            Err(ProviderError::AuthError(_))
        ));
    }
}
