//! Turn-taking engine: the only writer of session aggregates.
//!
//! Every mutating operation follows the same path: take the session lock,
//! load, consult the state machine, consult the usage governor, mutate,
//! save, broadcast. A turn keeps the lock across the provider call, so two
//! callers can never observe the same next speaker.

use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{instrument, Span};

use super::context;
use super::export::{self, ExportFormat, Transcript};
use super::metrics;
use super::providers::{CompletionRequest, ProviderSet};
use super::store::SessionStore;
use super::turn_lock::TurnLocks;
use super::usage::UsageGovernor;
use crate::config::{ParticipantsConfig, TurnConfig};
use crate::error::BrainstormError;
use crate::models::{
    Account, Attachment, DiscussionFormat, Message, ModerationLevel, Participant, Participants,
    Session, SessionAction, SessionSettings, SessionSummary, Speaker,
};
use crate::realtime::{brainstorm_room, RoomBroadcaster, ServerEvent};

/// Parameters for a new session. Unset fields take configured defaults.
#[derive(Debug, Clone, Default)]
pub struct NewSession {
    pub topic: String,
    pub description: Option<String>,
    pub claude_model: Option<String>,
    pub grok_model: Option<String>,
    pub turn_duration: Option<u32>,
    pub max_turns: Option<u32>,
    pub moderation_level: Option<ModerationLevel>,
    pub format: Option<DiscussionFormat>,
}

pub struct TurnEngine {
    store: Arc<dyn SessionStore>,
    governor: UsageGovernor,
    providers: ProviderSet,
    locks: TurnLocks,
    broadcaster: Arc<dyn RoomBroadcaster>,
    turns: TurnConfig,
    participants: ParticipantsConfig,
}

impl TurnEngine {
    pub fn new(
        store: Arc<dyn SessionStore>,
        governor: UsageGovernor,
        providers: ProviderSet,
        broadcaster: Arc<dyn RoomBroadcaster>,
        turns: TurnConfig,
        participants: ParticipantsConfig,
    ) -> Self {
        Self {
            store,
            governor,
            providers,
            locks: TurnLocks::new(),
            broadcaster,
            turns,
            participants,
        }
    }

    pub fn locks(&self) -> &TurnLocks {
        &self.locks
    }

    fn broadcast(&self, session_id: &str, event: ServerEvent) {
        let delivered = self.broadcaster.broadcast(&brainstorm_room(session_id), &event);
        tracing::debug!(
            session_id = %session_id,
            event = event.name(),
            delivered,
            "Broadcast session event"
        );
    }

    #[instrument(skip(self, user, request), fields(user_id = %user.id, session_id))]
    pub async fn start(&self, user: &Account, request: NewSession) -> Result<Session, BrainstormError> {
        let topic = request.topic.trim().to_string();
        if topic.is_empty() {
            return Err(BrainstormError::Validation("topic is required".to_string()));
        }
        let description = request.description.unwrap_or_default();

        let settings = SessionSettings {
            turn_duration: request
                .turn_duration
                .unwrap_or(self.turns.default_turn_duration_secs),
            max_turns: request.max_turns.unwrap_or(self.turns.default_max_turns),
            moderation_level: request.moderation_level.unwrap_or_default(),
            format: request.format.unwrap_or_default(),
        };
        settings.validate()?;

        let participant = |speaker: Speaker, model: Option<String>, default_model: &str| Participant {
            model: model
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| default_model.to_string()),
            system_prompt: context::system_prompt(speaker, &topic, &description, &settings),
        };
        let participants = Participants {
            claude: participant(
                Speaker::Claude,
                request.claude_model,
                &self.participants.claude.model,
            ),
            grok: participant(
                Speaker::Grok,
                request.grok_model,
                &self.participants.grok.model,
            ),
        };

        let session = Session::new(user.id.clone(), topic, description, participants, settings);
        Span::current().record("session_id", session.id.as_str());

        self.store.insert(&session).await?;

        tracing::info!(
            topic = %session.topic,
            max_turns = session.settings.max_turns,
            claude_model = %session.participants.claude.model,
            grok_model = %session.participants.grok.model,
            "Brainstorm session started"
        );
        Ok(session)
    }

    pub async fn get(&self, user: &Account, session_id: &str) -> Result<Session, BrainstormError> {
        self.store.load(session_id, &user.id).await
    }

    pub async fn list(&self, user: &Account) -> Result<Vec<SessionSummary>, BrainstormError> {
        self.store.list(&user.id).await
    }

    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn delete(&self, user: &Account, session_id: &str) -> Result<(), BrainstormError> {
        self.store.delete(session_id, &user.id).await?;
        self.broadcast(
            session_id,
            ServerEvent::BrainstormDeleted {
                session_id: session_id.to_string(),
            },
        );
        tracing::info!("Brainstorm session deleted");
        Ok(())
    }

    pub async fn export(
        &self,
        user: &Account,
        session_id: &str,
        format: ExportFormat,
    ) -> Result<Transcript, BrainstormError> {
        let session = self.store.load(session_id, &user.id).await?;
        export::export(&session, format)
    }

    /// Append a human interjection. Does not consume an AI turn.
    #[instrument(skip(self, user, content, attachments), fields(user_id = %user.id))]
    pub async fn post_user_message(
        &self,
        user: &Account,
        session_id: &str,
        content: String,
        attachments: Vec<Attachment>,
    ) -> Result<Message, BrainstormError> {
        let _guard = self
            .locks
            .acquire(session_id, self.turns.lock_timeout())
            .await?;

        let mut session = self.store.load(session_id, &user.id).await?;
        session.status.ensure_active("post a message")?;

        let tokens = context::estimate_tokens(&content);
        let message = session.add_message(Speaker::User, content, attachments, tokens)?;

        self.governor.admit(&user.id, user.tier, Utc::now()).await?;
        self.store.save(&mut session).await?;

        self.broadcast(
            session_id,
            ServerEvent::transcript_message(session_id, &message),
        );
        tracing::info!(message_id = %message.id, "User message added");
        Ok(message)
    }

    /// Produce the next AI turn.
    #[instrument(skip(self, user), fields(user_id = %user.id, speaker))]
    pub async fn continue_discussion(
        &self,
        user: &Account,
        session_id: &str,
    ) -> Result<Message, BrainstormError> {
        let _guard = self
            .locks
            .acquire(session_id, self.turns.lock_timeout())
            .await?;

        let mut session = self.store.load(session_id, &user.id).await?;
        session.status.ensure_active("continue the discussion")?;
        if session.is_finished() {
            return Err(BrainstormError::InvalidState(format!(
                "session reached its limit of {} turns",
                session.settings.max_turns
            )));
        }

        self.governor.admit(&user.id, user.tier, Utc::now()).await?;

        let speaker = session.next_speaker();
        Span::current().record("speaker", speaker.as_str());

        let (participant, provider) = match (
            session.participants.for_speaker(speaker).cloned(),
            self.providers.for_speaker(speaker),
        ) {
            (Some(participant), Some(provider)) => (participant, provider),
            _ => {
                return Err(BrainstormError::Store(anyhow::anyhow!(
                    "no participant configured for {}",
                    speaker
                )))
            }
        };

        let (history, attachments) = context::compile(&session, self.turns.context_window);
        let request = CompletionRequest {
            model: participant.model.clone(),
            system_prompt: participant.system_prompt.clone(),
            context: history,
            attachments,
        };

        self.broadcast(
            session_id,
            ServerEvent::BrainstormThinking {
                session_id: session_id.to_string(),
                speaker,
            },
        );

        let timeout = session.settings.turn_timeout();
        let started = Instant::now();
        let outcome = tokio::time::timeout(timeout, provider.complete(request)).await;
        let latency = started.elapsed().as_secs_f64();

        let failure = match outcome {
            Ok(Ok(completion)) => {
                let tokens = completion.tokens_used;
                match session.add_message(speaker, completion.content, completion.attachments, tokens) {
                    Ok(message) => {
                        self.store.save(&mut session).await?;
                        metrics::record_turn(speaker.as_str(), "success", latency);
                        metrics::record_tokens(&participant.model, tokens);

                        self.broadcast(
                            session_id,
                            ServerEvent::transcript_message(session_id, &message),
                        );
                        self.governor
                            .record_usage(session_id, &user.id, speaker, &participant.model, tokens)
                            .await;

                        tracing::info!(
                            message_id = %message.id,
                            tokens,
                            current_turn = session.current_turn(),
                            latency_ms = (latency * 1000.0) as u64,
                            "Turn completed"
                        );
                        return Ok(message);
                    }
                    Err(e) => {
                        metrics::record_turn(speaker.as_str(), "invalid_completion", latency);
                        format!("{} returned an unusable completion: {}", speaker.display_name(), e)
                    }
                }
            }
            Ok(Err(e)) => {
                metrics::record_turn(speaker.as_str(), "provider_error", latency);
                format!("{} provider failed: {}", speaker.display_name(), e)
            }
            Err(_) => {
                metrics::record_turn(speaker.as_str(), "timeout", latency);
                format!(
                    "{} did not respond within {} seconds",
                    speaker.display_name(),
                    timeout.as_secs()
                )
            }
        };

        tracing::warn!(reason = %failure, "Turn failed, moving session to error");
        session.fail(failure.clone())?;
        self.store.save(&mut session).await?;
        self.broadcast(
            session_id,
            ServerEvent::BrainstormStatus {
                session_id: session_id.to_string(),
                status: session.status,
                error: session.error.clone(),
            },
        );
        Err(BrainstormError::ProviderFailure(failure))
    }

    pub async fn pause(&self, user: &Account, session_id: &str) -> Result<Session, BrainstormError> {
        self.transition(user, session_id, SessionAction::Pause).await
    }

    pub async fn resume(&self, user: &Account, session_id: &str) -> Result<Session, BrainstormError> {
        self.transition(user, session_id, SessionAction::Resume).await
    }

    pub async fn stop(&self, user: &Account, session_id: &str) -> Result<Session, BrainstormError> {
        self.transition(user, session_id, SessionAction::Stop).await
    }

    /// Control actions queue behind an in-flight turn for up to its full
    /// duration, then apply to whatever state that turn left behind.
    #[instrument(skip(self, user), fields(user_id = %user.id, action = action.as_str()))]
    async fn transition(
        &self,
        user: &Account,
        session_id: &str,
        action: SessionAction,
    ) -> Result<Session, BrainstormError> {
        let peek = self.store.load(session_id, &user.id).await?;
        let wait = peek.settings.turn_timeout() + self.turns.lock_timeout();
        let _guard = self.locks.acquire(session_id, wait).await?;

        let mut session = self.store.load(session_id, &user.id).await?;
        let from = session.status;
        let to = session.apply(action)?;
        self.store.save(&mut session).await?;

        self.broadcast(
            session_id,
            ServerEvent::BrainstormStatus {
                session_id: session_id.to_string(),
                status: to,
                error: None,
            },
        );
        tracing::info!(from = %from, to = %to, "Session status changed");
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProviderConfig, UsageLimitsConfig};
    use crate::models::{SessionStatus, UsageTier};
    use crate::services::providers::mock::MockCompletionProvider;
    use crate::services::store::InMemorySessionStore;
    use crate::services::usage::InMemoryUsageStore;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(String, String)>>,
    }

    impl RoomBroadcaster for Recorder {
        fn broadcast(&self, room: &str, event: &ServerEvent) -> usize {
            self.events
                .lock()
                .unwrap()
                .push((room.to_string(), event.name().to_string()));
            1
        }
    }

    struct Harness {
        engine: TurnEngine,
        recorder: Arc<Recorder>,
        claude: Arc<MockCompletionProvider>,
        user: Account,
    }

    fn harness() -> Harness {
        harness_with_delay(Duration::ZERO)
    }

    fn harness_with_delay(claude_delay: Duration) -> Harness {
        let recorder = Arc::new(Recorder::default());
        let claude = Arc::new(MockCompletionProvider::new("Claude").with_delay(claude_delay));
        let grok = Arc::new(MockCompletionProvider::new("Grok"));
        let provider_config = |model: &str| ProviderConfig {
            model: model.to_string(),
            endpoint: None,
            api_key: None,
        };

        let engine = TurnEngine::new(
            Arc::new(InMemorySessionStore::new()),
            UsageGovernor::new(
                Arc::new(InMemoryUsageStore::new()),
                UsageLimitsConfig::default(),
            ),
            ProviderSet {
                claude: claude.clone(),
                grok,
            },
            recorder.clone(),
            TurnConfig::default(),
            ParticipantsConfig {
                claude: provider_config("claude-default"),
                grok: provider_config("grok-default"),
            },
        );

        Harness {
            engine,
            recorder,
            claude,
            user: Account::new("owner", UsageTier::Pro),
        }
    }

    fn topic(max_turns: u32) -> NewSession {
        NewSession {
            topic: "AI Ethics".to_string(),
            max_turns: Some(max_turns),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn start_applies_defaults_and_prompts() {
        let h = harness();
        let session = h.engine.start(&h.user, topic(5)).await.unwrap();

        assert_eq!(session.status, SessionStatus::Active);
        assert!(session.messages.is_empty());
        assert_eq!(session.settings.turn_duration, 60);
        assert_eq!(session.participants.claude.model, "claude-default");
        assert!(session.participants.grok.system_prompt.contains("AI Ethics"));
    }

    #[tokio::test]
    async fn start_rejects_out_of_range_settings() {
        let h = harness();
        let err = h.engine.start(&h.user, topic(51)).await.unwrap_err();
        assert!(matches!(err, BrainstormError::Validation(_)));

        let err = h
            .engine
            .start(
                &h.user,
                NewSession {
                    topic: "  ".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BrainstormError::Validation(_)));
    }

    #[tokio::test]
    async fn continue_broadcasts_thinking_then_message() {
        let h = harness();
        let session = h.engine.start(&h.user, topic(5)).await.unwrap();

        let message = h.engine.continue_discussion(&h.user, &session.id).await.unwrap();
        assert_eq!(message.speaker, Speaker::Claude);

        let events = h.recorder.events.lock().unwrap().clone();
        let room = brainstorm_room(&session.id);
        assert_eq!(
            events,
            vec![
                (room.clone(), "brainstorm:thinking".to_string()),
                (room, "brainstorm:message".to_string()),
            ]
        );
        assert!(h.engine.locks().is_empty());
    }

    #[tokio::test]
    async fn provider_failure_moves_session_to_error() {
        let h = harness();
        let session = h.engine.start(&h.user, topic(5)).await.unwrap();
        h.engine.continue_discussion(&h.user, &session.id).await.unwrap();
        h.engine.continue_discussion(&h.user, &session.id).await.unwrap();

        h.claude.set_failing(true);
        let err = h
            .engine
            .continue_discussion(&h.user, &session.id)
            .await
            .unwrap_err();
        assert!(matches!(err, BrainstormError::ProviderFailure(_)));

        let stored = h.engine.get(&h.user, &session.id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Error);
        assert_eq!(stored.messages.len(), 2);
        assert!(stored.error.unwrap().contains("Claude"));

        let err = h
            .engine
            .continue_discussion(&h.user, &session.id)
            .await
            .unwrap_err();
        assert!(matches!(err, BrainstormError::InvalidState(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_times_out_into_error() {
        let h = harness_with_delay(Duration::from_secs(45));
        let session = h
            .engine
            .start(
                &h.user,
                NewSession {
                    turn_duration: Some(30),
                    ..topic(5)
                },
            )
            .await
            .unwrap();
        h.engine
            .post_user_message(&h.user, &session.id, "opening thought".into(), vec![])
            .await
            .unwrap();

        let err = h
            .engine
            .continue_discussion(&h.user, &session.id)
            .await
            .unwrap_err();
        match err {
            BrainstormError::ProviderFailure(reason) => assert!(reason.contains("30 seconds")),
            other => panic!("expected provider failure, got {:?}", other),
        }

        let stored = h.engine.get(&h.user, &session.id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Error);
        assert_eq!(stored.messages.len(), 1);
        assert_eq!(stored.messages[0].speaker, Speaker::User);
        assert_eq!(h.claude.calls(), 1);
        assert!(h.engine.locks().is_empty());
    }

    #[tokio::test]
    async fn finished_session_refuses_more_turns_but_accepts_user_messages() {
        let h = harness();
        let session = h.engine.start(&h.user, topic(5)).await.unwrap();
        for _ in 0..10 {
            h.engine.continue_discussion(&h.user, &session.id).await.unwrap();
        }

        let err = h
            .engine
            .continue_discussion(&h.user, &session.id)
            .await
            .unwrap_err();
        assert!(matches!(err, BrainstormError::InvalidState(_)));

        let stored = h.engine.get(&h.user, &session.id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Active);
        assert!(stored.is_finished());

        h.engine
            .post_user_message(&h.user, &session.id, "wrap up?".into(), vec![])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn stop_is_terminal() {
        let h = harness();
        let session = h.engine.start(&h.user, topic(5)).await.unwrap();
        let stopped = h.engine.stop(&h.user, &session.id).await.unwrap();
        assert_eq!(stopped.status, SessionStatus::Completed);
        assert!(stopped.duration.is_some());

        for result in [
            h.engine.pause(&h.user, &session.id).await.map(|_| ()),
            h.engine.resume(&h.user, &session.id).await.map(|_| ()),
            h.engine.stop(&h.user, &session.id).await.map(|_| ()),
            h.engine
                .post_user_message(&h.user, &session.id, "hi".into(), vec![])
                .await
                .map(|_| ()),
        ] {
            assert!(matches!(result, Err(BrainstormError::InvalidState(_))));
        }

        assert!(h
            .engine
            .export(&h.user, &session.id, ExportFormat::Markdown)
            .await
            .is_ok());
    }
}
