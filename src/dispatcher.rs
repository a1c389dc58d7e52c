//! Per-turn decision logic: answer a message from the knowledge base or fall back.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info};

use crate::error::Result;
use crate::qna::AnswerSource;
use crate::telemetry::TelemetrySink;
use crate::types::{ActivityKind, InboundMessage, TelemetryEvent};

pub const EMPTY_MESSAGE_REPLY: &str = "this doesn't work unless you say something first";
pub const NO_ANSWER_REPLY: &str = "sorry, I don't understand";
pub const QNA_EVENT_NAME: &str = "QnaMessage";

/// Where the reply for the current turn goes.
#[async_trait]
pub trait ReplyChannel: Send + Sync {
    async fn send_reply(&self, text: &str) -> Result<()>;
}

/// Stateless turn handler, shared by every concurrent turn.
pub struct TurnDispatcher {
    answers: Arc<dyn AnswerSource>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl TurnDispatcher {
    pub fn new(answers: Arc<dyn AnswerSource>, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self { answers, telemetry }
    }

    /// Handles one inbound activity, sending at most one reply.
    ///
    /// Knowledge-base and reply failures are returned to the caller; telemetry never fails a turn.
    pub async fn handle_turn(&self, message: &InboundMessage, reply: &dyn ReplyChannel) -> Result<()> {
        let text = match &message.kind {
            ActivityKind::Other(name) => {
                debug!("Non-message activity: {}", name);
                return reply.send_reply(&format!("{name} event detected")).await;
            }
            ActivityKind::Message => message.text.as_deref().unwrap_or_default(),
        };

        if text.trim().is_empty() {
            debug!("Empty message, sending prompt");
            return reply.send_reply(EMPTY_MESSAGE_REPLY).await;
        }

        let answers = self.answers.get_answers(text).await?;

        let Some(best) = answers.first() else {
            info!("No knowledge base answer for: {}", text);
            return reply.send_reply(NO_ANSWER_REPLY).await;
        };

        info!("Answering with score {}: {}", best.score, text);
        let event = TelemetryEvent::from_answer(text, best);
        self.telemetry
            .track_event(QNA_EVENT_NAME, event.into_properties());

        reply.send_reply(&best.answer).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use url::Url;

    use super::*;
    use crate::error::BotError;
    use crate::telemetry::AppInsightsSink;
    use crate::types::ScoredAnswer;

    #[derive(Default)]
    struct FakeAnswers {
        answers: Vec<ScoredAnswer>,
        fail: bool,
        questions: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AnswerSource for FakeAnswers {
        async fn get_answers(&self, question: &str) -> Result<Vec<ScoredAnswer>> {
            self.questions.lock().unwrap().push(question.to_string());
            if self.fail {
                return Err(BotError::QnaApi {
                    status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                    message: "down".to_string(),
                });
            }
            Ok(self.answers.clone())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<(String, HashMap<String, String>)>>,
    }

    impl TelemetrySink for RecordingSink {
        fn track_event(&self, name: &str, properties: HashMap<String, String>) {
            self.events.lock().unwrap().push((name.to_string(), properties));
        }
    }

    #[derive(Default)]
    struct RecordingReply {
        sent: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl ReplyChannel for RecordingReply {
        async fn send_reply(&self, text: &str) -> Result<()> {
            if self.fail {
                return Err(BotError::Config("reply channel closed".to_string()));
            }
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    fn bienvenido() -> ScoredAnswer {
        ScoredAnswer {
            answer: "Bienvenido".to_string(),
            score: 0.95,
            questions: vec!["hola".to_string(), "buenas".to_string()],
        }
    }

    fn setup(answers: FakeAnswers) -> (TurnDispatcher, Arc<FakeAnswers>, Arc<RecordingSink>) {
        let answers = Arc::new(answers);
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = TurnDispatcher::new(answers.clone(), sink.clone());
        (dispatcher, answers, sink)
    }

    #[tokio::test]
    async fn answers_with_best_result_and_tracks_it() {
        let (dispatcher, answers, sink) = setup(FakeAnswers {
            answers: vec![bienvenido()],
            ..Default::default()
        });
        let reply = RecordingReply::default();

        dispatcher
            .handle_turn(&InboundMessage::message("hola"), &reply)
            .await
            .unwrap();

        assert_eq!(*reply.sent.lock().unwrap(), ["Bienvenido"]);
        assert_eq!(*answers.questions.lock().unwrap(), ["hola"]);

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        let (name, props) = &events[0];
        assert_eq!(name, QNA_EVENT_NAME);
        assert_eq!(props["Question"], "hola");
        assert_eq!(props["Score"], "0.95");
        assert_eq!(props["MatchedQuestion"], "hola");
        assert_eq!(props["Answer"], "Bienvenido");
    }

    #[tokio::test]
    async fn only_first_answer_is_used() {
        let second = ScoredAnswer {
            answer: "Hola a ti".to_string(),
            score: 0.5,
            questions: vec!["hola?".to_string()],
        };
        let (dispatcher, _, sink) = setup(FakeAnswers {
            answers: vec![bienvenido(), second],
            ..Default::default()
        });
        let reply = RecordingReply::default();

        dispatcher
            .handle_turn(&InboundMessage::message("hola"), &reply)
            .await
            .unwrap();

        assert_eq!(*reply.sent.lock().unwrap(), ["Bienvenido"]);
        assert_eq!(sink.events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn no_answers_sends_fallback_without_telemetry() {
        let (dispatcher, answers, sink) = setup(FakeAnswers::default());
        let reply = RecordingReply::default();

        dispatcher
            .handle_turn(&InboundMessage::message("asdkjfh"), &reply)
            .await
            .unwrap();

        assert_eq!(*reply.sent.lock().unwrap(), [NO_ANSWER_REPLY]);
        assert_eq!(answers.questions.lock().unwrap().len(), 1);
        assert!(sink.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_or_blank_text_skips_knowledge_base() {
        let inputs = [
            InboundMessage::message(""),
            InboundMessage::message("   \t\n"),
            InboundMessage {
                kind: ActivityKind::Message,
                text: None,
            },
        ];

        for input in inputs {
            let (dispatcher, answers, sink) = setup(FakeAnswers {
                answers: vec![bienvenido()],
                ..Default::default()
            });
            let reply = RecordingReply::default();

            dispatcher.handle_turn(&input, &reply).await.unwrap();

            assert_eq!(*reply.sent.lock().unwrap(), [EMPTY_MESSAGE_REPLY]);
            assert!(answers.questions.lock().unwrap().is_empty());
            assert!(sink.events.lock().unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn other_events_are_announced() {
        for name in ["reaction_add", "conversationUpdate", "typing"] {
            let (dispatcher, answers, sink) = setup(FakeAnswers {
                answers: vec![bienvenido()],
                ..Default::default()
            });
            let reply = RecordingReply::default();

            dispatcher
                .handle_turn(&InboundMessage::event(name), &reply)
                .await
                .unwrap();

            assert_eq!(
                *reply.sent.lock().unwrap(),
                [format!("{name} event detected")]
            );
            assert!(answers.questions.lock().unwrap().is_empty());
            assert!(sink.events.lock().unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn knowledge_base_failure_propagates_without_reply() {
        let (dispatcher, _, sink) = setup(FakeAnswers {
            fail: true,
            ..Default::default()
        });
        let reply = RecordingReply::default();

        let err = dispatcher
            .handle_turn(&InboundMessage::message("hola"), &reply)
            .await
            .unwrap_err();

        assert!(matches!(err, BotError::QnaApi { .. }));
        assert!(reply.sent.lock().unwrap().is_empty());
        assert!(sink.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn reply_failure_propagates() {
        let (dispatcher, _, _) = setup(FakeAnswers {
            answers: vec![bienvenido()],
            ..Default::default()
        });
        let reply = RecordingReply {
            fail: true,
            ..Default::default()
        };

        assert!(
            dispatcher
                .handle_turn(&InboundMessage::message("hola"), &reply)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn failing_telemetry_does_not_change_reply() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v2/track")
            .with_status(500)
            .create_async()
            .await;

        let endpoint = Url::parse(&server.url()).unwrap();
        let sink = AppInsightsSink::new(reqwest::Client::new(), &endpoint, "ikey".to_string())
            .unwrap();
        let dispatcher = TurnDispatcher::new(
            Arc::new(FakeAnswers {
                answers: vec![bienvenido()],
                ..Default::default()
            }),
            Arc::new(sink),
        );
        let reply = RecordingReply::default();

        dispatcher
            .handle_turn(&InboundMessage::message("hola"), &reply)
            .await
            .unwrap();

        for _ in 0..100 {
            if mock.matched_async().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        mock.assert_async().await;
        assert_eq!(*reply.sent.lock().unwrap(), ["Bienvenido"]);
    }
}
