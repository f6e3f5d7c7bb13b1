//! Bounded turn dispatcher.
//!
//! Replaces fire-and-forget thread-per-request with two explicit
//! controls:
//!
//! - a semaphore caps concurrently processing turns
//! - a per-user async mutex serializes turns for the same user identity,
//!   so two near-simultaneous messages cannot race on the history
//!   load/save and silently drop an update
//!
//! The dispatcher is also the outermost failure scope: a panicking turn
//! worker still produces a user-visible apology attempt.

use crate::turn::{TurnController, APOLOGY_GENERIC};
use chatbridge_core::channel::{Channel, InboundEvent, OutboundMessage};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tracing::error;

pub struct Dispatcher {
    controller: Arc<TurnController>,
    channel: Arc<dyn Channel>,
    permits: Arc<Semaphore>,
    user_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl Dispatcher {
    pub fn new(
        controller: Arc<TurnController>,
        channel: Arc<dyn Channel>,
        max_workers: usize,
    ) -> Self {
        Self {
            controller,
            channel,
            permits: Arc::new(Semaphore::new(max_workers)),
            user_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Queue one inbound event for processing and return immediately —
    /// the webhook acknowledgement never waits for the turn.
    pub fn dispatch(&self, event: InboundEvent) {
        let controller = self.controller.clone();
        let channel = self.channel.clone();
        let permits = self.permits.clone();
        let user_locks = self.user_locks.clone();
        let user_id = event.user_id.clone();

        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return; // semaphore closed — shutting down
            };

            let lock = {
                let mut locks = user_locks.lock().await;
                locks.entry(user_id.clone()).or_default().clone()
            };
            let _guard = lock.lock().await;

            // Run the turn in its own task so a panic is contained and
            // still ends in a reply attempt.
            let worker = tokio::spawn({
                let controller = controller.clone();
                let event = event.clone();
                async move { controller.handle(event).await }
            });

            if worker.await.is_err() {
                error!(user_id = %user_id, "Turn worker panicked");
                let _ = channel
                    .send(&user_id, None, &OutboundMessage::text(APOLOGY_GENERIC))
                    .await;
            }

            drop(_guard);
            // Drop lock entries nobody is waiting on.
            let mut locks = user_locks.lock().await;
            locks.retain(|_, l| Arc::strong_count(l) > 1);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::PromptAssembler;
    use crate::turn::TurnConfig;
    use chatbridge_core::channel::{ImageData, InboundContent};
    use chatbridge_core::error::{ChannelError, ProviderError};
    use chatbridge_core::message::Message;
    use chatbridge_core::provider::{ChatRequest, ChatResponse, Provider};
    use chatbridge_core::tool::ToolRegistry;
    use chatbridge_history::InMemoryStore;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    struct SlowProvider {
        delay: Duration,
        panic_on_call: bool,
    }

    #[async_trait::async_trait]
    impl Provider for SlowProvider {
        fn name(&self) -> &str {
            "slow"
        }

        async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
            if self.panic_on_call {
                panic!("intentional test panic");
            }
            tokio::time::sleep(self.delay).await;
            let echo = request
                .messages
                .last()
                .and_then(|m| m.content.as_text())
                .unwrap_or_default()
                .to_string();
            Ok(ChatResponse {
                message: Message::assistant(format!("echo {echo}")),
                model: "slow".into(),
                usage: None,
            })
        }

        async fn generate_image(&self, _: &str, _: &str) -> Result<String, ProviderError> {
            Ok("https://img.example/x.png".into())
        }
    }

    struct RecordingChannel {
        sent: StdMutex<Vec<(String, OutboundMessage)>>,
    }

    impl RecordingChannel {
        fn new() -> Self {
            Self {
                sent: StdMutex::new(Vec::new()),
            }
        }

        async fn wait_for(&self, count: usize) {
            for _ in 0..500 {
                if self.sent.lock().unwrap().len() >= count {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("timed out waiting for {count} deliveries");
        }
    }

    #[async_trait::async_trait]
    impl Channel for RecordingChannel {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send(
            &self,
            user_id: &str,
            _reply_token: Option<&str>,
            message: &OutboundMessage,
        ) -> Result<(), ChannelError> {
            self.sent
                .lock()
                .unwrap()
                .push((user_id.to_string(), message.clone()));
            Ok(())
        }

        async fn fetch_image(&self, message_id: &str) -> Result<ImageData, ChannelError> {
            Err(ChannelError::ContentFetchFailed {
                message_id: message_id.to_string(),
                reason: "not supported".into(),
            })
        }
    }

    fn dispatcher(provider: SlowProvider, channel: Arc<RecordingChannel>) -> Dispatcher {
        let controller = Arc::new(TurnController::new(
            Arc::new(provider),
            Arc::new(InMemoryStore::new()),
            channel.clone(),
            Arc::new(ToolRegistry::new()),
            PromptAssembler::new("Test persona.", "English", 5),
            TurnConfig::default(),
        ));
        Dispatcher::new(controller, channel, 4)
    }

    fn event(user_id: &str, text: &str) -> InboundEvent {
        InboundEvent {
            user_id: user_id.into(),
            reply_token: None,
            content: InboundContent::Text { text: text.into() },
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn same_user_turns_are_serialized_in_order() {
        let channel = Arc::new(RecordingChannel::new());
        let d = dispatcher(
            SlowProvider {
                delay: Duration::from_millis(50),
                panic_on_call: false,
            },
            channel.clone(),
        );

        d.dispatch(event("U1", "first"));
        // Let the first turn take the user lock before the second arrives;
        // the provider holds it for 50ms, so the second must queue behind.
        tokio::time::sleep(Duration::from_millis(20)).await;
        d.dispatch(event("U1", "second"));
        channel.wait_for(2).await;

        let sent = channel.sent.lock().unwrap().clone();
        match (&sent[0].1, &sent[1].1) {
            (OutboundMessage::Text { text: a }, OutboundMessage::Text { text: b }) => {
                assert_eq!(a, "echo first");
                assert_eq!(b, "echo second");
            }
            other => panic!("unexpected deliveries: {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn different_users_both_complete() {
        let channel = Arc::new(RecordingChannel::new());
        let d = dispatcher(
            SlowProvider {
                delay: Duration::from_millis(10),
                panic_on_call: false,
            },
            channel.clone(),
        );

        d.dispatch(event("U1", "one"));
        d.dispatch(event("U2", "two"));
        channel.wait_for(2).await;

        let sent = channel.sent.lock().unwrap().clone();
        let users: Vec<&str> = sent.iter().map(|(u, _)| u.as_str()).collect();
        assert!(users.contains(&"U1"));
        assert!(users.contains(&"U2"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panicking_turn_still_attempts_an_apology() {
        let channel = Arc::new(RecordingChannel::new());
        let d = dispatcher(
            SlowProvider {
                delay: Duration::ZERO,
                panic_on_call: true,
            },
            channel.clone(),
        );

        d.dispatch(event("U1", "boom"));
        channel.wait_for(1).await;

        let sent = channel.sent.lock().unwrap().clone();
        assert_eq!(
            sent[0].1,
            OutboundMessage::text(crate::turn::APOLOGY_GENERIC)
        );
    }
}
