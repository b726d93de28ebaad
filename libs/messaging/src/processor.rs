//! Background worker draining an owner's inbound queue
//!
//! One processor runs per role: one on the DM, one in each agent. Every
//! iteration first adopts a pending backend client, so backend switches only
//! ever take effect here. When the queue is empty the loop waits at most one
//! poll interval, which keeps both shutdown and switch detection responsive
//! without traffic.
//!
//! A failing or panicking handler is logged and counted; the loop goes on
//! with the next message.

use crate::{InboundQueue, Message, MessagingError, ReconfigurableClient};
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Role-specific reaction to an inbound message
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Message) -> Result<(), MessagingError>;
}

pub struct MessageProcessor {
    name: String,
    client: Arc<ReconfigurableClient>,
    handler: Arc<dyn MessageHandler>,
    poll_interval: Duration,
    running: Arc<AtomicBool>,
}

impl MessageProcessor {
    pub fn new(
        name: impl Into<String>,
        client: Arc<ReconfigurableClient>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            client,
            handler,
            poll_interval: DEFAULT_POLL_INTERVAL,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Spawn the loop on the current tokio runtime
    pub fn start(self) -> ProcessorHandle {
        let handle_name = self.name.clone();
        let running = self.running.clone();
        let queue = self.client.queue().clone();

        tracing::info!(
            "Starting message processor '{}' (poll interval {:?})",
            self.name,
            self.poll_interval
        );
        let task = tokio::spawn(self.run());

        ProcessorHandle {
            name: handle_name,
            running,
            queue,
            task,
        }
    }

    async fn run(self) {
        let queue = self.client.queue().clone();

        while self.running.load(Ordering::Acquire) {
            self.client.adopt_pending_client().await;

            let message = match queue.try_pop() {
                Some(message) => Some(message),
                None => queue.pop_timeout(self.poll_interval).await,
            };
            if let Some(message) = message {
                self.dispatch(message).await;
            }
        }

        tracing::info!("Message processor '{}' stopped", self.name);
        self.client.close().await;
    }

    async fn dispatch(&self, message: Message) {
        let metrics = self.client.metrics();
        metrics.record_received();

        let kind = message.kind();
        tracing::trace!("'{}' handling '{}'", self.name, kind);

        match AssertUnwindSafe(self.handler.handle(message))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                metrics.record_receive_failure();
                tracing::error!("'{}' failed to handle '{}': {}", self.name, kind, e);
            }
            Err(_) => {
                metrics.record_receive_failure();
                tracing::error!("'{}' handler panicked on '{}'", self.name, kind);
            }
        }
    }
}

/// Control over a running [`MessageProcessor`]
#[derive(Debug)]
pub struct ProcessorHandle {
    name: String,
    running: Arc<AtomicBool>,
    queue: Arc<InboundQueue>,
    task: JoinHandle<()>,
}

impl ProcessorHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) && !self.task.is_finished()
    }

    /// Diagnostic only, not a synchronization point
    pub fn has_no_message(&self) -> bool {
        self.queue.is_empty()
    }

    /// Ask the loop to stop and wait for it
    ///
    /// The message being handled, if any, is finished first. The loop exits
    /// within one poll interval and closes the current client.
    pub async fn stop(self) {
        self.running.store(false, Ordering::Release);
        if let Err(e) = self.task.await {
            tracing::error!("Message processor '{}' ended abnormally: {}", self.name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{InMemoryBroker, InMemoryFactory, DISMISS_TYPE, IN_MEMORY_TYPE};
    use crate::test_utils::backend_configuration;
    use crate::{ClientIdentity, FactoryRegistry, MessagingContext};
    use parking_lot::Mutex;
    use std::time::Instant;

    #[derive(Default)]
    struct CollectingHandler {
        handled: Mutex<Vec<Message>>,
    }

    #[async_trait]
    impl MessageHandler for CollectingHandler {
        async fn handle(&self, message: Message) -> Result<(), MessagingError> {
            match message {
                Message::RemoveInstance { ref instance_path } if instance_path == "/fail" => {
                    Err(MessagingError::handler("refused"))
                }
                Message::RemoveInstance { ref instance_path } if instance_path == "/panic" => {
                    panic!("handler blew up")
                }
                other => {
                    self.handled.lock().push(other);
                    Ok(())
                }
            }
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn agent_setup() -> (Arc<ReconfigurableClient>, Arc<InMemoryBroker>, MessagingContext) {
        let registry = Arc::new(FactoryRegistry::new());
        let broker = Arc::new(InMemoryBroker::new());
        registry
            .register(Arc::new(InMemoryFactory::new(broker.clone())))
            .await;

        let client = ReconfigurableClient::new(registry, ClientIdentity::agent("d", "app", "/vm"));
        client
            .switch_backend(backend_configuration(IN_MEMORY_TYPE))
            .await
            .unwrap();
        (client, broker, MessagingContext::for_agent("d", "app", "/vm"))
    }

    #[tokio::test]
    async fn test_messages_are_handled_in_order() {
        let (client, broker, ctx) = agent_setup().await;
        let handler = Arc::new(CollectingHandler::default());
        let processor = MessageProcessor::new("agent", client.clone(), handler.clone())
            .with_poll_interval(Duration::from_millis(10))
            .start();

        wait_until(|| client.current_backend_type() == IN_MEMORY_TYPE).await;
        client.subscribe(&ctx).await.unwrap();

        let sent: Vec<Message> = (0..20)
            .map(|i| Message::RemoveInstance {
                instance_path: format!("/vm/child-{}", i),
            })
            .collect();
        for message in &sent {
            broker.publish(&ctx, message);
        }

        wait_until(|| handler.handled.lock().len() == sent.len()).await;
        assert_eq!(*handler.handled.lock(), sent);
        assert!(processor.has_no_message());
        assert_eq!(client.metrics().snapshot().messages_received, 20);

        processor.stop().await;
    }

    #[tokio::test]
    async fn test_handler_failures_do_not_stop_the_loop() {
        let (client, _broker, _ctx) = agent_setup().await;
        let handler = Arc::new(CollectingHandler::default());
        let processor = MessageProcessor::new("agent", client.clone(), handler.clone())
            .with_poll_interval(Duration::from_millis(10))
            .start();

        let queue = client.queue();
        queue.push(Message::RemoveInstance {
            instance_path: "/fail".to_string(),
        });
        queue.push(Message::RemoveInstance {
            instance_path: "/panic".to_string(),
        });
        queue.push(Message::Resynchronize);

        wait_until(|| handler.handled.lock().len() == 1).await;
        assert_eq!(*handler.handled.lock(), vec![Message::Resynchronize]);
        assert!(processor.is_running());

        let snapshot = client.metrics().snapshot();
        assert_eq!(snapshot.messages_received, 3);
        assert_eq!(snapshot.receive_failures, 2);

        processor.stop().await;
    }

    #[tokio::test]
    async fn test_stop_closes_current_client() {
        let (client, broker, _ctx) = agent_setup().await;
        let processor = MessageProcessor::new(
            "agent",
            client.clone(),
            Arc::new(CollectingHandler::default()),
        )
        .with_poll_interval(Duration::from_millis(10))
        .start();

        wait_until(|| broker.owner_count() == 1 && !client.has_pending_client()).await;

        let started = Instant::now();
        processor.stop().await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(broker.owner_count(), 0);
        assert_eq!(client.current_backend_type(), DISMISS_TYPE);
    }

    #[tokio::test]
    async fn test_pending_switch_is_adopted_while_idle() {
        let registry = Arc::new(FactoryRegistry::new());
        let broker = Arc::new(InMemoryBroker::new());
        registry
            .register(Arc::new(InMemoryFactory::new(broker.clone())))
            .await;

        let client = ReconfigurableClient::new(registry, ClientIdentity::control_plane("d"));
        let processor = MessageProcessor::new(
            "dm",
            client.clone(),
            Arc::new(CollectingHandler::default()),
        )
        .with_poll_interval(Duration::from_millis(10))
        .start();

        client
            .switch_backend(backend_configuration(IN_MEMORY_TYPE))
            .await
            .unwrap();
        wait_until(|| client.current_backend_type() == IN_MEMORY_TYPE).await;
        assert!(!client.has_pending_client());

        processor.stop().await;
    }
}
