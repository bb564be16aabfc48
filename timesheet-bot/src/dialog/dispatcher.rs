//! Sequential dispatch of inbound events to per-session dialogs.

use super::node::{DialogContext, InteractionNode, Outcome};
use super::session::{Dialog, NOT_UNDERSTOOD};
use crate::bus::MessageBus;
use crate::error::{DialogResult, Result};
use crate::events::{Content, Emoji, InboundEvent};
use crate::gateway::{Destination, MessagingGateway};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// Builds the root dialog for a new session id.
pub type DialogFactory<S> = Box<dyn Fn(&str) -> Dialog<S> + Send + Sync>;

/// Owns one [`Dialog`] per session and feeds it events in arrival order.
///
/// An event is fully processed, sends and edits included, before the next
/// one is taken from the bus. A failing dialog gets the generic fallback and
/// the loop carries on.
pub struct Dispatcher<S: 'static> {
    gateway: Arc<dyn MessagingGateway>,
    factory: DialogFactory<S>,
    dialogs: Mutex<HashMap<String, Dialog<S>>>,
    running: Arc<RwLock<bool>>,
}

impl<S> std::fmt::Debug for Dispatcher<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("gateway", &self.gateway.name())
            .finish_non_exhaustive()
    }
}

impl<S: Send + Sync + 'static> Dispatcher<S> {
    /// Dispatcher replying through `gateway`.
    pub fn new<F>(gateway: Arc<dyn MessagingGateway>, factory: F) -> Self
    where
        F: Fn(&str) -> Dialog<S> + Send + Sync + 'static,
    {
        Self {
            gateway,
            factory: Box::new(factory),
            dialogs: Mutex::new(HashMap::new()),
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Number of sessions seen so far.
    pub async fn session_count(&self) -> usize {
        self.dialogs.lock().await.len()
    }

    /// Process one event. Dialog failures are logged and answered, not returned.
    pub async fn dispatch(&self, event: &InboundEvent) -> Outcome {
        let session = event.session_id().to_string();
        let ctx = DialogContext::new(Arc::clone(&self.gateway), Destination::chat(&session));

        let mut dialogs = self.dialogs.lock().await;
        let dialog = dialogs
            .entry(session.clone())
            .or_insert_with(|| (self.factory)(&session));

        match Self::process(dialog, &ctx, event).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(session = %session, error = %e, "failed to process event");
                let fallback = Content::plain(NOT_UNDERSTOOD).with_emoji(Emoji::Think);
                if let Err(e) = ctx.send(fallback).await {
                    warn!(session = %session, error = %e, "failed to send fallback");
                }
                Outcome::Handled
            }
        }
    }

    async fn process(
        dialog: &mut Dialog<S>,
        ctx: &DialogContext,
        event: &InboundEvent,
    ) -> DialogResult<Outcome> {
        match event {
            InboundEvent::Text(text) => {
                debug!(session = %text.session_id, "dispatching text");
                dialog.handle_text(ctx, text).await
            }
            InboundEvent::Button(button) => {
                debug!(session = %button.session_id, "dispatching button");
                dialog.handle_button(ctx, button).await
            }
        }
    }

    /// Consume the bus until [`stop`](Self::stop) is called.
    pub async fn run(&self, bus: &MessageBus) -> Result<()> {
        *self.running.write().await = true;
        info!("dispatcher started");

        while *self.running.read().await {
            let Some(event) = bus.consume_inbound_timeout(Duration::from_secs(1)).await else {
                continue;
            };
            self.dispatch(&event).await;
        }

        info!("dispatcher stopped");
        Ok(())
    }

    /// Stop the loop after the event in flight.
    pub async fn stop(&self) {
        *self.running.write().await = false;
    }

    /// Whether the loop is running.
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}
