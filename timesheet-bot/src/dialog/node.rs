//! Hierarchical interaction nodes.
//!
//! An [`InteractionNode`] reacts to inbound events and may delegate to one
//! active child held in its [`Substate`] slot. Text goes through the node's
//! `before_text` hook first, then depth-first to the child, then to the node
//! itself. Button presses skip the hook.
//!
//! A child that finishes its job returns [`Outcome::Completed`] with the
//! collected value; the parent decides what happens next in
//! [`InteractionNode::on_substate_completed`].

use crate::error::{DialogError, DialogResult};
use crate::events::{ButtonEvent, Content, TextEvent};
use crate::gateway::{Destination, MessageId, MessagingGateway};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// Result of offering an event to a node.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The node did not claim the event.
    Ignored,
    /// The node consumed the event and stays active.
    Handled,
    /// The node consumed the event and finished with a value.
    Completed(serde_json::Value),
}

impl Outcome {
    /// Whether the event was claimed.
    #[must_use]
    pub const fn is_claimed(&self) -> bool {
        !matches!(self, Self::Ignored)
    }
}

/// What a node needs to talk to its chat.
#[derive(Clone)]
pub struct DialogContext {
    gateway: Arc<dyn MessagingGateway>,
    chat: Destination,
}

impl std::fmt::Debug for DialogContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialogContext")
            .field("gateway", &self.gateway.name())
            .field("chat", &self.chat)
            .finish()
    }
}

impl DialogContext {
    /// Create a context for `chat`.
    pub fn new(gateway: Arc<dyn MessagingGateway>, chat: Destination) -> Self {
        Self { gateway, chat }
    }

    /// The gateway.
    #[must_use]
    pub fn gateway(&self) -> &Arc<dyn MessagingGateway> {
        &self.gateway
    }

    /// The chat this dialog runs in.
    #[must_use]
    pub const fn chat(&self) -> &Destination {
        &self.chat
    }

    /// Send a message to the dialog's chat.
    pub async fn send(&self, content: impl Into<Content> + Send) -> DialogResult<MessageId> {
        Ok(self.gateway.send(&self.chat, &content.into()).await?)
    }

    /// Edit a message in the dialog's chat.
    pub async fn edit(&self, message_id: MessageId, content: &Content) -> DialogResult<()> {
        Ok(self.gateway.edit(&self.chat, message_id, content).await?)
    }

    /// Acknowledge a button press.
    pub async fn acknowledge(&self, event: &ButtonEvent, text: &str) -> DialogResult<()> {
        Ok(self.gateway.acknowledge(&event.activation_id, text).await?)
    }
}

/// Stored async callback receiving a value of type `T`.
pub type Callback<T> =
    Box<dyn FnMut(DialogContext, T) -> BoxFuture<'static, DialogResult<()>> + Send>;

/// Box a closure returning a future into a [`Callback`].
pub fn callback<T, F, Fut>(mut f: F) -> Callback<T>
where
    F: FnMut(DialogContext, T) -> Fut + Send + 'static,
    Fut: Future<Output = DialogResult<()>> + Send + 'static,
{
    Box::new(move |ctx, value| Box::pin(f(ctx, value)))
}

/// How a substate is installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Enter {
    /// Skip the new node's `start`.
    pub silent: bool,
    /// Terminate the previous node first; otherwise it is dropped quietly.
    pub terminate_existing: bool,
}

impl Default for Enter {
    fn default() -> Self {
        Self {
            silent: false,
            terminate_existing: true,
        }
    }
}

/// Slot holding at most one active child node.
#[derive(Default)]
pub struct Substate {
    node: Option<Box<dyn InteractionNode>>,
}

impl std::fmt::Debug for Substate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Substate")
            .field("active", &self.node.is_some())
            .finish()
    }
}

impl Substate {
    /// Empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a child is installed.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.node.is_some()
    }

    /// The active child.
    pub fn node_mut(&mut self) -> Option<&mut (dyn InteractionNode + 'static)> {
        self.node.as_deref_mut()
    }

    /// Install `node`, terminating the previous child and starting the new one.
    pub async fn set(
        &mut self,
        ctx: &DialogContext,
        node: Box<dyn InteractionNode>,
    ) -> DialogResult<()> {
        self.set_with(ctx, node, Enter::default()).await
    }

    /// Install `node` with explicit options.
    pub async fn set_with(
        &mut self,
        ctx: &DialogContext,
        node: Box<dyn InteractionNode>,
        enter: Enter,
    ) -> DialogResult<()> {
        if enter.terminate_existing {
            self.terminate(ctx).await?;
        }
        let node = self.node.insert(node);
        if !enter.silent {
            node.start(ctx).await?;
        }
        Ok(())
    }

    /// Clear the slot without notifying the child.
    pub fn reset(&mut self) -> Option<Box<dyn InteractionNode>> {
        self.node.take()
    }

    /// Terminate and clear the child. Does nothing when empty.
    pub async fn terminate(&mut self, ctx: &DialogContext) -> DialogResult<()> {
        if let Some(mut node) = self.node.take() {
            node.terminate(ctx).await?;
        }
        Ok(())
    }
}

/// A state of the conversation.
///
/// Implementors override the `on_*` hooks; the provided `start`,
/// `terminate`, `handle_text`, and `handle_button` drive delegation.
#[async_trait]
pub trait InteractionNode: Send {
    /// The child slot, for nodes that delegate.
    fn substate(&mut self) -> Option<&mut Substate> {
        None
    }

    /// Called when the node becomes active.
    async fn on_enter(&mut self, _ctx: &DialogContext) -> DialogResult<()> {
        Ok(())
    }

    /// Called when the node is aborted.
    async fn on_terminate(&mut self, _ctx: &DialogContext) -> DialogResult<()> {
        Ok(())
    }

    /// Sees text before the child does. Returning `true` stops dispatch.
    async fn before_text(&mut self, _ctx: &DialogContext, _event: &TextEvent) -> DialogResult<bool> {
        Ok(false)
    }

    /// Text the child did not claim.
    async fn on_text(&mut self, _ctx: &DialogContext, _event: &TextEvent) -> DialogResult<Outcome> {
        Ok(Outcome::Ignored)
    }

    /// Button presses the child did not claim.
    async fn on_button(
        &mut self,
        _ctx: &DialogContext,
        _event: &ButtonEvent,
    ) -> DialogResult<Outcome> {
        Ok(Outcome::Ignored)
    }

    /// The child finished with `value`. Defaults to clearing the slot.
    async fn on_substate_completed(
        &mut self,
        _ctx: &DialogContext,
        _value: serde_json::Value,
    ) -> DialogResult<Outcome> {
        if let Some(slot) = self.substate() {
            slot.reset();
        }
        Ok(Outcome::Handled)
    }

    /// Activate the node.
    async fn start(&mut self, ctx: &DialogContext) -> DialogResult<()> {
        self.on_enter(ctx).await
    }

    /// Abort the node and, first, its active child.
    async fn terminate(&mut self, ctx: &DialogContext) -> DialogResult<()> {
        if let Some(slot) = self.substate() {
            slot.terminate(ctx).await?;
        }
        self.on_terminate(ctx).await
    }

    /// Dispatch text: hook, then child, then self.
    async fn handle_text(&mut self, ctx: &DialogContext, event: &TextEvent) -> DialogResult<Outcome> {
        if self.before_text(ctx, event).await? {
            return Ok(Outcome::Handled);
        }
        let delegated = match self.substate().and_then(Substate::node_mut) {
            Some(child) => child.handle_text(ctx, event).await?,
            None => Outcome::Ignored,
        };
        match delegated {
            Outcome::Ignored => self.on_text(ctx, event).await,
            Outcome::Handled => Ok(Outcome::Handled),
            Outcome::Completed(value) => self.on_substate_completed(ctx, value).await,
        }
    }

    /// Dispatch a button press: child, then self.
    async fn handle_button(
        &mut self,
        ctx: &DialogContext,
        event: &ButtonEvent,
    ) -> DialogResult<Outcome> {
        let delegated = match self.substate().and_then(Substate::node_mut) {
            Some(child) => child.handle_button(ctx, event).await?,
            None => Outcome::Ignored,
        };
        match delegated {
            Outcome::Ignored => self.on_button(ctx, event).await,
            Outcome::Handled => Ok(Outcome::Handled),
            Outcome::Completed(value) => self.on_substate_completed(ctx, value).await,
        }
    }
}

/// Fail with [`DialogError::Unhandled`] naming the node.
pub(crate) fn unhandled(node: &str, event: &TextEvent) -> DialogError {
    DialogError::unhandled(format!("{node} got text {:?}", event.text))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::gateway::MemoryGateway;
    use std::sync::Mutex;

    pub(crate) fn context() -> (Arc<MemoryGateway>, DialogContext) {
        let gateway = Arc::new(MemoryGateway::new());
        let ctx = DialogContext::new(gateway.clone(), Destination::chat("42"));
        (gateway, ctx)
    }

    /// Node that logs its lifecycle and completes on the text "done".
    pub(crate) struct Tracer {
        pub name: &'static str,
        pub log: Arc<Mutex<Vec<String>>>,
    }

    impl Tracer {
        pub(crate) fn boxed(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Box<Self> {
            Box::new(Self {
                name,
                log: Arc::clone(log),
            })
        }

        fn note(&self, what: &str) {
            self.log.lock().unwrap().push(format!("{}:{what}", self.name));
        }
    }

    #[async_trait]
    impl InteractionNode for Tracer {
        async fn on_enter(&mut self, _ctx: &DialogContext) -> DialogResult<()> {
            self.note("start");
            Ok(())
        }

        async fn on_terminate(&mut self, _ctx: &DialogContext) -> DialogResult<()> {
            self.note("terminate");
            Ok(())
        }

        async fn on_text(&mut self, _ctx: &DialogContext, event: &TextEvent) -> DialogResult<Outcome> {
            self.note(&format!("text {}", event.text));
            if event.text == "done" {
                return Ok(Outcome::Completed(serde_json::json!(self.name)));
            }
            Ok(Outcome::Handled)
        }
    }

    /// Parent that only delegates.
    #[derive(Default)]
    struct Parent {
        slot: Substate,
        completed: Vec<serde_json::Value>,
        own_texts: usize,
    }

    #[async_trait]
    impl InteractionNode for Parent {
        fn substate(&mut self) -> Option<&mut Substate> {
            Some(&mut self.slot)
        }

        async fn on_text(&mut self, _ctx: &DialogContext, _event: &TextEvent) -> DialogResult<Outcome> {
            self.own_texts += 1;
            Ok(Outcome::Handled)
        }

        async fn on_substate_completed(
            &mut self,
            _ctx: &DialogContext,
            value: serde_json::Value,
        ) -> DialogResult<Outcome> {
            self.slot.reset();
            self.completed.push(value);
            Ok(Outcome::Handled)
        }
    }

    fn text(t: &str) -> TextEvent {
        TextEvent::new("42", t)
    }

    #[tokio::test]
    async fn test_replacing_substate_terminates_previous_once() {
        let (_gw, ctx) = context();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut parent = Parent::default();

        parent.slot.set(&ctx, Tracer::boxed("a", &log)).await.unwrap();
        parent.slot.set(&ctx, Tracer::boxed("b", &log)).await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:start", "a:terminate", "b:start"]
        );
    }

    #[tokio::test]
    async fn test_replace_without_terminate() {
        let (_gw, ctx) = context();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut parent = Parent::default();

        parent.slot.set(&ctx, Tracer::boxed("a", &log)).await.unwrap();
        let enter = Enter {
            silent: true,
            terminate_existing: false,
        };
        parent
            .slot
            .set_with(&ctx, Tracer::boxed("b", &log), enter)
            .await
            .unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["a:start"]);
        assert!(parent.slot.is_active());
    }

    #[tokio::test]
    async fn test_terminate_substate_is_idempotent() {
        let (_gw, ctx) = context();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut parent = Parent::default();

        parent.slot.set(&ctx, Tracer::boxed("a", &log)).await.unwrap();
        parent.slot.terminate(&ctx).await.unwrap();
        parent.slot.terminate(&ctx).await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["a:start", "a:terminate"]);
        assert!(!parent.slot.is_active());
    }

    #[tokio::test]
    async fn test_text_goes_to_child_first() {
        let (_gw, ctx) = context();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut parent = Parent::default();
        parent.slot.set(&ctx, Tracer::boxed("a", &log)).await.unwrap();

        parent.handle_text(&ctx, &text("hi")).await.unwrap();
        assert_eq!(parent.own_texts, 0);

        let outcome = parent.handle_text(&ctx, &text("done")).await.unwrap();
        assert_eq!(outcome, Outcome::Handled);
        assert_eq!(parent.completed, vec![serde_json::json!("a")]);
        assert!(!parent.slot.is_active());

        parent.handle_text(&ctx, &text("again")).await.unwrap();
        assert_eq!(parent.own_texts, 1);
    }

    #[tokio::test]
    async fn test_terminate_cascades() {
        let (_gw, ctx) = context();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut parent = Parent::default();
        parent.slot.set(&ctx, Tracer::boxed("a", &log)).await.unwrap();

        parent.terminate(&ctx).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a:start", "a:terminate"]);
    }
}
