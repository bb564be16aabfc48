//! Persistent menu message with buttons.

use super::node::{Callback, DialogContext, InteractionNode, Outcome, Substate};
use crate::error::{DialogResult, GatewayError};
use crate::events::{ButtonEvent, Content, KeyButton, Keyboard};
use crate::gateway::MessageId;
use crate::util::generate_token;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

/// Factory building the node a menu item launches.
pub type NodeFactory = Box<dyn FnMut() -> Box<dyn InteractionNode> + Send>;

/// One menu button.
pub struct MenuItem {
    title: String,
    answer: Option<String>,
    action: Option<Callback<()>>,
    state: Option<NodeFactory>,
    closes: bool,
}

impl std::fmt::Debug for MenuItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MenuItem")
            .field("title", &self.title)
            .field("action", &self.action.is_some())
            .field("state", &self.state.is_some())
            .finish_non_exhaustive()
    }
}

impl MenuItem {
    /// Button labelled `title` that does nothing yet.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            answer: None,
            action: None,
            state: None,
            closes: false,
        }
    }

    /// Acknowledgement text; defaults to `Selected <title>`.
    #[must_use]
    pub fn answer(mut self, text: impl Into<String>) -> Self {
        self.answer = Some(text.into());
        self
    }

    /// Run `action` when pressed; the menu re-renders afterwards.
    #[must_use]
    pub fn action(mut self, action: Callback<()>) -> Self {
        self.action = Some(action);
        self
    }

    /// Finish the menu when pressed.
    #[must_use]
    pub const fn closes(mut self) -> Self {
        self.closes = true;
        self
    }

    /// Launch the node built by `factory` when pressed.
    #[must_use]
    pub fn state<F>(mut self, factory: F) -> Self
    where
        F: FnMut() -> Box<dyn InteractionNode> + Send + 'static,
    {
        self.state = Some(Box::new(factory));
        self
    }
}

/// Renders the menu body.
pub type RenderBody = Box<dyn FnMut() -> Content + Send>;

/// Renders the menu items.
pub type RenderItems = Box<dyn FnMut() -> Vec<MenuItem> + Send>;

/// A menu kept in a single message.
///
/// The first render sends the message; later renders edit it in place.
/// Button tokens are regenerated on every render, so stale keyboards stop
/// matching. When a launched node completes, the menu takes control back and
/// re-renders.
pub struct MenuBranch {
    render_body: RenderBody,
    render_items: RenderItems,
    items: Vec<(String, MenuItem)>,
    message_id: Option<MessageId>,
    slot: Substate,
    on_close: Option<Callback<()>>,
}

impl std::fmt::Debug for MenuBranch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MenuBranch")
            .field("message_id", &self.message_id)
            .field("items", &self.items.len())
            .field("slot", &self.slot)
            .finish_non_exhaustive()
    }
}

impl MenuBranch {
    /// Menu rendered by the two closures.
    pub fn new<B, I>(render_body: B, render_items: I) -> Self
    where
        B: FnMut() -> Content + Send + 'static,
        I: FnMut() -> Vec<MenuItem> + Send + 'static,
    {
        Self {
            render_body: Box::new(render_body),
            render_items: Box::new(render_items),
            items: Vec::new(),
            message_id: None,
            slot: Substate::new(),
            on_close: None,
        }
    }

    /// Callback run when the menu is terminated.
    #[must_use]
    pub fn on_close(mut self, callback: Callback<()>) -> Self {
        self.on_close = Some(callback);
        self
    }

    /// Id of the menu message, once sent.
    #[must_use]
    pub const fn message_id(&self) -> Option<MessageId> {
        self.message_id
    }

    /// Current button tokens, in display order.
    #[must_use]
    pub fn tokens(&self) -> Vec<&str> {
        self.items.iter().map(|(token, _)| token.as_str()).collect()
    }

    /// Re-render the menu into its message.
    pub async fn update_message(&mut self, ctx: &DialogContext) -> DialogResult<()> {
        self.items = (self.render_items)()
            .into_iter()
            .map(|item| (generate_token(), item))
            .collect();
        let keyboard = Keyboard::grid(
            self.items
                .iter()
                .map(|(token, item)| KeyButton::new(item.title.clone(), token.clone()))
                .collect(),
        );
        let content = (self.render_body)().with_keyboard(keyboard);

        if let Some(id) = self.message_id {
            match ctx.gateway().edit(ctx.chat(), id, &content).await {
                Ok(()) => return Ok(()),
                Err(GatewayError::NotModified) => return Ok(()),
                Err(e) if e.is_fatal() => {
                    warn!(message_id = id, error = %e, "menu message lost, sending a new one");
                }
                Err(e) => return Err(e.into()),
            }
        }
        let id = ctx.send(content).await?;
        debug!(message_id = id, "menu message sent");
        self.message_id = Some(id);
        Ok(())
    }
}

#[async_trait]
impl InteractionNode for MenuBranch {
    fn substate(&mut self) -> Option<&mut Substate> {
        Some(&mut self.slot)
    }

    async fn on_enter(&mut self, ctx: &DialogContext) -> DialogResult<()> {
        self.update_message(ctx).await
    }

    async fn on_terminate(&mut self, ctx: &DialogContext) -> DialogResult<()> {
        if let Some(callback) = self.on_close.as_mut() {
            callback(ctx.clone(), ()).await?;
        }
        Ok(())
    }

    async fn on_button(&mut self, ctx: &DialogContext, event: &ButtonEvent) -> DialogResult<Outcome> {
        let Some(index) = self.items.iter().position(|(token, _)| *token == event.token) else {
            return Ok(Outcome::Ignored);
        };
        let item = &self.items[index].1;
        let answer = item
            .answer
            .clone()
            .unwrap_or_else(|| format!("Selected {}", item.title));
        ctx.acknowledge(event, &answer).await?;

        let item = &mut self.items[index].1;
        if let Some(action) = item.action.as_mut() {
            action(ctx.clone(), ()).await?;
        }
        if item.closes {
            self.slot.terminate(ctx).await?;
            return Ok(Outcome::Completed(Value::Null));
        }
        let node = self.items[index].1.state.as_mut().map(|factory| factory());
        match node {
            Some(node) => self.slot.set(ctx, node).await?,
            None => self.update_message(ctx).await?,
        }
        Ok(Outcome::Handled)
    }

    async fn on_substate_completed(&mut self, ctx: &DialogContext, _value: Value) -> DialogResult<Outcome> {
        self.slot.reset();
        self.update_message(ctx).await?;
        Ok(Outcome::Handled)
    }
}
