//! Single-value prompt.

use super::node::{Callback, DialogContext, InteractionNode, Outcome};
use super::validate::{BoxValidator, Verdict};
use crate::error::DialogResult;
use crate::events::{ButtonEvent, Content, Emoji, KeyButton, Keyboard, TextEvent};
use crate::util::generate_token;
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

/// A button offered instead of typing the value.
#[derive(Debug, Clone)]
pub struct FieldButton {
    /// Visible label.
    pub title: String,
    /// Value delivered when pressed.
    pub payload: Value,
    /// Acknowledgement text; defaults to `Selected <title>`.
    pub answer: Option<String>,
    token: String,
}

impl FieldButton {
    /// Button delivering `payload`.
    pub fn new(title: impl Into<String>, payload: impl Into<Value>) -> Self {
        Self {
            title: title.into(),
            payload: payload.into(),
            answer: None,
            token: generate_token(),
        }
    }

    /// Custom acknowledgement text.
    #[must_use]
    pub fn answer(mut self, text: impl Into<String>) -> Self {
        self.answer = Some(text.into());
        self
    }

    /// Token reported back by the platform.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Prompt for one value, validated or picked from buttons.
///
/// The greeting is sent on start with an edit marker. Each text is run
/// through the validator: failures are reported and the prompt stays,
/// successes go to the completion callback and complete the node. A known
/// button delivers its payload directly.
pub struct InputField {
    greeting: Content,
    validator: BoxValidator,
    on_complete: Option<Callback<Value>>,
    abort: Option<Content>,
    buttons: Vec<Vec<FieldButton>>,
}

impl std::fmt::Debug for InputField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputField")
            .field("greeting", &self.greeting.plain_text())
            .field("buttons", &self.buttons)
            .finish_non_exhaustive()
    }
}

impl InputField {
    /// Prompt with `greeting`, checking input with `validator`.
    pub fn new(greeting: impl Into<Content>, validator: BoxValidator) -> Self {
        Self {
            greeting: greeting.into(),
            validator,
            on_complete: None,
            abort: None,
            buttons: Vec::new(),
        }
    }

    /// Callback receiving the accepted value.
    #[must_use]
    pub fn on_complete(mut self, callback: Callback<Value>) -> Self {
        self.on_complete = Some(callback);
        self
    }

    /// Message sent when the prompt is aborted.
    #[must_use]
    pub fn abort_message(mut self, message: impl Into<Content>) -> Self {
        self.abort = Some(message.into());
        self
    }

    /// Add a row of buttons.
    #[must_use]
    pub fn button_row(mut self, row: Vec<FieldButton>) -> Self {
        if !row.is_empty() {
            self.buttons.push(row);
        }
        self
    }

    /// Drop the abort message; the owner reports aborts instead.
    pub(crate) fn clear_abort(&mut self) {
        self.abort = None;
    }

    /// Buttons, row by row.
    #[must_use]
    pub fn buttons(&self) -> &[Vec<FieldButton>] {
        &self.buttons
    }

    fn keyboard(&self) -> Keyboard {
        Keyboard::new(
            self.buttons
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|b| KeyButton::new(b.title.clone(), b.token.clone()))
                        .collect()
                })
                .collect(),
        )
    }

    async fn complete(&mut self, ctx: &DialogContext, value: Value) -> DialogResult<Outcome> {
        if let Some(callback) = self.on_complete.as_mut() {
            callback(ctx.clone(), value.clone()).await?;
        }
        Ok(Outcome::Completed(value))
    }
}

#[async_trait]
impl InteractionNode for InputField {
    async fn on_enter(&mut self, ctx: &DialogContext) -> DialogResult<()> {
        let greeting = self
            .greeting
            .clone()
            .with_emoji(Emoji::Edit)
            .with_keyboard(self.keyboard());
        ctx.send(greeting).await?;
        Ok(())
    }

    async fn on_terminate(&mut self, ctx: &DialogContext) -> DialogResult<()> {
        if let Some(abort) = &self.abort {
            ctx.send(abort.clone().with_emoji(Emoji::Warning)).await?;
        }
        Ok(())
    }

    async fn on_text(&mut self, ctx: &DialogContext, event: &TextEvent) -> DialogResult<Outcome> {
        let verdict = self.validator.validate(&Verdict::from_event(event));
        if !verdict.success {
            debug!(text = %event.text, "input rejected");
            let error = verdict
                .error
                .unwrap_or_else(|| Content::plain("That did not work, try again"))
                .or_emoji(Emoji::Warning);
            ctx.send(error).await?;
            return Ok(Outcome::Handled);
        }
        self.complete(ctx, verdict.data).await
    }

    async fn on_button(&mut self, ctx: &DialogContext, event: &ButtonEvent) -> DialogResult<Outcome> {
        let Some(button) = self
            .buttons
            .iter()
            .flatten()
            .find(|b| b.token == event.token)
            .cloned()
        else {
            return Ok(Outcome::Ignored);
        };
        let answer = button
            .answer
            .unwrap_or_else(|| format!("Selected {}", button.title));
        ctx.acknowledge(event, &answer).await?;
        self.complete(ctx, button.payload).await
    }
}
