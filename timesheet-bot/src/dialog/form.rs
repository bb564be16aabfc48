//! Multi-field forms.

use super::field::InputField;
use super::node::{Callback, DialogContext, Enter, InteractionNode, Outcome, Substate, unhandled};
use crate::error::{DialogError, DialogResult};
use crate::events::{ButtonEvent, Content, Emoji, TextEvent};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use tracing::debug;

/// Runs fields one after another and collects their values in order.
///
/// Each field's own callback still runs when the field completes. The form
/// owns abort reporting: field abort messages are dropped, and terminating
/// the form mid-way sends the form's single abort message.
pub struct InputForm {
    pending: VecDeque<InputField>,
    results: Vec<Value>,
    slot: Substate,
    on_complete: Option<Callback<Vec<Value>>>,
    abort: Option<Content>,
}

impl std::fmt::Debug for InputForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputForm")
            .field("pending", &self.pending.len())
            .field("results", &self.results)
            .finish_non_exhaustive()
    }
}

impl InputForm {
    /// Form over `fields`, which must not be empty.
    pub fn new(fields: Vec<InputField>) -> DialogResult<Self> {
        let mut fields = fields.into_iter();
        let first = fields.next().ok_or(DialogError::EmptyForm)?;
        Ok(Self::starting_with(first, fields))
    }

    /// Form over `first` followed by `rest`.
    pub fn starting_with(first: InputField, rest: impl IntoIterator<Item = InputField>) -> Self {
        let pending = std::iter::once(first)
            .chain(rest)
            .map(|mut field| {
                field.clear_abort();
                field
            })
            .collect();
        Self {
            pending,
            results: Vec::new(),
            slot: Substate::new(),
            on_complete: None,
            abort: None,
        }
    }

    /// Callback receiving every value, in field order.
    #[must_use]
    pub fn on_complete(mut self, callback: Callback<Vec<Value>>) -> Self {
        self.on_complete = Some(callback);
        self
    }

    /// Message sent when the form is aborted.
    #[must_use]
    pub fn abort_message(mut self, message: impl Into<Content>) -> Self {
        self.abort = Some(message.into());
        self
    }

    /// Values collected so far.
    #[must_use]
    pub fn results(&self) -> &[Value] {
        &self.results
    }

    async fn advance(&mut self, ctx: &DialogContext) -> DialogResult<bool> {
        let Some(field) = self.pending.pop_front() else {
            return Ok(false);
        };
        let enter = Enter {
            silent: false,
            terminate_existing: false,
        };
        self.slot.set_with(ctx, Box::new(field), enter).await?;
        Ok(true)
    }
}

#[async_trait]
impl InteractionNode for InputForm {
    fn substate(&mut self) -> Option<&mut Substate> {
        Some(&mut self.slot)
    }

    async fn on_enter(&mut self, ctx: &DialogContext) -> DialogResult<()> {
        self.advance(ctx).await?;
        Ok(())
    }

    async fn on_terminate(&mut self, ctx: &DialogContext) -> DialogResult<()> {
        if let Some(abort) = &self.abort {
            ctx.send(abort.clone().with_emoji(Emoji::Warning)).await?;
        }
        Ok(())
    }

    async fn on_text(&mut self, _ctx: &DialogContext, event: &TextEvent) -> DialogResult<Outcome> {
        Err(unhandled("form", event))
    }

    async fn on_button(&mut self, _ctx: &DialogContext, _event: &ButtonEvent) -> DialogResult<Outcome> {
        Ok(Outcome::Ignored)
    }

    async fn on_substate_completed(
        &mut self,
        ctx: &DialogContext,
        value: Value,
    ) -> DialogResult<Outcome> {
        self.slot.reset();
        self.results.push(value);
        debug!(filled = self.results.len(), left = self.pending.len(), "form field done");
        if self.advance(ctx).await? {
            return Ok(Outcome::Handled);
        }

        let results = self.results.clone();
        if let Some(callback) = self.on_complete.as_mut() {
            callback(ctx.clone(), results.clone()).await?;
        }
        Ok(Outcome::Completed(Value::Array(results)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialog::field::FieldButton;
    use crate::dialog::node::callback;
    use crate::dialog::node::tests::context;
    use crate::dialog::validate::{Int, Text};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn text(t: &str) -> TextEvent {
        TextEvent::new("42", t)
    }

    fn name_and_age(done: &Arc<Mutex<Option<Vec<Value>>>>) -> InputForm {
        let sink = Arc::clone(done);
        InputForm::new(vec![
            InputField::new("Name?", Arc::new(Text::new())).abort_message("field abort"),
            InputField::new("Age?", Arc::new(Int::new())),
        ])
        .unwrap()
        .abort_message("Form cancelled")
        .on_complete(callback(move |_ctx, values: Vec<Value>| {
            let sink = Arc::clone(&sink);
            async move {
                *sink.lock().unwrap() = Some(values);
                Ok(())
            }
        }))
    }

    #[test]
    fn test_empty_form_is_rejected() {
        assert!(matches!(InputForm::new(Vec::new()), Err(DialogError::EmptyForm)));
    }

    #[tokio::test]
    async fn test_form_collects_in_order() {
        let (gateway, ctx) = context();
        let done = Arc::new(Mutex::new(None));
        let mut form = name_and_age(&done);

        form.start(&ctx).await.unwrap();
        assert_eq!(form.handle_text(&ctx, &text("Alice")).await.unwrap(), Outcome::Handled);
        assert_eq!(form.handle_text(&ctx, &text("abc")).await.unwrap(), Outcome::Handled);
        assert!(done.lock().unwrap().is_none());

        let outcome = form.handle_text(&ctx, &text("42")).await.unwrap();
        assert_eq!(outcome, Outcome::Completed(json!(["Alice", 42])));
        assert_eq!(*done.lock().unwrap(), Some(vec![json!("Alice"), json!(42)]));

        assert_eq!(
            gateway.sent_texts(),
            vec!["✍️ Name?", "✍️ Age?", "⚠️ Just a number, please"]
        );
    }

    #[tokio::test]
    async fn test_field_callbacks_run_with_form() {
        let (_gateway, ctx) = context();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let field = InputField::new("Pick", Arc::new(Int::new()))
            .on_complete(callback(move |_ctx, v: Value| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().unwrap().push(v);
                    Ok(())
                }
            }))
            .button_row(vec![FieldButton::new("Seven", 7)]);
        let token = field.buttons()[0][0].token().to_string();
        let mut form = InputForm::new(vec![field]).unwrap();

        form.start(&ctx).await.unwrap();
        let press = ButtonEvent::new("42", token, "u", "a");
        let outcome = form.handle_button(&ctx, &press).await.unwrap();

        assert_eq!(outcome, Outcome::Completed(json!([7])));
        assert_eq!(*seen.lock().unwrap(), vec![json!(7)]);
    }

    #[tokio::test]
    async fn test_abort_mid_way_sends_one_message() {
        let (gateway, ctx) = context();
        let done = Arc::new(Mutex::new(None));
        let mut form = name_and_age(&done);

        form.start(&ctx).await.unwrap();
        form.terminate(&ctx).await.unwrap();

        assert_eq!(gateway.sent_texts(), vec!["✍️ Name?", "⚠️ Form cancelled"]);
        assert!(done.lock().unwrap().is_none());
        assert!(form.results().is_empty());
    }
}
