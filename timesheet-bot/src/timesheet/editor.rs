//! Picking and editing single events of a timesheet.

use super::entity::Entity;
use super::model::Timesheet;
use crate::dialog::validate::{self, BoxValidator, FnValidator, Text, Url, Verdict};
use crate::dialog::{
    DialogContext, Enter, FieldButton, InputField, InteractionNode, MenuBranch, MenuItem, Outcome,
    Substate, callback,
};
use crate::error::{DialogError, DialogResult};
use crate::events::{Content, Emoji};
use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// Greeting of the event picker.
pub const PICK_EVENT: &str = "Send the event number or words from its title";

/// Accepts an event number or words matching exactly one title; the data
/// becomes the event number.
pub fn event_picker(sheet: Entity<Timesheet>) -> BoxValidator {
    Arc::new(FnValidator::new(move |input: Verdict| {
        let text = input.text().to_string();
        sheet.read(|s| {
            if let Ok(id) = text.trim_start_matches('#').parse::<u64>() {
                return match s.event(id) {
                    Some(_) => input.accept(id),
                    None => input.reject(format!("There is no event #{id}")),
                };
            }
            match s.find_events(&text).as_slice() {
                [] => input.reject("No event has those words in its title"),
                [one] => {
                    let id = one.id;
                    input.accept(id)
                }
                many => {
                    let mut error = Content::plain("Several events match, send the number:");
                    for event in many {
                        error = error.line().code(event.preview());
                    }
                    input.reject(error)
                }
            }
        })
    }))
}

/// Parse the value produced by the date-time validator.
pub fn parse_start(value: &Value) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.as_str()?)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn describe(sheet: &Entity<Timesheet>, id: u64) -> Content {
    sheet.read(|s| match s.event(id) {
        Some(event) => Content::new()
            .code(format!(
                "Title:  {}\nStarts: {}\nLink:   {}",
                event.title,
                event.starts.with_timezone(&Local).format("%d.%m.%Y %H:%M"),
                event.url.as_deref().unwrap_or("-"),
            ))
            .with_emoji(Emoji::Info),
        None => Content::plain("This event is gone").with_emoji(Emoji::Fail),
    })
}

/// Field editing one property of event `id`.
fn property_field(
    sheet: Entity<Timesheet>,
    id: u64,
    greeting: impl Into<Content>,
    validator: BoxValidator,
    apply: fn(&mut super::model::EventEntry, &Value),
) -> InputField {
    InputField::new(greeting, validator).on_complete(callback(move |ctx: DialogContext, value: Value| {
        let sheet = sheet.clone();
        async move {
            let found = sheet.update(|s| s.event_mut(id).map(|e| apply(e, &value)).is_some())?;
            let reply = if found {
                Content::plain("Saved").with_emoji(Emoji::Ok)
            } else {
                Content::plain("This event is gone").with_emoji(Emoji::Fail)
            };
            ctx.send(reply).await?;
            Ok(())
        }
    }))
}

/// Menu editing event `id` of `sheet`.
fn event_menu(sheet: Entity<Timesheet>, id: u64) -> MenuBranch {
    let body_sheet = sheet.clone();
    MenuBranch::new(
        move || describe(&body_sheet, id),
        move || {
            let title = sheet.clone();
            let start = sheet.clone();
            let link = sheet.clone();
            vec![
                MenuItem::new("Title").state(move || {
                    Box::new(property_field(
                        title.clone(),
                        id,
                        "New title?",
                        Arc::new(Text::max_chars(200)),
                        |e, v| {
                            if let Some(t) = v.as_str() {
                                e.title = t.to_string();
                            }
                        },
                    )) as Box<dyn InteractionNode>
                }),
                MenuItem::new("Start").state(move || {
                    Box::new(property_field(
                        start.clone(),
                        id,
                        Content::plain("New start? Like ").code("24.12 19:30"),
                        Arc::new(validate::DateTime),
                        |e, v| {
                            if let Some(starts) = parse_start(v) {
                                e.starts = starts;
                            }
                        },
                    )) as Box<dyn InteractionNode>
                }),
                MenuItem::new("Link").state(move || {
                    Box::new(
                        property_field(link.clone(), id, "New link?", Arc::new(Url), |e, v| {
                            e.url = v.as_str().map(ToString::to_string);
                        })
                        .button_row(vec![
                            FieldButton::new("No link", Value::Null).answer("Link removed"),
                        ]),
                    ) as Box<dyn InteractionNode>
                }),
                MenuItem::new("Done")
                    .answer("Done")
                    .action(callback(|ctx: DialogContext, ()| async move {
                        ctx.send(Content::plain("Event editing finished").with_emoji(Emoji::Ok))
                            .await?;
                        Ok(())
                    }))
                    .closes(),
            ]
        },
    )
    .on_close(callback(|ctx: DialogContext, ()| async move {
        ctx.send(Content::plain("Event editing finished").with_emoji(Emoji::Ok))
            .await?;
        Ok(())
    }))
}

/// Picks an event, then opens its edit menu.
pub struct EventEditor {
    sheet: Entity<Timesheet>,
    slot: Substate,
    editing: Option<u64>,
}

impl std::fmt::Debug for EventEditor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEditor")
            .field("timesheet", &self.sheet.id())
            .field("editing", &self.editing)
            .finish_non_exhaustive()
    }
}

impl EventEditor {
    /// Editor over the events of `sheet`.
    #[must_use]
    pub fn new(sheet: Entity<Timesheet>) -> Self {
        Self {
            sheet,
            slot: Substate::new(),
            editing: None,
        }
    }

    /// Event being edited, once picked.
    #[must_use]
    pub const fn editing(&self) -> Option<u64> {
        self.editing
    }
}

#[async_trait]
impl InteractionNode for EventEditor {
    fn substate(&mut self) -> Option<&mut Substate> {
        Some(&mut self.slot)
    }

    async fn on_enter(&mut self, ctx: &DialogContext) -> DialogResult<()> {
        let picker = InputField::new(PICK_EVENT, event_picker(self.sheet.clone()))
            .abort_message("Event editing stopped");
        self.slot.set(ctx, Box::new(picker)).await
    }

    async fn on_substate_completed(
        &mut self,
        ctx: &DialogContext,
        value: Value,
    ) -> DialogResult<Outcome> {
        self.slot.reset();
        if self.editing.is_some() {
            return Ok(Outcome::Completed(Value::Null));
        }
        let id = value
            .as_u64()
            .ok_or_else(|| DialogError::command("edit_event", "no event number"))?;
        self.editing = Some(id);
        info!(timesheet = self.sheet.id(), event = id, "editing event");
        let enter = Enter {
            silent: false,
            terminate_existing: false,
        };
        self.slot
            .set_with(ctx, Box::new(event_menu(self.sheet.clone(), id)), enter)
            .await?;
        Ok(Outcome::Handled)
    }
}
