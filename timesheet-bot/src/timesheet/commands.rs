//! Chat commands.

use super::book::TimesheetBook;
use super::editor::{EventEditor, PICK_EVENT, event_picker};
use super::entity::Entity;
use super::model::{ChatSettings, EventEntry, Timesheet};
use crate::cron::{ActionKind, ActionRegistry, Clock, PeriodicAction, Period};
use crate::dialog::validate::{
    self, BoxValidator, Chain, ChatRef, FnValidator, Id, Int, MessageUrl, Text, Url, Validator,
    Verdict,
};
use crate::dialog::{
    Command, Dialog, DialogContext, FieldButton, InputField, InputForm, InteractionNode, MenuBranch,
    MenuItem, callback,
};
use crate::error::{DialogError, DialogResult, SyncError};
use crate::events::{Content, Emoji, TextEvent};
use crate::gateway::Destination;
use crate::sync::{RenderFilter, TranslationRecord, TranslationRegistry};
use crate::util::generate_token;
use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

/// Hour counts offered as buttons by `/autopost`.
pub const AUTOPOST_PRESETS: [u64; 4] = [1, 6, 12, 24];

/// Longest auto-repost interval, in hours.
const MAX_AUTOPOST_HOURS: u64 = 24 * 7;

/// Reason given to live posts dropped by `/clear_live`.
pub const CLEARED_BY_USER: &str = "cleared by user";

const NAME_RULES: &str = "Names use latin letters, digits and _, and start with a letter";
const PASSWORD_RULES: &str = "Passwords use latin letters, digits and _";

/// Length of generated timesheet passwords.
const PASSWORD_LEN: usize = 8;

/// What command handlers work with.
#[derive(Clone)]
pub struct Services {
    /// Timesheets, chat settings, profiles.
    pub book: TimesheetBook,
    /// Live posts.
    pub translations: TranslationRegistry,
    /// Periodic actions.
    pub actions: ActionRegistry,
    /// Time source.
    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("book", &self.book)
            .field("translations", &self.translations)
            .field("actions", &self.actions)
            .finish_non_exhaustive()
    }
}

/// Dialog of one timesheet bot session.
pub type TimesheetDialog = Dialog<Services>;

/// Fresh dialog for a session.
#[must_use]
pub fn dialog(services: Services) -> TimesheetDialog {
    Dialog::new(services, COMMANDS)
}

/// Every command, in help order.
pub static COMMANDS: &[Command<Services>] = &[
    Command {
        name: "start",
        description: "Say hello",
        menu: false,
        run: cmd_start,
    },
    Command {
        name: "help",
        description: "List commands",
        menu: true,
        run: cmd_help,
    },
    Command {
        name: "cancel",
        description: "Stop what is going on",
        menu: true,
        run: cmd_cancel,
    },
    Command {
        name: "new",
        description: "Create a timesheet",
        menu: true,
        run: cmd_new,
    },
    Command {
        name: "join",
        description: "Switch to a timesheet by name and password",
        menu: true,
        run: cmd_join,
    },
    Command {
        name: "timesheets",
        description: "List timesheet names",
        menu: true,
        run: cmd_timesheets,
    },
    Command {
        name: "info",
        description: "Show the name and password of the timesheet",
        menu: true,
        run: cmd_info,
    },
    Command {
        name: "add",
        description: "Add an event",
        menu: true,
        run: cmd_add,
    },
    Command {
        name: "events",
        description: "List events with their numbers",
        menu: true,
        run: cmd_events,
    },
    Command {
        name: "edit_event",
        description: "Change an event",
        menu: true,
        run: cmd_edit_event,
    },
    Command {
        name: "remove_event",
        description: "Delete an event",
        menu: true,
        run: cmd_remove_event,
    },
    Command {
        name: "menu",
        description: "Edit the timesheet",
        menu: true,
        run: cmd_menu,
    },
    Command {
        name: "connect",
        description: "Choose the chat to post into",
        menu: true,
        run: cmd_connect,
    },
    Command {
        name: "post",
        description: "Show the timesheet here",
        menu: true,
        run: cmd_post,
    },
    Command {
        name: "live",
        description: "Post a self-updating timesheet",
        menu: true,
        run: cmd_live,
    },
    Command {
        name: "live_to",
        description: "Turn an existing message into a live timesheet",
        menu: false,
        run: cmd_live_to,
    },
    Command {
        name: "autopost",
        description: "Repost the live timesheet every few hours",
        menu: true,
        run: cmd_autopost,
    },
    Command {
        name: "stop_autopost",
        description: "Stop reposting",
        menu: false,
        run: cmd_stop_autopost,
    },
    Command {
        name: "clear_live",
        description: "Stop every live post in the connected chat",
        menu: false,
        run: cmd_clear_live,
    },
];

// ============================================================================
// Helpers
// ============================================================================

fn session(ctx: &DialogContext) -> &str {
    &ctx.chat().chat_id
}

async fn reply(ctx: &DialogContext, emoji: Emoji, content: impl Into<Content> + Send) -> DialogResult<()> {
    ctx.send(content.into().with_emoji(emoji)).await?;
    Ok(())
}

/// The session's timesheet, or a hint to create one.
async fn current_sheet(
    services: &Services,
    ctx: &DialogContext,
) -> DialogResult<Option<Entity<Timesheet>>> {
    let profile = services.book.profile(session(ctx))?;
    if let Some(sheet) = profile.timesheet_id.and_then(|id| services.book.get(id)) {
        return Ok(Some(sheet));
    }
    reply(ctx, Emoji::Fail, "Create a timesheet with /new first").await?;
    Ok(None)
}

/// Where live posts of this session go: the connected chat, or here.
fn post_target(services: &Services, ctx: &DialogContext) -> DialogResult<Destination> {
    Ok(services
        .book
        .profile(session(ctx))?
        .connected
        .unwrap_or_else(|| ctx.chat().clone()))
}

/// Validate an inline command argument the way a field would.
fn check_arg(validator: &dyn Validator, ctx: &DialogContext, args: &str) -> Verdict {
    validator.validate(&Verdict::from_event(&TextEvent::new(session(ctx), args)))
}

fn source_of(sheet: &Entity<Timesheet>) -> String {
    TimesheetBook::source_id(sheet.read(|s| s.id))
}

fn text_of(value: &Value) -> Option<String> {
    value.as_str().map(ToString::to_string)
}

/// Text a validator accepted, if it did.
fn accepted(verdict: &Verdict) -> Option<String> {
    verdict.success.then(|| text_of(&verdict.data)).flatten()
}

fn new_password() -> String {
    generate_token().chars().take(PASSWORD_LEN).collect()
}

/// A valid name no timesheet uses yet.
fn new_name(book: TimesheetBook) -> BoxValidator {
    Arc::new(Chain::new(vec![
        Arc::new(Id::name(NAME_RULES)) as BoxValidator,
        Arc::new(FnValidator::new(move |input: Verdict| {
            if book.find_by_name(input.text()).is_some() {
                input.reject("That name is taken, try another")
            } else {
                input
            }
        })),
    ]))
}

/// Timesheet picked by the name step of `/join`.
type Chosen = Arc<Mutex<Option<Entity<Timesheet>>>>;

fn chosen(slot: &Mutex<Option<Entity<Timesheet>>>) -> Option<Entity<Timesheet>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

/// Name of an existing timesheet other than the session's own; remembers it.
fn join_name(book: TimesheetBook, session: String, slot: Chosen) -> BoxValidator {
    Arc::new(Chain::new(vec![
        Arc::new(Id::name(NAME_RULES)) as BoxValidator,
        Arc::new(FnValidator::new(move |input: Verdict| {
            let Some(sheet) = book.find_by_name(input.text()) else {
                let error = Content::plain("There is no timesheet ")
                    .code(input.text().to_string())
                    .text(", see /timesheets")
                    .with_emoji(Emoji::Fail);
                return input.reject(error);
            };
            let current = book.profile(&session).ok().and_then(|p| p.timesheet_id);
            if current == Some(sheet.read(|s| s.id)) {
                return input.reject(
                    Content::plain("This timesheet is already yours").with_emoji(Emoji::Fail),
                );
            }
            *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(sheet);
            input
        })),
    ]))
}

/// Password of the timesheet remembered by [`join_name`].
fn join_password(slot: Chosen) -> BoxValidator {
    Arc::new(Chain::new(vec![
        Arc::new(Id::password(PASSWORD_RULES)) as BoxValidator,
        Arc::new(FnValidator::new(move |input: Verdict| {
            let matches = chosen(&slot).is_some_and(|sheet| sheet.read(|s| s.password == input.text()));
            if matches {
                input
            } else {
                input.reject(Content::plain("Wrong password").with_emoji(Emoji::Fail))
            }
        })),
    ]))
}

// ============================================================================
// Forms and menus
// ============================================================================

async fn create_sheet(
    services: &Services,
    ctx: &DialogContext,
    name: &str,
    password: &str,
) -> DialogResult<()> {
    let sheet = services.book.create(name, password, session(ctx))?;
    let id = sheet.read(|s| s.id);
    services
        .book
        .update_profile(session(ctx), |p| p.timesheet_id = Some(id))?;
    reply(
        ctx,
        Emoji::Ok,
        Content::plain("Timesheet ")
            .bold(name)
            .text(" is ready, others join it with the password ")
            .code(password)
            .line()
            .text("Add events with /add"),
    )
    .await
}

fn name_field(greeting: &str, book: TimesheetBook) -> InputField {
    InputField::new(greeting, new_name(book))
}

async fn join_sheet(
    services: &Services,
    ctx: &DialogContext,
    slot: &Mutex<Option<Entity<Timesheet>>>,
) -> DialogResult<()> {
    let sheet = chosen(slot).ok_or_else(|| DialogError::command("join", "no timesheet chosen"))?;
    let (id, name) = sheet.read(|s| (s.id, s.name.clone()));
    services
        .book
        .update_profile(session(ctx), |p| p.timesheet_id = Some(id))?;
    info!(timesheet_id = id, session = session(ctx), "timesheet joined");
    reply(ctx, Emoji::Ok, Content::plain("Switched to ").bold(name)).await
}

async fn remove_event(sheet: &Entity<Timesheet>, ctx: &DialogContext, id: u64) -> DialogResult<()> {
    match sheet.update(|s| s.remove_event(id))? {
        Some(event) => {
            info!(timesheet = sheet.id(), event = id, "event removed");
            reply(ctx, Emoji::Ok, Content::plain("Removed ").bold(event.title)).await
        }
        None => reply(ctx, Emoji::Fail, "This event is gone").await,
    }
}

fn event_from(values: &[Value]) -> Option<EventEntry> {
    let title = values.first()?.as_str()?;
    let starts = chrono::DateTime::parse_from_rfc3339(values.get(1)?.as_str()?)
        .ok()?
        .with_timezone(&Utc);
    let event = EventEntry::new(title, starts);
    Some(match values.get(2).and_then(Value::as_str) {
        Some(url) => event.with_url(url),
        None => event,
    })
}

/// Form asking for a new event of `sheet`.
fn add_event_form(sheet: Entity<Timesheet>) -> InputForm {
    InputForm::starting_with(
        InputField::new("What is the event?", Arc::new(Text::max_chars(200))),
        [
            InputField::new(
                Content::plain("When does it start? Like ").code("24.12 19:30"),
                Arc::new(validate::DateTime),
            ),
            InputField::new("Link to the event page?", Arc::new(Url)).button_row(vec![
                FieldButton::new("No link", Value::Null).answer("Without a link"),
            ]),
        ],
    )
    .abort_message("The event was not added")
    .on_complete(callback(move |ctx, values: Vec<Value>| {
        let sheet = sheet.clone();
        async move {
            let event = event_from(&values)
                .ok_or_else(|| DialogError::command("add", "incomplete event"))?;
            let title = event.title.clone();
            let (number, count) = sheet.update(|s| (s.add_event(event), s.events.len()))?;
            info!(timesheet = sheet.id(), event = number, events = count, "event added");
            reply(&ctx, Emoji::Ok, Content::plain("Added ").bold(title)).await
        }
    }))
}

/// Field editing the header or footer of `settings`.
fn settings_field(
    settings: Entity<ChatSettings>,
    greeting: &str,
    apply: fn(&mut ChatSettings, Option<String>),
) -> InputField {
    InputField::new(greeting, Arc::new(Text::max_chars(500)))
        .button_row(vec![FieldButton::new("Default", Value::Null)])
        .on_complete(callback(move |ctx, value: Value| {
            let settings = settings.clone();
            async move {
                settings.update(|s| apply(s, text_of(&value)))?;
                reply(&ctx, Emoji::Ok, "Saved").await
            }
        }))
}

/// Menu editing `sheet` and the settings of the chat it is posted to.
fn sheet_menu(
    book: TimesheetBook,
    sheet: Entity<Timesheet>,
    settings: Entity<ChatSettings>,
    target: Destination,
) -> MenuBranch {
    let body_sheet = sheet.clone();
    MenuBranch::new(
        move || {
            body_sheet
                .read(|s| {
                    Content::new()
                        .bold(s.name.clone())
                        .line()
                        .text(format!("{} events, posted to {target}", s.events.len()))
                })
                .with_emoji(Emoji::Info)
        },
        move || {
            let add_sheet = sheet.clone();
            let rename_sheet = sheet.clone();
            let rename_book = book.clone();
            let header = settings.clone();
            let footer = settings.clone();
            vec![
                MenuItem::new("Add event")
                    .state(move || Box::new(add_event_form(add_sheet.clone())) as Box<dyn InteractionNode>),
                MenuItem::new("Rename").state(move || {
                    let sheet = rename_sheet.clone();
                    let field = name_field("New name?", rename_book.clone()).on_complete(callback(move |ctx, value: Value| {
                        let sheet = sheet.clone();
                        async move {
                            if let Some(name) = text_of(&value) {
                                sheet.update(|s| s.name = name)?;
                            }
                            reply(&ctx, Emoji::Ok, "Renamed").await
                        }
                    }));
                    Box::new(field) as Box<dyn InteractionNode>
                }),
                MenuItem::new("Header").state(move || {
                    Box::new(settings_field(header.clone(), "Text above the events?", |s, v| {
                        s.header = v;
                    })) as Box<dyn InteractionNode>
                }),
                MenuItem::new("Footer").state(move || {
                    Box::new(settings_field(footer.clone(), "Text below the events?", |s, v| {
                        s.footer = v;
                    })) as Box<dyn InteractionNode>
                }),
                MenuItem::new("Close").answer("Closed").closes(),
            ]
        },
    )
}

async fn schedule_autopost(
    services: &Services,
    ctx: &DialogContext,
    target: Destination,
    source_id: String,
    hours: u64,
) -> DialogResult<()> {
    let period = i64::try_from(hours)
        .ok()
        .and_then(|h| Period::hours(services.clock.now(), h).ok())
        .ok_or_else(|| DialogError::command("autopost", format!("bad interval {hours}h")))?;

    let replaced = services
        .actions
        .remove_where(|a| a.repost_chat() == Some(&target))?;
    let id = services.actions.next_id()?;
    let action = PeriodicAction::new(
        id,
        session(ctx),
        period,
        ActionKind::AutoRepost {
            chat: target.clone(),
            source_id,
            translation_id: None,
        },
    );
    services.actions.put(action)?;
    info!(action_id = id, chat = %target, hours, replaced, "auto-repost scheduled");

    let first = period.next_due(services.clock.now());
    reply(
        ctx,
        Emoji::Ok,
        Content::plain(format!("Every {hours}h I will repost the timesheet to {target}. First run at "))
            .code(first.format("%d.%m %H:%M UTC").to_string()),
    )
    .await
}

// ============================================================================
// Handlers
// ============================================================================

fn cmd_start<'a>(
    _dialog: &'a mut TimesheetDialog,
    ctx: &'a DialogContext,
    _args: &'a str,
) -> BoxFuture<'a, DialogResult<()>> {
    Box::pin(async move {
        reply(
            ctx,
            Emoji::Info,
            Content::plain("Hi! I keep event schedules and the posts that show them up to date.")
                .line()
                .text("Start with /new, then /add events. /help lists everything."),
        )
        .await
    })
}

fn cmd_help<'a>(
    dialog: &'a mut TimesheetDialog,
    ctx: &'a DialogContext,
    _args: &'a str,
) -> BoxFuture<'a, DialogResult<()>> {
    Box::pin(async move {
        let mut content = Content::new().bold("Commands");
        for command in dialog.commands() {
            content = content
                .line()
                .code(format!("/{}", command.name))
                .text(format!(" {}", command.description));
        }
        reply(ctx, Emoji::Info, content).await
    })
}

fn cmd_cancel<'a>(
    _dialog: &'a mut TimesheetDialog,
    ctx: &'a DialogContext,
    _args: &'a str,
) -> BoxFuture<'a, DialogResult<()>> {
    Box::pin(async move { reply(ctx, Emoji::Ok, "Okay, back to the start").await })
}

fn cmd_new<'a>(
    dialog: &'a mut TimesheetDialog,
    ctx: &'a DialogContext,
    args: &'a str,
) -> BoxFuture<'a, DialogResult<()>> {
    Box::pin(async move {
        let services = dialog.services().clone();
        let names = new_name(services.book.clone());
        let mut words = args.split_whitespace();
        if let Some(name) = words.next().and_then(|w| accepted(&check_arg(names.as_ref(), ctx, w))) {
            let password = match words.next() {
                Some(w) => accepted(&check_arg(&Id::password(PASSWORD_RULES), ctx, w)),
                None => Some(new_password()),
            };
            if let Some(password) = password {
                return create_sheet(&services, ctx, &name, &password).await;
            }
        }
        let form = InputForm::starting_with(
            name_field("What is the timesheet called?", services.book.clone()),
            [InputField::new(
                "Password for joining it with /join?",
                Arc::new(Id::password(PASSWORD_RULES)),
            )
            .button_row(vec![FieldButton::new("Make one up", Value::Null)])],
        )
        .abort_message("No timesheet was created")
        .on_complete(callback(move |ctx, values: Vec<Value>| {
            let services = services.clone();
            async move {
                let name = values.first().and_then(text_of).unwrap_or_default();
                let password = values.get(1).and_then(text_of).unwrap_or_else(new_password);
                create_sheet(&services, &ctx, &name, &password).await
            }
        }));
        dialog.slot().set(ctx, Box::new(form)).await
    })
}

fn cmd_add<'a>(
    dialog: &'a mut TimesheetDialog,
    ctx: &'a DialogContext,
    _args: &'a str,
) -> BoxFuture<'a, DialogResult<()>> {
    Box::pin(async move {
        let Some(sheet) = current_sheet(dialog.services(), ctx).await? else {
            return Ok(());
        };
        dialog.slot().set(ctx, Box::new(add_event_form(sheet))).await
    })
}

fn cmd_join<'a>(
    dialog: &'a mut TimesheetDialog,
    ctx: &'a DialogContext,
    args: &'a str,
) -> BoxFuture<'a, DialogResult<()>> {
    Box::pin(async move {
        let services = dialog.services().clone();
        let slot: Chosen = Arc::new(Mutex::new(None));
        let name = join_name(services.book.clone(), session(ctx).to_string(), Arc::clone(&slot));
        let password = join_password(Arc::clone(&slot));

        let mut words = args.split_whitespace();
        if let (Some(n), Some(p)) = (words.next(), words.next())
            && check_arg(name.as_ref(), ctx, n).success
            && check_arg(password.as_ref(), ctx, p).success
        {
            return join_sheet(&services, ctx, &slot).await;
        }

        let form = InputForm::starting_with(
            InputField::new("Name of the timesheet?", name),
            [InputField::new("Its password?", password)],
        )
        .abort_message("No timesheet was chosen")
        .on_complete(callback(move |ctx, _values: Vec<Value>| {
            let services = services.clone();
            let slot = Arc::clone(&slot);
            async move { join_sheet(&services, &ctx, &slot).await }
        }));
        dialog.slot().set(ctx, Box::new(form)).await
    })
}

fn cmd_timesheets<'a>(
    dialog: &'a mut TimesheetDialog,
    ctx: &'a DialogContext,
    _args: &'a str,
) -> BoxFuture<'a, DialogResult<()>> {
    Box::pin(async move {
        let names = dialog.services().book.names();
        if names.is_empty() {
            return reply(ctx, Emoji::Fail, "There are no timesheets yet, create one with /new").await;
        }
        let mut content = Content::new().bold("Timesheets");
        for name in names {
            content = content.line().code(name);
        }
        reply(ctx, Emoji::Info, content).await
    })
}

fn cmd_info<'a>(
    dialog: &'a mut TimesheetDialog,
    ctx: &'a DialogContext,
    _args: &'a str,
) -> BoxFuture<'a, DialogResult<()>> {
    Box::pin(async move {
        let Some(sheet) = current_sheet(dialog.services(), ctx).await? else {
            return Ok(());
        };
        let card = sheet.read(|s| {
            format!(
                "Name:     {}\nPassword: {}\nEvents:   {}",
                s.name,
                s.password,
                s.events.len()
            )
        });
        reply(
            ctx,
            Emoji::Info,
            Content::new().code(card).line().text("Others switch to it with /join"),
        )
        .await
    })
}

fn cmd_events<'a>(
    dialog: &'a mut TimesheetDialog,
    ctx: &'a DialogContext,
    _args: &'a str,
) -> BoxFuture<'a, DialogResult<()>> {
    Box::pin(async move {
        let Some(sheet) = current_sheet(dialog.services(), ctx).await? else {
            return Ok(());
        };
        let (name, lines) = sheet.read(|s| {
            let mut events: Vec<&EventEntry> = s.events.iter().collect();
            events.sort_by_key(|e| e.starts);
            let lines: Vec<String> = events.iter().map(|e| e.preview()).collect();
            (s.name.clone(), lines)
        });
        if lines.is_empty() {
            return reply(ctx, Emoji::Fail, "No events yet, add some with /add").await;
        }
        let mut content = Content::new().bold(name);
        for line in lines {
            content = content.line().code(line);
        }
        reply(ctx, Emoji::Info, content).await
    })
}

fn cmd_edit_event<'a>(
    dialog: &'a mut TimesheetDialog,
    ctx: &'a DialogContext,
    _args: &'a str,
) -> BoxFuture<'a, DialogResult<()>> {
    Box::pin(async move {
        let Some(sheet) = current_sheet(dialog.services(), ctx).await? else {
            return Ok(());
        };
        dialog.slot().set(ctx, Box::new(EventEditor::new(sheet))).await
    })
}

fn cmd_remove_event<'a>(
    dialog: &'a mut TimesheetDialog,
    ctx: &'a DialogContext,
    args: &'a str,
) -> BoxFuture<'a, DialogResult<()>> {
    Box::pin(async move {
        let Some(sheet) = current_sheet(dialog.services(), ctx).await? else {
            return Ok(());
        };
        let picker = event_picker(sheet.clone());
        if !args.is_empty() {
            let verdict = check_arg(picker.as_ref(), ctx, args);
            if verdict.success
                && let Some(id) = verdict.data.as_u64()
            {
                return remove_event(&sheet, ctx, id).await;
            }
        }
        let field = InputField::new(PICK_EVENT, picker)
            .abort_message("Event removal stopped")
            .on_complete(callback(move |ctx, value: Value| {
                let sheet = sheet.clone();
                async move {
                    let id = value
                        .as_u64()
                        .ok_or_else(|| DialogError::command("remove_event", "no event number"))?;
                    remove_event(&sheet, &ctx, id).await
                }
            }));
        dialog.slot().set(ctx, Box::new(field)).await
    })
}

fn cmd_menu<'a>(
    dialog: &'a mut TimesheetDialog,
    ctx: &'a DialogContext,
    _args: &'a str,
) -> BoxFuture<'a, DialogResult<()>> {
    Box::pin(async move {
        let services = dialog.services().clone();
        let Some(sheet) = current_sheet(&services, ctx).await? else {
            return Ok(());
        };
        let target = post_target(&services, ctx)?;
        let settings = services.book.settings(&target)?;
        dialog
            .slot()
            .set(ctx, Box::new(sheet_menu(services.book.clone(), sheet, settings, target)))
            .await
    })
}

async fn connect_chat(services: &Services, ctx: &DialogContext, name: String) -> DialogResult<()> {
    let target = Destination::chat(name);
    services
        .book
        .update_profile(session(ctx), |p| p.connected = Some(target.clone()))?;
    reply(
        ctx,
        Emoji::Ok,
        Content::plain("Connected to ")
            .bold(target.to_string())
            .text(". Now /live posts there"),
    )
    .await
}

fn cmd_connect<'a>(
    dialog: &'a mut TimesheetDialog,
    ctx: &'a DialogContext,
    args: &'a str,
) -> BoxFuture<'a, DialogResult<()>> {
    Box::pin(async move {
        let services = dialog.services().clone();
        if !args.is_empty() {
            let verdict = check_arg(&ChatRef, ctx, args);
            if verdict.success
                && let Some(name) = text_of(&verdict.data)
            {
                return connect_chat(&services, ctx, name).await;
            }
        }
        let field = InputField::new(
            Content::plain("Which chat? Add me there as an admin first, then send its ")
                .code("@name"),
            Arc::new(ChatRef),
        )
        .abort_message("Nothing was connected")
        .on_complete(callback(move |ctx, value: Value| {
            let services = services.clone();
            async move {
                let name = text_of(&value).unwrap_or_default();
                connect_chat(&services, &ctx, name).await
            }
        }));
        dialog.slot().set(ctx, Box::new(field)).await
    })
}

fn cmd_post<'a>(
    dialog: &'a mut TimesheetDialog,
    ctx: &'a DialogContext,
    _args: &'a str,
) -> BoxFuture<'a, DialogResult<()>> {
    Box::pin(async move {
        let services = dialog.services();
        let Some(sheet) = current_sheet(services, ctx).await? else {
            return Ok(());
        };
        let id = sheet.read(|s| s.id);
        match services.book.render(id, ctx.chat(), RenderFilter::All)? {
            Some(content) if !content.is_empty() => {
                ctx.send(content).await?;
                Ok(())
            }
            _ => reply(ctx, Emoji::Think, "Nothing to show yet, add events with /add").await,
        }
    })
}

fn cmd_live<'a>(
    dialog: &'a mut TimesheetDialog,
    ctx: &'a DialogContext,
    _args: &'a str,
) -> BoxFuture<'a, DialogResult<()>> {
    Box::pin(async move {
        let services = dialog.services();
        let Some(sheet) = current_sheet(services, ctx).await? else {
            return Ok(());
        };
        let target = post_target(services, ctx)?;
        let source = source_of(&sheet);
        let chat = target.clone();
        match services
            .translations
            .create(move |id| TranslationRecord::new(id, chat, source))
            .await
        {
            Ok(sync) => {
                reply(
                    ctx,
                    Emoji::Live,
                    format!("Live post #{} is up in {target}", sync.id()),
                )
                .await
            }
            Err(SyncError::EmptyContent) => {
                reply(ctx, Emoji::Think, "No upcoming events to show, add some with /add").await
            }
            Err(e) => Err(e.into()),
        }
    })
}

fn cmd_live_to<'a>(
    dialog: &'a mut TimesheetDialog,
    ctx: &'a DialogContext,
    _args: &'a str,
) -> BoxFuture<'a, DialogResult<()>> {
    Box::pin(async move {
        let services = dialog.services().clone();
        let Some(sheet) = current_sheet(&services, ctx).await? else {
            return Ok(());
        };
        let source = source_of(&sheet);
        let field = InputField::new("Send me a link to the message to take over", Arc::new(MessageUrl))
            .abort_message("No message was taken over")
            .on_complete(callback(move |ctx, value: Value| {
                let services = services.clone();
                let source = source.clone();
                async move {
                    let (Some(chat), Some(message_id)) = (
                        value.get("chat").and_then(text_of),
                        value
                            .get("message_id")
                            .and_then(Value::as_i64)
                            .and_then(|id| i32::try_from(id).ok()),
                    ) else {
                        return Err(DialogError::command("live_to", "bad message link"));
                    };
                    let target = Destination::chat(chat);
                    let sync = services
                        .translations
                        .create(|id| TranslationRecord::new(id, target.clone(), source).with_message(message_id))
                        .await?;
                    match sync.update_post().await {
                        Ok(()) => reply(
                            &ctx,
                            Emoji::Live,
                            format!("Message {message_id} in {target} is live post #{} now", sync.id()),
                        )
                        .await,
                        Err(e) => {
                            reply(
                                &ctx,
                                Emoji::Fail,
                                format!("I could not take over that message: {e}"),
                            )
                            .await
                        }
                    }
                }
            }));
        dialog.slot().set(ctx, Box::new(field)).await
    })
}

fn cmd_autopost<'a>(
    dialog: &'a mut TimesheetDialog,
    ctx: &'a DialogContext,
    args: &'a str,
) -> BoxFuture<'a, DialogResult<()>> {
    Box::pin(async move {
        let services = dialog.services().clone();
        let Some(sheet) = current_sheet(&services, ctx).await? else {
            return Ok(());
        };
        let target = post_target(&services, ctx)?;
        let source = source_of(&sheet);

        let hours: BoxValidator = Arc::new(Chain::new(vec![
            Arc::new(Int::with_error("How many hours? Just a number")) as BoxValidator,
            Arc::new(FnValidator::new(|input: Verdict| match input.data.as_u64() {
                Some(h) if (1..=MAX_AUTOPOST_HOURS).contains(&h) => input,
                _ => input.reject(format!("Pick between 1 and {MAX_AUTOPOST_HOURS} hours")),
            })),
        ]));

        if !args.is_empty() {
            let verdict = check_arg(hours.as_ref(), ctx, args);
            if let Some(h) = verdict.success.then(|| verdict.data.as_u64()).flatten() {
                return schedule_autopost(&services, ctx, target, source, h).await;
            }
        }

        let presets = AUTOPOST_PRESETS
            .iter()
            .map(|h| FieldButton::new(format!("{h}h"), *h))
            .collect();
        let field = InputField::new(
            format!("Every how many hours should I repost to {target}?"),
            hours,
        )
        .button_row(presets)
        .abort_message("Auto-repost was not set up")
        .on_complete(callback(move |ctx, value: Value| {
            let services = services.clone();
            let target = target.clone();
            let source = source.clone();
            async move {
                let hours = value
                    .as_u64()
                    .ok_or_else(|| DialogError::command("autopost", "no hour count"))?;
                schedule_autopost(&services, &ctx, target, source, hours).await
            }
        }));
        dialog.slot().set(ctx, Box::new(field)).await
    })
}

fn cmd_stop_autopost<'a>(
    dialog: &'a mut TimesheetDialog,
    ctx: &'a DialogContext,
    _args: &'a str,
) -> BoxFuture<'a, DialogResult<()>> {
    Box::pin(async move {
        let me = session(ctx);
        let stopped = dialog.services().actions.remove_where(|a| {
            a.creator == me && matches!(a.kind, ActionKind::AutoRepost { .. })
        })?;
        if stopped == 0 {
            return reply(ctx, Emoji::Think, "There was no auto-repost").await;
        }
        reply(ctx, Emoji::Ok, format!("Stopped {stopped} auto-repost(s)")).await
    })
}

fn cmd_clear_live<'a>(
    dialog: &'a mut TimesheetDialog,
    ctx: &'a DialogContext,
    _args: &'a str,
) -> BoxFuture<'a, DialogResult<()>> {
    Box::pin(async move {
        let services = dialog.services();
        let target = post_target(services, ctx)?;
        let cleared = services
            .translations
            .remove_where(|record| record.chat == target, CLEARED_BY_USER);
        reply(
            ctx,
            Emoji::Ok,
            format!("{cleared} live post(s) in {target} will no longer update"),
        )
        .await
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cron::{ActionExecutor, ManualClock, RepostExecutor};
    use crate::dialog::Outcome;
    use crate::events::ButtonEvent;
    use crate::gateway::{MemoryGateway, MessagingGateway, Outgoing};
    use crate::store::MemoryStore;
    use chrono::{DateTime, TimeDelta, TimeZone};
    use std::time::Duration;

    struct Fixture {
        gateway: Arc<MemoryGateway>,
        clock: Arc<ManualClock>,
        services: Services,
        dialog: TimesheetDialog,
        ctx: DialogContext,
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap()
    }

    fn fixture() -> Fixture {
        let gateway = Arc::new(MemoryGateway::new());
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(now()));
        let book = TimesheetBook::new(store.clone(), clock.clone());
        let translations = TranslationRegistry::new(store.clone(), gateway.clone(), Arc::new(book.clone()));
        let executor: Arc<dyn ActionExecutor> = Arc::new(RepostExecutor::new(translations.clone()));
        let actions = ActionRegistry::with_check_interval(
            store,
            clock.clone(),
            executor,
            Duration::from_millis(10),
        );
        let services = Services {
            book,
            translations,
            actions,
            clock: clock.clone(),
        };
        let ctx = DialogContext::new(gateway.clone(), Destination::chat("42"));
        Fixture {
            gateway,
            clock,
            dialog: dialog(services.clone()),
            services,
            ctx,
        }
    }

    impl Fixture {
        async fn say(&mut self, text: &str) -> Outcome {
            self.dialog
                .handle_text(&self.ctx, &TextEvent::new("42", text))
                .await
                .unwrap()
        }

        fn last_text(&self) -> String {
            self.gateway.sent_texts().last().cloned().unwrap_or_default()
        }

        fn sheet(&self) -> Entity<Timesheet> {
            let id = self.services.book.profile("42").unwrap().timesheet_id.unwrap();
            self.services.book.get(id).unwrap()
        }

        fn add_event(&self, title: &str, in_days: i64) {
            let starts = now() + TimeDelta::days(in_days);
            self.sheet()
                .update(|s| s.add_event(EventEntry::new(title, starts)))
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_new_with_argument() {
        let mut f = fixture();
        f.say("/new Summer").await;
        assert_eq!(f.sheet().snapshot().name, "Summer");
        assert!(f.last_text().contains("Summer"));
    }

    #[tokio::test]
    async fn test_new_asks_for_name() {
        let mut f = fixture();
        f.say("/new").await;
        assert_eq!(f.last_text(), "✍️ What is the timesheet called?");
        f.say("Winter").await;
        assert_eq!(f.last_text(), "✍️ Password for joining it with /join?");
        f.say("snow_2").await;
        let sheet = f.sheet().snapshot();
        assert_eq!(sheet.name, "Winter");
        assert_eq!(sheet.password, "snow_2");
    }

    #[tokio::test]
    async fn test_new_generates_password() {
        let mut f = fixture();
        f.say("/new Summer").await;
        let password = f.sheet().snapshot().password;
        assert_eq!(password.len(), PASSWORD_LEN);
        assert!(f.last_text().contains(&password));
    }

    #[tokio::test]
    async fn test_new_rejects_taken_and_odd_names() {
        let mut f = fixture();
        f.say("/new Summer").await;
        f.say("/new Summer").await;
        assert_eq!(f.last_text(), "✍️ What is the timesheet called?");
        f.say("Summer").await;
        assert_eq!(f.last_text(), "⚠️ That name is taken, try another");
        f.say("Summer fest").await;
        assert_eq!(f.last_text(), format!("⚠️ {NAME_RULES}"));
        assert_eq!(f.services.book.len(), 1);
    }

    #[tokio::test]
    async fn test_join_checks_password() {
        let mut f = fixture();
        f.services.book.create("Winter", "snow", "7").unwrap();
        f.say("/new Summer sun").await;

        f.say("/join").await;
        f.say("Autumn").await;
        assert!(f.last_text().contains("There is no timesheet Autumn"));
        f.say("Summer").await;
        assert_eq!(f.last_text(), "🥺 This timesheet is already yours");
        f.say("Winter").await;
        assert_eq!(f.last_text(), "✍️ Its password?");
        f.say("rain").await;
        assert_eq!(f.last_text(), "🥺 Wrong password");
        assert_eq!(f.sheet().snapshot().name, "Summer");

        f.say("snow").await;
        assert_eq!(f.last_text(), "🍌 Switched to Winter");
        assert_eq!(f.sheet().snapshot().name, "Winter");
    }

    #[tokio::test]
    async fn test_join_inline() {
        let mut f = fixture();
        f.services.book.create("Winter", "snow", "7").unwrap();
        f.say("/join Winter snow").await;
        assert_eq!(f.sheet().snapshot().name, "Winter");
        assert!(!f.dialog.slot().is_active());
    }

    #[tokio::test]
    async fn test_timesheets_and_info() {
        let mut f = fixture();
        f.say("/timesheets").await;
        assert_eq!(f.last_text(), "🥺 There are no timesheets yet, create one with /new");

        f.say("/new Summer sun").await;
        f.services.book.create("Winter", "snow", "7").unwrap();
        f.say("/timesheets").await;
        let text = f.last_text();
        assert!(text.contains("Summer") && text.contains("Winter"));

        f.say("/info").await;
        let text = f.last_text();
        assert!(text.contains("Name:     Summer"));
        assert!(text.contains("Password: sun"));
    }

    #[tokio::test]
    async fn test_events_listed_by_start() {
        let mut f = fixture();
        f.say("/new Summer").await;
        f.say("/events").await;
        assert_eq!(f.last_text(), "🥺 No events yet, add some with /add");

        f.add_event("Picnic", 2);
        f.add_event("Concert", 1);
        f.say("/events").await;
        let text = f.last_text();
        let concert = text.find("#2").unwrap();
        let picnic = text.find("#1").unwrap();
        assert!(concert < picnic);
        assert!(text.contains("Picnic") && text.contains("Concert"));
    }

    #[tokio::test]
    async fn test_remove_event_by_words_or_number() {
        let mut f = fixture();
        f.say("/new Summer").await;
        f.add_event("Picnic in the park", 1);
        f.add_event("Park concert", 2);
        f.add_event("Quiz", 3);

        f.say("/remove_event").await;
        assert_eq!(f.last_text(), format!("✍️ {PICK_EVENT}"));
        f.say("park").await;
        assert!(f.last_text().contains("Several events match"));
        f.say("picnic").await;
        assert_eq!(f.last_text(), "🍌 Removed Picnic in the park");

        f.say("/remove_event 3").await;
        assert_eq!(f.last_text(), "🍌 Removed Quiz");
        let events = f.sheet().snapshot().events;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, 2);
    }

    #[tokio::test]
    async fn test_edit_event_opens_menu() {
        let mut f = fixture();
        f.say("/new Summer").await;
        f.add_event("Picnic", 1);
        f.say("/edit_event").await;
        f.say("1").await;

        match f.gateway.outgoing().last() {
            Some(Outgoing::Sent { content, .. }) => {
                assert!(content.plain_text().contains("Picnic"));
                assert!(content.keyboard.is_some());
            }
            other => panic!("expected the event menu, got {other:?}"),
        }
        assert!(f.dialog.slot().is_active());

        f.say("/cancel").await;
        assert!(f.gateway.sent_texts().iter().any(|t| t == "🍌 Event editing finished"));
    }

    #[tokio::test]
    async fn test_commands_need_a_timesheet() {
        let mut f = fixture();
        f.say("/add").await;
        assert_eq!(f.last_text(), "🥺 Create a timesheet with /new first");
    }

    #[tokio::test]
    async fn test_add_event_form() {
        let mut f = fixture();
        f.say("/new Summer").await;
        f.say("/add").await;
        f.say("Picnic").await;
        f.say("someday").await;
        assert!(f.last_text().contains("24.12 19:30"));
        f.say("24.12.2030 19:30").await;
        f.say("https://example.com/picnic").await;

        let events = f.sheet().snapshot().events;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].title, "Picnic");
        assert_eq!(events[0].url.as_deref(), Some("https://example.com/picnic"));
        assert_eq!(f.last_text(), "🍌 Added Picnic");
    }

    #[tokio::test]
    async fn test_switching_command_aborts_form() {
        let mut f = fixture();
        f.say("/new Summer").await;
        f.say("/add").await;
        f.say("/help").await;

        let texts = f.gateway.sent_texts();
        assert!(texts.iter().any(|t| t == "⚠️ The event was not added"));
        assert!(f.last_text().contains("/autopost"));
        assert!(f.sheet().snapshot().events.is_empty());
    }

    #[tokio::test]
    async fn test_unclaimed_text_falls_back() {
        let mut f = fixture();
        f.say("hello?").await;
        assert_eq!(f.last_text(), format!("🤔 {}", crate::dialog::NOT_UNDERSTOOD));
    }

    #[tokio::test]
    async fn test_live_follows_edits() {
        let mut f = fixture();
        f.say("/new Summer").await;
        f.say("/connect @news").await;
        f.say("/live").await;
        assert_eq!(f.last_text(), "🤔 No upcoming events to show, add some with /add");

        f.add_event("Picnic", 2);
        f.say("/live").await;
        assert_eq!(f.services.translations.len(), 1);
        let live = f.services.translations.all().remove(0);
        assert_eq!(live.target(), &Destination::chat("@news"));

        f.add_event("Concert", 3);
        for _ in 0..100 {
            let text = f
                .gateway
                .message(live.target(), live.message_id().unwrap())
                .unwrap()
                .plain_text();
            if text.contains("Concert") {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("live post did not follow the edit");
    }

    #[tokio::test]
    async fn test_clear_live() {
        let mut f = fixture();
        f.say("/new Summer").await;
        f.add_event("Picnic", 1);
        f.say("/live").await;
        f.say("/live").await;
        assert_eq!(f.services.translations.len(), 2);

        f.say("/clear_live").await;
        assert!(f.services.translations.is_empty());
        assert_eq!(f.last_text(), "🍌 2 live post(s) in 42 will no longer update");
    }

    #[tokio::test]
    async fn test_autopost_preset_button() {
        let mut f = fixture();
        f.say("/new Summer").await;
        f.add_event("Picnic", 1);
        f.say("/autopost").await;

        let keyboard = f.gateway.sent().last().unwrap().keyboard.clone().unwrap();
        let six = keyboard.buttons().find(|b| b.title == "6h").unwrap().token.clone();
        f.dialog
            .handle_button(&f.ctx, &ButtonEvent::new("42", six, "u", "a1"))
            .await
            .unwrap();

        let actions = f.services.actions.list().unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].period.interval(), TimeDelta::hours(6));
        assert_eq!(actions[0].repost_chat(), Some(&Destination::chat("42")));

        // Due six hours later: the scheduler posts a live copy.
        f.clock.advance(TimeDelta::hours(6));
        for _ in 0..200 {
            if f.services.translations.len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(f.services.translations.len(), 1);

        f.say("/stop_autopost").await;
        assert!(f.services.actions.is_empty());
        assert_eq!(f.last_text(), "🍌 Stopped 1 auto-repost(s)");
    }

    #[tokio::test]
    async fn test_autopost_rejects_bad_hours() {
        let mut f = fixture();
        f.say("/new Summer").await;
        f.say("/autopost").await;
        f.say("0").await;
        assert!(f.last_text().contains("Pick between 1 and 168 hours"));
        f.say("/cancel").await;
        assert!(f.services.actions.is_empty());
    }

    #[tokio::test]
    async fn test_menu_renames_and_closes() {
        let mut f = fixture();
        f.say("/new Summer").await;
        f.say("/menu").await;

        let menu_id = match f.gateway.outgoing().last() {
            Some(Outgoing::Sent { message_id, .. }) => *message_id,
            other => panic!("expected the menu, got {other:?}"),
        };
        let token = |f: &Fixture, title: &str| {
            let menu = f.gateway.message(f.ctx.chat(), menu_id).unwrap();
            menu.keyboard
                .unwrap()
                .buttons()
                .find(|b| b.title == title)
                .unwrap()
                .token
                .clone()
        };

        let rename = token(&f, "Rename");
        f.dialog
            .handle_button(&f.ctx, &ButtonEvent::new("42", rename, "u", "a1"))
            .await
            .unwrap();
        f.say("Autumn").await;
        assert_eq!(f.sheet().snapshot().name, "Autumn");
        let menu = f.gateway.message(f.ctx.chat(), menu_id).unwrap();
        assert!(menu.plain_text().contains("Autumn"));

        let close = token(&f, "Close");
        f.dialog
            .handle_button(&f.ctx, &ButtonEvent::new("42", close, "u", "a2"))
            .await
            .unwrap();
        assert!(!f.dialog.slot().is_active());
    }

    #[tokio::test]
    async fn test_live_to_takes_over_message() {
        let mut f = fixture();
        f.say("/new Summer").await;
        f.add_event("Picnic", 1);
        let news = Destination::chat("@news");
        let existing = f
            .gateway
            .send(&news, &Content::plain("placeholder"))
            .await
            .unwrap();

        f.say("/live_to").await;
        f.say(&format!("https://t.me/news/{existing}")).await;

        let text = f.gateway.message(&news, existing).unwrap().plain_text();
        assert!(text.contains("Picnic"));
        assert_eq!(f.services.translations.len(), 1);
    }
}
