//! Root node of one conversation.
//!
//! A [`Dialog`] owns the session's active substate and routes `/commands`
//! through a static table. Any `/`-prefixed text first aborts the current
//! substate. Whatever nobody claims gets a polite fallback.

use super::node::{DialogContext, InteractionNode, Outcome, Substate};
use crate::error::DialogResult;
use crate::events::{ButtonEvent, Content, Emoji, TextEvent};
use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::{debug, info};

/// Reply to text nobody claimed.
pub const NOT_UNDERSTOOD: &str = "I don't understand what you want. Try /help";

/// Reply to an unknown `/command`.
pub const UNKNOWN_COMMAND: &str = "Unknown command";

/// Acknowledgement for a button nobody claimed.
pub const NOTHING_TO_DO: &str = "Nothing to do";

/// Handler of one command: the dialog, its context, and the argument text.
pub type CommandFn<S> =
    for<'a> fn(&'a mut Dialog<S>, &'a DialogContext, &'a str) -> BoxFuture<'a, DialogResult<()>>;

/// One entry of a command table.
pub struct Command<S: 'static> {
    /// Name without the slash.
    pub name: &'static str,
    /// One-line description for help and the platform menu.
    pub description: &'static str,
    /// Whether to list the command in the platform menu.
    pub menu: bool,
    /// The handler.
    pub run: CommandFn<S>,
}

impl<S> std::fmt::Debug for Command<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("menu", &self.menu)
            .finish_non_exhaustive()
    }
}

/// Root interaction node of a session.
pub struct Dialog<S: 'static> {
    services: S,
    commands: &'static [Command<S>],
    slot: Substate,
}

impl<S> std::fmt::Debug for Dialog<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dialog")
            .field("commands", &self.commands.len())
            .field("slot", &self.slot)
            .finish_non_exhaustive()
    }
}

impl<S: Send + Sync + 'static> Dialog<S> {
    /// Dialog dispatching to `commands`.
    pub fn new(services: S, commands: &'static [Command<S>]) -> Self {
        Self {
            services,
            commands,
            slot: Substate::new(),
        }
    }

    /// Shared services handed to command handlers.
    pub const fn services(&self) -> &S {
        &self.services
    }

    /// The active substate slot.
    pub fn slot(&mut self) -> &mut Substate {
        &mut self.slot
    }

    /// The command table.
    #[must_use]
    pub const fn commands(&self) -> &'static [Command<S>] {
        self.commands
    }

    fn find(&self, name: &str) -> Option<&'static Command<S>> {
        self.commands
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

#[async_trait]
impl<S: Send + Sync + 'static> InteractionNode for Dialog<S> {
    fn substate(&mut self) -> Option<&mut Substate> {
        Some(&mut self.slot)
    }

    async fn before_text(&mut self, ctx: &DialogContext, event: &TextEvent) -> DialogResult<bool> {
        let Some((name, args)) = event.command() else {
            return Ok(false);
        };
        self.slot.terminate(ctx).await?;

        match self.find(name) {
            Some(command) => {
                info!(chat = %ctx.chat(), command = command.name, "running command");
                (command.run)(self, ctx, args).await?;
            }
            None => {
                debug!(chat = %ctx.chat(), command = name, "unknown command");
                ctx.send(Content::plain(UNKNOWN_COMMAND).with_emoji(Emoji::Fail))
                    .await?;
            }
        }
        Ok(true)
    }

    async fn on_text(&mut self, ctx: &DialogContext, _event: &TextEvent) -> DialogResult<Outcome> {
        ctx.send(Content::plain(NOT_UNDERSTOOD).with_emoji(Emoji::Think))
            .await?;
        Ok(Outcome::Handled)
    }

    async fn on_button(&mut self, ctx: &DialogContext, event: &ButtonEvent) -> DialogResult<Outcome> {
        ctx.acknowledge(event, NOTHING_TO_DO).await?;
        Ok(Outcome::Handled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialog::node::tests::{Tracer, context};
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    fn cmd_trace<'a>(
        dialog: &'a mut Dialog<Log>,
        ctx: &'a DialogContext,
        args: &'a str,
    ) -> BoxFuture<'a, DialogResult<()>> {
        Box::pin(async move {
            dialog.services().lock().unwrap().push(format!("trace {args}"));
            let node = Tracer::boxed("p", dialog.services());
            dialog.slot().set(ctx, node).await
        })
    }

    static COMMANDS: &[Command<Log>] = &[Command {
        name: "trace",
        description: "Start a tracer",
        menu: true,
        run: cmd_trace,
    }];

    fn text(t: &str) -> TextEvent {
        TextEvent::new("42", t)
    }

    #[tokio::test]
    async fn test_command_runs_handler() {
        let (_gateway, ctx) = context();
        let log: Log = Arc::default();
        let mut dialog = Dialog::new(Arc::clone(&log), COMMANDS);

        dialog.handle_text(&ctx, &text("/trace now")).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["trace now", "p:start"]);

        dialog.handle_text(&ctx, &text("hello")).await.unwrap();
        assert_eq!(log.lock().unwrap().last().unwrap(), "p:text hello");
    }

    #[tokio::test]
    async fn test_unknown_command_aborts_substate() {
        let (gateway, ctx) = context();
        let log: Log = Arc::default();
        let mut dialog = Dialog::new(Arc::clone(&log), COMMANDS);

        dialog.handle_text(&ctx, &text("/trace")).await.unwrap();
        dialog.handle_text(&ctx, &text("/nope")).await.unwrap();

        assert_eq!(log.lock().unwrap().last().unwrap(), "p:terminate");
        assert_eq!(gateway.sent_texts(), vec![format!("🥺 {UNKNOWN_COMMAND}")]);

        dialog.handle_text(&ctx, &text("free text")).await.unwrap();
        assert_eq!(
            gateway.sent_texts().last().unwrap(),
            &format!("🤔 {NOT_UNDERSTOOD}")
        );
    }

    #[tokio::test]
    async fn test_unclaimed_button_is_acknowledged() {
        let (gateway, ctx) = context();
        let mut dialog = Dialog::new(Log::default(), COMMANDS);

        let press = ButtonEvent::new("42", "stale", "u", "a1");
        let outcome = dialog.handle_button(&ctx, &press).await.unwrap();
        assert_eq!(outcome, Outcome::Handled);
        assert_eq!(gateway.acknowledgements(), vec![NOTHING_TO_DO]);
    }
}
