//! Dialogs driven through the public dispatcher.

use futures::future::BoxFuture;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use timesheet_bot::bus::MessageBus;
use timesheet_bot::dialog::validate::{Int, Text};
use timesheet_bot::dialog::{
    Command, Dialog, DialogContext, Dispatcher, InputField, InputForm, callback,
};
use timesheet_bot::error::DialogResult;
use timesheet_bot::events::TextEvent;
use timesheet_bot::gateway::MemoryGateway;

#[derive(Clone, Default)]
struct Survey {
    collected: Arc<Mutex<Vec<Value>>>,
}

static COMMANDS: &[Command<Survey>] = &[Command {
    name: "signup",
    description: "Sign up",
    menu: true,
    run: cmd_signup,
}];

fn cmd_signup<'a>(
    dialog: &'a mut Dialog<Survey>,
    ctx: &'a DialogContext,
    _args: &'a str,
) -> BoxFuture<'a, DialogResult<()>> {
    Box::pin(async move {
        let collected = Arc::clone(&dialog.services().collected);
        let form = InputForm::new(vec![
            InputField::new("Your name?", Arc::new(Text::new())),
            InputField::new("Your age?", Arc::new(Int::with_error("Age must be a number"))),
        ])?
        .abort_message("Sign-up cancelled")
        .on_complete(callback(move |ctx: DialogContext, values: Vec<Value>| {
            let collected = Arc::clone(&collected);
            async move {
                collected.lock().unwrap().extend(values);
                ctx.send("Welcome!").await?;
                Ok(())
            }
        }));
        dialog.slot().set(ctx, Box::new(form)).await
    })
}

fn setup() -> (Arc<MemoryGateway>, Survey, Dispatcher<Survey>) {
    let gateway = Arc::new(MemoryGateway::new());
    let survey = Survey::default();
    let services = survey.clone();
    let dispatcher = Dispatcher::new(gateway.clone(), move |_session| {
        Dialog::new(services.clone(), COMMANDS)
    });
    (gateway, survey, dispatcher)
}

async fn say(dispatcher: &Dispatcher<Survey>, session: &str, text: &str) {
    dispatcher.dispatch(&TextEvent::new(session, text).into()).await;
}

#[tokio::test]
async fn test_form_collects_values_in_order() {
    let (gateway, survey, dispatcher) = setup();

    say(&dispatcher, "7", "/signup").await;
    say(&dispatcher, "7", "Alice").await;
    say(&dispatcher, "7", "abc").await;
    say(&dispatcher, "7", "42").await;

    let texts = gateway.sent_texts();
    assert!(texts[0].ends_with("Your name?"));
    assert!(texts[1].ends_with("Your age?"));
    assert_eq!(texts[2], "⚠️ Age must be a number");
    assert_eq!(texts[3], "Welcome!");
    assert_eq!(texts.len(), 4);
    assert_eq!(*survey.collected.lock().unwrap(), vec![json!("Alice"), json!(42)]);
}

#[tokio::test]
async fn test_unknown_command_aborts_form() {
    let (gateway, survey, dispatcher) = setup();

    say(&dispatcher, "7", "/signup").await;
    say(&dispatcher, "7", "Alice").await;
    say(&dispatcher, "7", "/nope").await;
    say(&dispatcher, "7", "42").await;

    let texts = gateway.sent_texts();
    assert!(texts.iter().any(|t| t.ends_with("Sign-up cancelled")));
    assert!(texts.iter().any(|t| t.ends_with("Unknown command")));
    // With the form gone, the number is nobody's business.
    assert!(texts.last().unwrap().contains("Try /help"));
    assert!(survey.collected.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_sessions_are_independent() {
    let (gateway, survey, dispatcher) = setup();

    say(&dispatcher, "a", "/signup").await;
    say(&dispatcher, "b", "/signup").await;
    say(&dispatcher, "a", "Ann").await;
    say(&dispatcher, "b", "Bob").await;
    say(&dispatcher, "b", "30").await;

    assert_eq!(dispatcher.session_count().await, 2);
    assert_eq!(*survey.collected.lock().unwrap(), vec![json!("Bob"), json!(30)]);
    assert!(gateway.sent_texts().last().unwrap().ends_with("Welcome!"));
}

#[tokio::test]
async fn test_dispatcher_runs_from_bus() {
    let (gateway, survey, dispatcher) = setup();
    let dispatcher = Arc::new(dispatcher);
    let bus = MessageBus::new();

    for text in ["/signup", "Alice", "42"] {
        bus.publish_inbound(TextEvent::new("7", text).into())
            .await
            .unwrap();
    }

    let runner = Arc::clone(&dispatcher);
    let loop_bus = bus.clone();
    let task = tokio::spawn(async move { runner.run(&loop_bus).await });

    for _ in 0..200 {
        if survey.collected.lock().unwrap().len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    dispatcher.stop().await;
    task.await.unwrap().unwrap();

    assert_eq!(*survey.collected.lock().unwrap(), vec![json!("Alice"), json!(42)]);
    assert_eq!(gateway.sent_texts().last().map(String::as_str), Some("Welcome!"));
}
