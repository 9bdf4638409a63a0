//! Terminal front end
//!
//! Command parsing, display formatting and the interactive loop that
//! multiplexes stdin lines with pushed messaging events.

use crate::client::UniMesh;
use crate::error::{ClientError, Result};
use crate::models::{EventFilters, Message, MessageType, NoticeFilters, UserId};
use crate::services::HubEvent;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Command types for the terminal
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    List,
    Open(usize),
    New(String),
    Leave,
    Pin(usize),
    Orgs,
    Events,
    Notices,
    Message(String),
    Quit,
}

impl Command {
    /// Parse a command string
    pub fn parse(input: &str) -> std::result::Result<Self, String> {
        let input = input.trim();

        let (name, arg) = input
            .split_once(char::is_whitespace)
            .map(|(name, arg)| (name, arg.trim()))
            .unwrap_or((input, ""));

        match name {
            "/quit" | "/exit" => Ok(Command::Quit),
            "/list" => Ok(Command::List),
            "/leave" => Ok(Command::Leave),
            "/orgs" => Ok(Command::Orgs),
            "/events" => Ok(Command::Events),
            "/notices" => Ok(Command::Notices),
            "/open" => parse_index(arg, "/open <n>").map(Command::Open),
            "/pin" => parse_index(arg, "/pin <n>").map(Command::Pin),
            "/new" if arg.is_empty() => Err("Usage: /new <email-or-user-id>".to_string()),
            "/new" => Ok(Command::New(arg.to_string())),
            _ if name.starts_with('/') => Err(format!("Unknown command: {}", input)),
            _ => Ok(Command::Message(input.to_string())),
        }
    }
}

/// 1-based position as typed by the user
fn parse_index(arg: &str, usage: &str) -> std::result::Result<usize, String> {
    match arg.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(format!("Usage: {}", usage)),
    }
}

/// Parse a command from user input
pub fn parse_command(input: &str) -> Result<Command> {
    Command::parse(input).map_err(ClientError::Validation)
}

/// Format a message for display
pub fn format_message(conversation: &str, sender: &str, text: &str) -> String {
    format!("#{} <{}> {}", conversation, sender, text)
}

/// Format a control message for display
pub fn format_control(conversation: &str, action: &str) -> String {
    format!("#{} {}", conversation, action)
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

/// Forward stdin lines to a channel. Reading happens on its own task so the
/// main loop can select on the channel without losing partial lines.
pub fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    log::error!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

/// Run the interactive loop until `/quit` or end of input
pub async fn run(app: &mut UniMesh) -> Result<()> {
    print_conversations(app);
    println!("Commands: /list, /open <n>, /new <email-or-user-id>, /leave, /pin <n>, /orgs, /events, /notices, /quit");
    let mut input = spawn_stdin_reader();
    prompt();

    loop {
        tokio::select! {
            line = input.recv() => {
                let Some(line) = line else { break };
                if line.trim().is_empty() {
                    prompt();
                    continue;
                }
                match parse_command(&line) {
                    Ok(Command::Quit) => break,
                    Ok(command) => {
                        if let Err(e) = execute(app, command).await {
                            log::debug!("Command failed: {}", e);
                            println!("{}", e.user_message());
                        }
                    }
                    Err(e) => println!("{}", e),
                }
                prompt();
            }
            event = app.hub_mut().next_event() => {
                if let Some(event) = event {
                    print_event(app, &event);
                    prompt();
                }
            }
        }
    }
    println!("Goodbye!");
    Ok(())
}

async fn execute(app: &mut UniMesh, command: Command) -> Result<()> {
    match command {
        Command::List => print_conversations(app),
        Command::Open(n) => {
            let id = app
                .hub()
                .conversations()
                .get(n - 1)
                .map(|c| c.id.clone())
                .ok_or_else(|| ClientError::NotFound(format!("Conversation #{}", n)))?;
            app.open_conversation(&id).await?;
            print_history(app);
        }
        Command::New(target) => {
            let user_id = if target.contains('@') {
                app.profiles()
                    .find_by_email(&target)
                    .await?
                    .map(|p| p.id)
                    .ok_or_else(|| ClientError::NotFound(format!("No student with e-mail {}", target)))?
            } else {
                UserId::from(target.as_str())
            };
            let conversation = app
                .hub_mut()
                .create_conversation(&[user_id], false, None)
                .await?;
            app.open_conversation(&conversation.id).await?;
            print_history(app);
        }
        Command::Leave => {
            let id = active_id(app)?;
            app.hub_mut().leave_conversation(&id).await?;
            println!("Left conversation");
        }
        Command::Pin(n) => {
            let message = app
                .hub()
                .messages()
                .get(n - 1)
                .cloned()
                .ok_or_else(|| ClientError::NotFound(format!("Message #{}", n)))?;
            let updated = app
                .hub_mut()
                .pin_message(&message.id, !message.is_pinned)
                .await?;
            println!(
                "{} message {}",
                if updated.is_pinned { "Pinned" } else { "Unpinned" },
                n
            );
        }
        Command::Orgs => {
            let organizations = app.organizations().my_organizations(app.user_id()).await?;
            if organizations.is_empty() {
                println!("You are not a member of any organization");
            }
            for org in organizations {
                println!(
                    "  {} [{}]",
                    org.name,
                    org.category.as_deref().unwrap_or("general")
                );
            }
        }
        Command::Events => {
            let events = app.events().list_events(&EventFilters::default()).await?;
            if events.is_empty() {
                println!("No upcoming events");
            }
            for event in events {
                println!(
                    "  {} {} @ {}",
                    event.start_date.format("%Y-%m-%d %H:%M"),
                    event.title,
                    event.location.as_deref().unwrap_or("TBA")
                );
            }
        }
        Command::Notices => {
            let notices = app.notices().list_notices(&NoticeFilters::default()).await?;
            if notices.is_empty() {
                println!("The notice board is empty");
            }
            for notice in notices {
                let pin = if notice.is_pinned { "* " } else { "  " };
                println!(
                    "{}{} [{}]",
                    pin,
                    notice.title,
                    notice.category.as_deref().unwrap_or("general")
                );
            }
        }
        Command::Message(text) => {
            let id = active_id(app)?;
            app.hub_mut().send(&id, &text, MessageType::Text).await?;
        }
        Command::Quit => {}
    }
    Ok(())
}

fn active_id(app: &UniMesh) -> Result<crate::models::ConversationId> {
    app.hub()
        .active_conversation()
        .map(|c| c.id.clone())
        .ok_or_else(|| ClientError::State("Open a conversation first with /open <n>".to_string()))
}

fn print_conversations(app: &UniMesh) {
    let conversations = app.hub().conversations();
    if conversations.is_empty() {
        println!("No conversations yet. Start one with /new <email>");
        return;
    }
    for (i, conversation) in conversations.iter().enumerate() {
        let preview = conversation
            .latest_message
            .as_ref()
            .map(|m| m.preview(40))
            .unwrap_or_default();
        println!("{:>3}. {}  {}", i + 1, conversation.display_name, preview);
    }
}

fn print_history(app: &UniMesh) {
    for message in app.hub().messages() {
        println!("{}", render(app, message));
    }
}

fn print_event(app: &UniMesh, event: &HubEvent) {
    match event {
        HubEvent::MessageAppended { message, .. } => {
            if &message.sender_id != app.user_id() {
                println!();
                println!("{}", render(app, message));
            }
        }
        HubEvent::SnapshotUpdated { conversation_id } => {
            if let Some(conversation) = app.hub().conversation(conversation_id) {
                println!();
                println!(
                    "{}",
                    format_control(&conversation.display_name, "has a new message")
                );
            }
        }
        HubEvent::SubscriptionClosed { conversation_id, .. } => {
            println!();
            println!("Live updates stopped for {}; /open it again to resume", conversation_id);
        }
        HubEvent::Resubscribed { .. } => log::debug!("Subscription re-opened"),
    }
}

fn render(app: &UniMesh, message: &Message) -> String {
    let conversation = app.hub().conversation(&message.conversation_id);
    let channel = conversation
        .map(|c| c.display_name.as_str())
        .unwrap_or("?");
    let sender = if &message.sender_id == app.user_id() {
        "me"
    } else {
        conversation
            .and_then(|c| c.participants.iter().find(|p| p.user_id == message.sender_id))
            .map(|p| p.display_name.as_str())
            .unwrap_or("unknown")
    };
    let text = match &message.file_url {
        Some(url) if message.is_attachment() => format!("{} {}", message.preview(80), url),
        _ => message.content.clone(),
    };
    let pin = if message.is_pinned { " [pinned]" } else { "" };
    format_message(channel, sender, &format!("{}{}", text, pin))
}
