//! Command-line surface: argument parsing, control commands for a running
//! session, and the post-meeting feedback prompt.

pub mod args;
pub mod client;
pub mod feedback;

pub use args::{ChatCliArgs, Cli, CliCommand, InviteCliArgs, JoinCliArgs};
pub use client::ServiceClient;
pub use feedback::prompt_feedback;

use anyhow::Result;
use serde_json::{json, Value};

use crate::config::Config;
use crate::meeting::{build_invite_link, invite::copy_invite, InviteCopy};
use crate::text_io::TextIoService;

pub async fn handle_invite_command(args: InviteCliArgs, config: &Config) -> Result<()> {
    let link = build_invite_link(&config.invite.base_url, &args.session_id)?;
    let clipboard = TextIoService::new();
    match copy_invite(Some(&clipboard), &link).await {
        InviteCopy::Copied(link) => println!("Invite link copied to clipboard:\n{link}"),
        InviteCopy::Manual(link) => println!("Copy this invite link:\n{link}"),
    }
    Ok(())
}

pub async fn handle_status_command(client: &ServiceClient) -> Result<()> {
    let view = client.get("/status").await?;
    println!("{}", render_view(&view));
    Ok(())
}

/// `path` is one of the toggle endpoints, e.g. `/mic/toggle`.
pub async fn handle_toggle_command(client: &ServiceClient, path: &str) -> Result<()> {
    let device = client.post(path, None).await?;
    println!("{}", render_device(&device));
    Ok(())
}

pub async fn handle_chat_command(client: &ServiceClient, args: ChatCliArgs) -> Result<()> {
    let Some(text) = args.text else {
        let messages = client.get("/chat").await?;
        let messages = messages.as_array().cloned().unwrap_or_default();
        if messages.is_empty() {
            println!("No messages yet.");
        }
        for message in &messages {
            println!("{}", render_message(message));
        }
        return Ok(());
    };

    let reply = client.post("/chat", Some(&json!({ "text": text }))).await?;
    if reply.get("sent").and_then(Value::as_bool).unwrap_or(false) {
        println!("Sent.");
    } else {
        println!("Nothing to send.");
    }
    Ok(())
}

pub async fn handle_leave_command(client: &ServiceClient) -> Result<()> {
    let summary = client.post("/leave", None).await?;
    println!(
        "Left '{}' after {}",
        str_field(&summary, "title"),
        str_field(&summary, "duration")
    );
    Ok(())
}

fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or("")
}

fn flag(value: &Value, key: &str) -> bool {
    value.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn render_device(device: &Value) -> String {
    let mic = if flag(device, "isMuted") { "muted" } else { "on" };
    let camera = if flag(device, "isCameraOff") { "off" } else { "on" };
    let screen = if flag(device, "isScreenSharing") {
        "sharing"
    } else {
        "not sharing"
    };
    format!("Microphone: {mic} | Camera: {camera} | Screen: {screen}")
}

fn render_message(message: &Value) -> String {
    let pending = if message.get("sequence").map_or(true, Value::is_null) {
        " (sending)"
    } else {
        ""
    };
    format!(
        "[{}] {}{}",
        str_field(message, "displayName"),
        str_field(message, "text"),
        pending
    )
}

fn render_view(view: &Value) -> String {
    let mut lines = vec![
        format!(
            "{} ({}) - {} {}",
            str_field(view, "title"),
            str_field(view, "session_id"),
            str_field(view, "phase"),
            str_field(view, "duration")
        ),
        format!(
            "Media: {} | Chat: {}",
            view.pointer("/media_status/status")
                .and_then(Value::as_str)
                .unwrap_or("unknown"),
            if flag(view, "presence_connected") {
                "connected"
            } else {
                "unavailable"
            }
        ),
        render_device(view.get("device").unwrap_or(&Value::Null)),
        format!(
            "Participants ({}):",
            view.get("participant_count")
                .and_then(Value::as_u64)
                .unwrap_or(0)
        ),
    ];

    for participant in view
        .get("participants")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let mut tags = Vec::new();
        if flag(participant, "is_local") {
            tags.push("you");
        }
        if flag(participant, "is_host") {
            tags.push("host");
        }
        if flag(participant, "is_muted") {
            tags.push("muted");
        }
        if flag(participant, "is_screen_sharing") {
            tags.push("sharing");
        }
        if !flag(participant, "in_media") {
            tags.push("chat only");
        }
        let suffix = if tags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", tags.join(", "))
        };
        lines.push(format!(
            "  - {}{}",
            str_field(participant, "display_name"),
            suffix
        ));
    }

    for notice in view
        .get("notices")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
    {
        lines.push(format!("! {notice}"));
    }
    lines.join("\n")
}
