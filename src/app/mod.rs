use crate::api::{ApiCommand, ApiServer};
use crate::cli::prompt_feedback;
use crate::config::Config;
use crate::error::MeetingError;
use crate::media::{
    HttpTokenIssuer, LoopbackRelay, LoopbackTokenIssuer, MediaSessionManager, SyntheticDevices,
    TokenIssuer,
};
use crate::meeting::{
    FeedbackOutcome, HttpFeedbackSink, MeetingIdentity, MeetingStatusHandle, SessionOrchestrator,
};
use crate::presence::{MemoryPresenceHub, PresenceChannel, PresenceTransport, WsPresenceTransport};
use crate::text_io::TextIoService;
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Join the meeting, serve the control API, and run until the user leaves.
pub async fn run_session(config: Config, identity: MeetingIdentity, ask_feedback: bool) -> Result<()> {
    info!("Starting classmeet session service");

    let status = MeetingStatusHandle::default();
    let mut orchestrator = build_orchestrator(&config, identity, status.clone())?;
    let title = orchestrator.identity().title.clone();

    let (tx, mut rx) = mpsc::channel::<ApiCommand>(16);
    // Commands stop only on leave or Ctrl-C, even if the API server dies.
    let _command_tx = tx.clone();
    let api_server = ApiServer::new(tx, status.clone(), &config);
    tokio::spawn(async move {
        if let Err(e) = api_server.start().await {
            error!("API server failed: {}", e);
        }
    });

    let discard = orchestrator.discard_token();
    let join_interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            discard.cancel();
        }
    });

    let spinner = join_spinner(&title)?;
    let joined = orchestrator.join().await;
    join_interrupt.abort();

    match joined {
        Ok(outcome) => {
            spinner.finish_with_message(format!(
                "Joined '{}' ({} participant(s){})",
                title,
                outcome.media.participant_count,
                if outcome.presence.is_some() {
                    ""
                } else {
                    ", chat unavailable"
                }
            ));
        }
        Err(MeetingError::Cancelled) => {
            spinner.abandon_with_message("Join cancelled");
            return Ok(());
        }
        Err(e) => {
            spinner.abandon_with_message(format!("Could not join '{title}'"));
            return Err(e).context("Failed to join meeting");
        }
    }

    match orchestrator.invite_link() {
        Ok(link) => info!("Invite guests with: {}", link),
        Err(e) => warn!("Invite link unavailable: {}", e),
    }
    info!(
        "Control this meeting with `classmeet mic|camera|screen|chat|leave` or http://127.0.0.1:{}",
        config.api.port
    );

    let interrupt = CancellationToken::new();
    let on_signal = interrupt.clone();
    let signals = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });
    serve_commands(&mut orchestrator, &mut rx, &interrupt).await;
    signals.abort();

    if ask_feedback {
        let feedback = tokio::task::spawn_blocking(move || prompt_feedback(&title))
            .await
            .context("Feedback prompt panicked")?
            .unwrap_or_else(|e| {
                warn!("Feedback prompt failed: {}", e);
                None
            });
        match orchestrator.submit_feedback(feedback).await {
            FeedbackOutcome::Submitted => println!("Thanks for the feedback!"),
            FeedbackOutcome::Failed(reason) => println!("Feedback could not be sent: {reason}"),
            FeedbackOutcome::Skipped | FeedbackOutcome::NotConfigured => {}
        }
    }

    Ok(())
}

/// Run API commands until the meeting is left. An interrupt, or the control
/// channel closing, ends the meeting even while a command is still pending.
async fn serve_commands(
    orchestrator: &mut SessionOrchestrator,
    rx: &mut mpsc::Receiver<ApiCommand>,
    interrupt: &CancellationToken,
) {
    loop {
        let command = tokio::select! {
            biased;
            _ = interrupt.cancelled() => {
                info!("Interrupt received, leaving meeting");
                break;
            }
            command = rx.recv() => match command {
                Some(command) => command,
                None => {
                    warn!("Control channel closed, leaving meeting");
                    break;
                }
            },
        };

        // The interrupted command is dropped; its caller sees the reply closed.
        let left = tokio::select! {
            biased;
            _ = interrupt.cancelled() => false,
            left = handle_command(orchestrator, command) => left,
        };
        if left {
            return;
        }
    }

    match orchestrator.leave().await {
        Ok(summary) => println!("Left '{}' after {}", summary.title, summary.duration),
        Err(e) => warn!("Leave failed: {}", e),
    }
}

/// Run one API command against the meeting. Returns true once the meeting
/// has been left.
async fn handle_command(orchestrator: &mut SessionOrchestrator, command: ApiCommand) -> bool {
    match command {
        ApiCommand::View(reply) => {
            let _ = reply.send(orchestrator.view().await);
        }
        ApiCommand::ToggleMicrophone(reply) => {
            let _ = reply.send(orchestrator.toggle_microphone().await);
        }
        ApiCommand::ToggleCamera(reply) => {
            let _ = reply.send(orchestrator.toggle_camera().await);
        }
        ApiCommand::ToggleScreenShare(reply) => {
            let _ = reply.send(orchestrator.toggle_screen_share().await);
        }
        ApiCommand::Messages(reply) => {
            let _ = reply.send(orchestrator.messages().await);
        }
        ApiCommand::SendChat { text, reply } => {
            let _ = reply.send(orchestrator.send_chat(&text).await);
        }
        ApiCommand::CopyInvite(reply) => {
            let _ = reply.send(orchestrator.copy_invite_link().await);
        }
        ApiCommand::Leave(reply) => {
            let result = orchestrator.leave().await;
            let left = result.is_ok();
            if let Ok(summary) = &result {
                println!("Left '{}' after {}", summary.title, summary.duration);
            }
            let _ = reply.send(result);
            return left;
        }
    }
    false
}

/// Wire the configured collaborators. Anything without an endpoint runs
/// in-process.
fn build_orchestrator(
    config: &Config,
    identity: MeetingIdentity,
    status: MeetingStatusHandle,
) -> Result<SessionOrchestrator> {
    let relay = LoopbackRelay::new();
    let tokens: Arc<dyn TokenIssuer> = match &config.media.token_endpoint {
        Some(endpoint) => {
            info!("Using token endpoint {}", endpoint);
            Arc::new(HttpTokenIssuer::new(endpoint, config.media.token_timeout())?)
        }
        None => {
            info!("No token endpoint configured; using loopback issuer");
            Arc::new(LoopbackTokenIssuer::new(relay.clone()))
        }
    };
    let media = MediaSessionManager::new(
        tokens,
        Arc::new(relay),
        Arc::new(SyntheticDevices::new()),
        config.reconnect.policy(),
    );

    let transport: Arc<dyn PresenceTransport> = match &config.presence.endpoint {
        Some(endpoint) => {
            info!("Using presence endpoint {}", endpoint);
            Arc::new(WsPresenceTransport::new(endpoint)?)
        }
        None => {
            info!("No presence endpoint configured; using in-process hub");
            Arc::new(MemoryPresenceHub::new())
        }
    };

    let mut orchestrator = SessionOrchestrator::new(
        identity,
        media,
        PresenceChannel::new(transport).with_connect_timeout(config.presence.connect_timeout()),
        status,
        &config.invite.base_url,
    )
    .with_clipboard(Arc::new(TextIoService::new()));

    if let Some(endpoint) = &config.feedback.endpoint {
        orchestrator = orchestrator.with_feedback(Box::new(HttpFeedbackSink::new(
            endpoint,
            config.feedback.timeout(),
        )?));
    }

    Ok(orchestrator)
}

fn join_spinner(title: &str) -> Result<ProgressBar> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    spinner.set_message(format!("Joining '{title}'..."));
    spinner.enable_steady_tick(Duration::from_millis(100));
    Ok(spinner)
}
