use anyhow::Result;
use classmeet::{
    app,
    cli::{
        handle_chat_command, handle_invite_command, handle_leave_command, handle_status_command,
        handle_toggle_command, Cli, CliCommand, ServiceClient,
    },
    config::Config,
    meeting::MeetingIdentity,
};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = if cli.verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    if let CliCommand::Version = cli.command {
        println!("classmeet {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = Config::load()?;
    let client = ServiceClient::for_port(config.api.port);

    match cli.command {
        CliCommand::Join(args) => {
            let mut identity = MeetingIdentity::new(
                &args.session_id,
                args.title.as_deref().unwrap_or(""),
                &args.name,
            )?
            .host(args.host)
            .guest(args.guest);
            if let Some(participant_id) = &args.participant_id {
                identity = identity.with_participant_id(participant_id)?;
            }
            app::run_session(config, identity, !args.no_feedback).await
        }
        CliCommand::Invite(args) => handle_invite_command(args, &config).await,
        CliCommand::Status => handle_status_command(&client).await,
        CliCommand::Mic => handle_toggle_command(&client, "/mic/toggle").await,
        CliCommand::Camera => handle_toggle_command(&client, "/camera/toggle").await,
        CliCommand::Screen => handle_toggle_command(&client, "/screen/toggle").await,
        CliCommand::Chat(args) => handle_chat_command(&client, args).await,
        CliCommand::Leave => handle_leave_command(&client).await,
        CliCommand::Version => Ok(()),
    }
}
