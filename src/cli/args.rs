use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "classmeet")]
#[command(about = "Classroom meeting session coordinator", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Join a meeting and keep the session running until you leave
    Join(JoinCliArgs),
    /// Print a guest invite link for a meeting and copy it to the clipboard
    Invite(InviteCliArgs),
    /// Show the running meeting: participants, devices and notices
    Status,
    /// Mute or unmute the microphone
    Mic,
    /// Turn the camera on or off
    Camera,
    /// Start or stop sharing the screen
    Screen,
    /// Send a chat message, or list the conversation when no text is given
    Chat(ChatCliArgs),
    /// Leave the running meeting
    Leave,
    /// Print version information
    Version,
}

#[derive(ClapArgs, Debug)]
pub struct JoinCliArgs {
    /// Meeting session id
    pub session_id: String,
    /// Display name shown to other participants
    #[arg(short, long)]
    pub name: String,
    /// Meeting title (defaults to the session id)
    #[arg(short, long)]
    pub title: Option<String>,
    /// Stable participant id (derived from the name when omitted)
    #[arg(long)]
    pub participant_id: Option<String>,
    /// Join as the meeting host
    #[arg(long)]
    pub host: bool,
    /// Join through a guest invite
    #[arg(long, conflicts_with = "host")]
    pub guest: bool,
    /// Skip the feedback prompt after leaving
    #[arg(long)]
    pub no_feedback: bool,
}

#[derive(ClapArgs, Debug)]
pub struct InviteCliArgs {
    /// Meeting session id
    pub session_id: String,
}

#[derive(ClapArgs, Debug)]
pub struct ChatCliArgs {
    /// Message text
    pub text: Option<String>,
}
