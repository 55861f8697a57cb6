pub mod channel;
pub mod memory;
pub mod protocol;
pub mod ws;

pub use channel::{
    PresenceChannel, PresenceEndpoint, PresenceLink, PresenceSnapshot, PresenceTransport,
};
pub use memory::MemoryPresenceHub;
pub use protocol::{ChatMessage, ClientFrame, RosterEntry, ServerFrame, StatusFlags};
pub use ws::WsPresenceTransport;
