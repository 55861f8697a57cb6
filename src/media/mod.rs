pub mod aggregation;
pub mod loopback;
pub mod reconnect;
pub mod relay;
pub mod session;
pub mod token;
pub mod track;

pub use aggregation::{RemoteMedia, RemoteMediaMap};
pub use loopback::{LoopbackRelay, LoopbackTokenIssuer, SyntheticDevices};
pub use reconnect::ReconnectPolicy;
pub use relay::{DeviceCapture, MediaRelay, RelayRoom, RoomEvent, TokenIssuer};
pub use session::{ConnectionStatus, LocalMediaState, MediaSessionManager, MediaSnapshot};
pub use token::HttpTokenIssuer;
pub use track::{LocalTrack, TrackKind, TrackSource};
