pub mod auth;
pub mod call;
pub mod chat;
pub mod events;
pub mod fanout;
pub mod presence;
pub mod recording;
pub mod registry;
pub mod room;
pub mod sfu;
pub mod user;

pub use auth::{Claims, JwtService};
pub use call::CallService;
pub use chat::ChatService;
pub use events::{MessagePayload, OnlineUser, ServerEvent};
pub use fanout::RoomFanout;
pub use presence::PresenceService;
pub use recording::RecordingController;
pub use registry::{EventSender, SessionRegistry};
pub use room::RoomService;
pub use sfu::{SfuServer, TransportDirection};
pub use user::UserService;
