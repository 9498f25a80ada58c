pub mod call;
pub mod id;
pub mod message;
pub mod room;
pub mod user;

pub use call::{Call, CallParticipant, CallStatus, CallType, CallWithParticipants, RecordingRow};
pub use id::{CallId, RoomId, SessionId, UserId};
pub use message::{
    aggregate_status, DeliveryStatus, Message, MessageKind, MessageReceipt, MessageView,
};
pub use room::{
    private_pair_key, ParticipantRole, Room, RoomKind, RoomParticipant, RoomWithParticipants,
};
pub use user::{PublicUser, User, UserRole, UserStatus};
