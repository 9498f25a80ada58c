pub mod call;
pub mod message;
pub mod receipt;
pub mod room;
pub mod user;

pub use call::CallRepository;
pub use message::MessageRepository;
pub use receipt::ReceiptRepository;
pub use room::RoomRepository;
pub use user::UserRepository;
