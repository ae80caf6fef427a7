mod account;
mod event;
mod message;
mod tenant;

pub use account::Account;
pub use account::LimitBehavior;
pub use account::TlsMode;
pub use event::EventType;
pub use event::MessageEvent;
pub use message::Attachment;
pub use message::AttachmentAuth;
pub use message::ContentType;
pub use message::FetchMode;
pub use message::Message;
pub use message::Priority;
pub use message::SubmittedMessage;
pub use tenant::ClientAuth;
pub use tenant::Tenant;
