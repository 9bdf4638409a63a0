/// Service layer for the UniMesh client.
/// Messaging state lives in `MessagingHub`; the other services are thin,
/// stateless wrappers over the backend.

pub mod conversation_store;
pub mod discovery;
pub mod events;
pub mod message_list;
pub mod message_sender;
pub mod messaging_hub;
pub mod notices;
pub mod organizations;
pub mod profiles;
pub mod subscriber;

pub use conversation_store::ConversationStore;
pub use discovery::DiscoveryService;
pub use events::EventService;
pub use message_list::{get_messages, InsertOutcome, MessageList};
pub use message_sender::{Attachment, MessageSender};
pub use messaging_hub::{HubEvent, MessagingHub};
pub use notices::NoticeService;
pub use organizations::OrganizationService;
pub use profiles::ProfileService;
pub use subscriber::{Delivery, DeliveryKind, MessageSubscriber, SubscriptionState};
