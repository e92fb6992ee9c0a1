pub mod conversation;
pub mod reconcile;
pub mod session;

pub use conversation::Conversation;
pub use reconcile::reconcile;
pub use session::ChatSession;
