use crate::common::types::ChatMessage;

/// Commands the session sends down to the network task.
#[derive(Debug, Clone)]
pub enum NetworkCommand {
    /// Publish an already stamped message to the send destination.
    Publish(ChatMessage),
    /// Say goodbye to the broker and stop the task.
    Disconnect,
}
