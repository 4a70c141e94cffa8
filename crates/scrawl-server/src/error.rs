use scrawl_core::net::messages::{CommandReplyMsg, MessageType};

/// Errors a client command can be rejected with. These are returned in the
/// command's reply envelope and never broadcast.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("only the host can do that")]
    NotAuthorised,
    #[error("not allowed in the current phase")]
    WrongPhase,
    #[error("room is full")]
    RoomFull,
    #[error("room not found")]
    RoomNotFound,
    #[error("could not allocate a unique room code")]
    CodeExhaustion,
    #[error("{0}")]
    InvalidInput(String),
    #[error("you are not a member of this room")]
    NotMember,
}

impl CommandError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Wrap this error into the reply envelope for a given command.
    pub fn reply(&self, command: MessageType) -> CommandReplyMsg {
        CommandReplyMsg {
            command,
            success: false,
            error: Some(self.to_string()),
        }
    }
}

/// Persistence failures. Transient by policy: logged, never surfaced to
/// clients; in-memory state stays authoritative.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
