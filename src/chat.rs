//! Chat conversations over streaming responses

mod error;
mod session;

pub use error::ChatError;
pub use session::ConversationSession;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A server-side conversation. The id never changes once assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(deserialize_with = "crate::wire::string_or_number")]
    pub id: String,
    #[serde(rename = "createdAt", alias = "created_at", default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
        }
    }
}

/// Body of `POST /chat/conversations`, either wrapped or bare.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum CreateConversationResponse {
    Wrapped { conversation: Conversation },
    Bare(Conversation),
}

impl From<CreateConversationResponse> for Conversation {
    fn from(response: CreateConversationResponse) -> Self {
        match response {
            CreateConversationResponse::Wrapped { conversation }
            | CreateConversationResponse::Bare(conversation) => conversation,
        }
    }
}
