use chrono::{DateTime, Utc};
use parley_core::{ChatId, MessageId, UserId};
use parley_infra::store::{Chat, Message};
use parley_infra::usecases::{Page, PageRequest, UseCaseError, Verdict};
use serde::{Deserialize, Serialize};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSendMessageRequest {
    pub message_body: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerSendMessageRequest {
    pub chat_id: ChatId,
    pub message_body: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseChatRequest {
    pub chat_id: ChatId,
}

/// `pageSize` for the first page, `cursor` for the following ones.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetHistoryRequest {
    pub page_size: Option<usize>,
    pub cursor: Option<String>,
}

impl GetHistoryRequest {
    pub fn page(&self) -> Result<PageRequest, UseCaseError> {
        PageRequest::from_parts(self.page_size, self.cursor.as_deref())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetChatHistoryRequest {
    pub chat_id: ChatId,
    #[serde(flatten)]
    pub paging: GetHistoryRequest,
}

#[derive(Debug, Deserialize)]
pub struct SetLogLevelRequest {
    pub level: String,
}

#[derive(Debug, Deserialize)]
pub struct FailedJobsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerdictRequest {
    pub message_id: MessageId,
    pub verdict: Verdict,
}

// -------------------------
// Response DTOs
// -------------------------

/// Success envelope: `{"data": ...}`.
#[derive(Debug, Serialize)]
pub struct DataResponse<T> {
    pub data: T,
}

impl<T> DataResponse<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageHeader {
    pub id: MessageId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

impl From<&Message> for MessageHeader {
    fn from(m: &Message) -> Self {
        Self {
            id: m.id,
            author_id: m.author_id,
            created_at: m.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientHistoryMessage {
    pub id: MessageId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_id: Option<UserId>,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub is_received: bool,
    pub is_blocked: bool,
    pub is_service: bool,
}

impl From<Message> for ClientHistoryMessage {
    fn from(m: Message) -> Self {
        Self {
            id: m.id,
            author_id: m.author_id,
            is_received: m.is_visible_for_manager && !m.is_blocked,
            is_blocked: m.is_blocked,
            is_service: m.is_service,
            body: m.body,
            created_at: m.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerHistoryMessage {
    pub id: MessageId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_id: Option<UserId>,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl From<Message> for ManagerHistoryMessage {
    fn from(m: Message) -> Self {
        Self {
            id: m.id,
            author_id: m.author_id,
            body: m.body,
            created_at: m.created_at,
        }
    }
}

/// `next` is empty on the last page.
#[derive(Debug, Serialize)]
pub struct MessagesPage<T> {
    pub messages: Vec<T>,
    pub next: String,
}

impl<T: From<Message>> From<Page> for MessagesPage<T> {
    fn from(page: Page) -> Self {
        Self {
            messages: page.messages.into_iter().map(T::from).collect(),
            next: page.next.map(|c| c.encode()).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub chat_id: ChatId,
    pub client_id: UserId,
}

#[derive(Debug, Serialize)]
pub struct ChatList {
    pub chats: Vec<ChatSummary>,
}

impl From<Vec<Chat>> for ChatList {
    fn from(chats: Vec<Chat>) -> Self {
        Self {
            chats: chats
                .into_iter()
                .map(|c| ChatSummary {
                    chat_id: c.id,
                    client_id: c.client_id,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FreeHandsAvailability {
    pub available: bool,
}

#[derive(Debug, Serialize)]
pub struct LogLevelResponse {
    pub level: String,
}
