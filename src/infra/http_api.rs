//! REST client for the chat and notification endpoints.
//!
//! Every response is wrapped as `{success, data, error}`; non-2xx answers
//! carry `{error}` only.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};

use crate::{
    domain::{
        conversation::{Conversation, NewConversation},
        message::{Message, MessageDraft},
        notification::Notification,
        pagination::{MessagePage, PageRequest},
        timestamp::deserialize_utc_opt,
        ConversationId, MessageId, UserId,
    },
    usecases::contracts::{ApiError, ChatApi, NotificationApi},
};

#[derive(Debug, Deserialize)]
struct ResponseEnvelope<T> {
    #[serde(default)]
    success: Option<bool>,
    data: Option<T>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeletedAck {
    #[serde(default, deserialize_with = "deserialize_utc_opt")]
    deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct OnlineUser {
    id: UserId,
}

#[derive(Debug, Clone)]
pub struct HttpApi {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpApi {
    pub fn new(client: Client, base_url: impl Into<String>, auth_token: Option<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self {
            client,
            base_url,
            auth_token,
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let request = self
            .client
            .request(method, format!("{}{path}", self.base_url));
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn call<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<Option<T>, ApiError> {
        let response = request
            .send()
            .await
            .map_err(|error| ApiError::Unavailable(error.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| ApiError::Unavailable(error.to_string()))?;

        decode_body(status, &body)
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        self.call(request)
            .await?
            .ok_or_else(|| ApiError::InvalidData("response carried no data".to_owned()))
    }

    async fn submit(&self, request: RequestBuilder) -> Result<(), ApiError> {
        self.call::<Value>(request).await.map(|_| ())
    }
}

fn decode_body<T: DeserializeOwned>(status: StatusCode, body: &str) -> Result<Option<T>, ApiError> {
    if !status.is_success() {
        let message = serde_json::from_str::<ResponseEnvelope<Value>>(body)
            .ok()
            .and_then(|envelope| envelope.error);
        return Err(status_error(status, message));
    }

    if body.trim().is_empty() {
        return Ok(None);
    }

    let envelope: ResponseEnvelope<T> =
        serde_json::from_str(body).map_err(|error| ApiError::InvalidData(error.to_string()))?;
    if envelope.success == Some(false) {
        return Err(ApiError::Rejected(
            envelope.error.unwrap_or_else(|| "request failed".to_owned()),
        ));
    }
    Ok(envelope.data)
}

fn status_error(status: StatusCode, message: Option<String>) -> ApiError {
    let message = message.unwrap_or_else(|| status.to_string());
    match status {
        StatusCode::UNAUTHORIZED => ApiError::Unauthorized,
        StatusCode::NOT_FOUND => ApiError::NotFound,
        status if status.is_client_error() => ApiError::Rejected(message),
        _ => ApiError::Unavailable(message),
    }
}

#[async_trait]
impl ChatApi for HttpApi {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        self.fetch(self.request(Method::GET, "/api/chat/conversations"))
            .await
    }

    async fn get_conversation(&self, id: ConversationId) -> Result<Conversation, ApiError> {
        self.fetch(self.request(Method::GET, &format!("/api/chat/conversations/{id}")))
            .await
    }

    async fn create_conversation(
        &self,
        request: &NewConversation,
    ) -> Result<Conversation, ApiError> {
        self.fetch(
            self.request(Method::POST, "/api/chat/conversations")
                .json(request),
        )
        .await
    }

    async fn list_messages(
        &self,
        conversation_id: ConversationId,
        page: PageRequest,
    ) -> Result<MessagePage, ApiError> {
        let mut query = vec![
            ("page", "1".to_owned()),
            ("per_page", page.per_page.to_string()),
        ];
        if let Some(before) = page.before {
            query.push(("before", before.to_string()));
        }

        self.fetch(
            self.request(
                Method::GET,
                &format!("/api/chat/conversations/{conversation_id}/messages"),
            )
            .query(&query),
        )
        .await
    }

    async fn send_message(
        &self,
        conversation_id: ConversationId,
        draft: &MessageDraft,
    ) -> Result<Message, ApiError> {
        self.fetch(
            self.request(
                Method::POST,
                &format!("/api/chat/conversations/{conversation_id}/messages"),
            )
            .json(draft),
        )
        .await
    }

    async fn edit_message(&self, message_id: MessageId, content: &str) -> Result<Message, ApiError> {
        self.fetch(
            self.request(Method::PUT, &format!("/api/chat/messages/{message_id}"))
                .json(&json!({ "content": content })),
        )
        .await
    }

    async fn delete_message(&self, message_id: MessageId) -> Result<DateTime<Utc>, ApiError> {
        let ack: Option<DeletedAck> = self
            .call(self.request(Method::DELETE, &format!("/api/chat/messages/{message_id}")))
            .await?;
        Ok(ack
            .and_then(|ack| ack.deleted_at)
            .unwrap_or_else(Utc::now))
    }

    async fn mark_message_read(&self, message_id: MessageId) -> Result<(), ApiError> {
        self.submit(self.request(
            Method::POST,
            &format!("/api/chat/messages/{message_id}/read"),
        ))
        .await
    }

    async fn mark_conversation_read(
        &self,
        conversation_id: ConversationId,
    ) -> Result<(), ApiError> {
        self.submit(self.request(
            Method::POST,
            &format!("/api/chat/conversations/{conversation_id}/read"),
        ))
        .await
    }

    async fn send_typing(
        &self,
        conversation_id: ConversationId,
        is_typing: bool,
    ) -> Result<(), ApiError> {
        self.submit(
            self.request(
                Method::POST,
                &format!("/api/chat/conversations/{conversation_id}/typing"),
            )
            .json(&json!({ "isTyping": is_typing })),
        )
        .await
    }

    async fn mute_conversation(
        &self,
        conversation_id: ConversationId,
        muted: bool,
    ) -> Result<(), ApiError> {
        self.submit(
            self.request(
                Method::POST,
                &format!("/api/chat/conversations/{conversation_id}/mute"),
            )
            .json(&json!({ "muted": muted })),
        )
        .await
    }

    async fn delete_conversation(&self, conversation_id: ConversationId) -> Result<(), ApiError> {
        self.submit(self.request(
            Method::DELETE,
            &format!("/api/chat/conversations/{conversation_id}"),
        ))
        .await
    }

    async fn online_users(&self) -> Result<Vec<UserId>, ApiError> {
        let users: Vec<OnlineUser> = self
            .fetch(self.request(Method::GET, "/api/chat/users/online"))
            .await?;
        Ok(users.into_iter().map(|user| user.id).collect())
    }
}

#[async_trait]
impl NotificationApi for HttpApi {
    async fn list_notifications(&self) -> Result<Vec<Notification>, ApiError> {
        Ok(self
            .call(self.request(Method::GET, "/api/notifications"))
            .await?
            .unwrap_or_default())
    }

    async fn mark_notification_read(&self, id: &str) -> Result<(), ApiError> {
        self.submit(self.request(Method::POST, &format!("/api/notifications/{id}/read")))
            .await
    }

    async fn mark_all_notifications_read(&self) -> Result<(), ApiError> {
        self.submit(self.request(Method::POST, "/api/notifications/read-all"))
            .await
    }

    async fn delete_notification(&self, id: &str) -> Result<(), ApiError> {
        self.submit(self.request(Method::DELETE, &format!("/api/notifications/{id}")))
            .await
    }

    async fn clear_notifications(&self) -> Result<(), ApiError> {
        self.submit(self.request(Method::DELETE, "/api/notifications"))
            .await
    }
}
