//! Telegram Bot API implementation of the access gateway and notifier
//!
//! All calls are best-effort with bounded timeouts. A failed API call is
//! logged at warn level and reported through `BestEffort`; nothing here
//! ever propagates an error into the caller's business transaction.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::access::{AccessGateway, AccessLinks, BestEffort, Notifier};

const API_TIMEOUT: Duration = Duration::from_secs(15);

/// Thin client over the Telegram Bot API for the two club chats
#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
    primary_channel_id: i64,
    secondary_discussion_id: i64,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InviteLink {
    invite_link: String,
}

impl TelegramClient {
    pub fn new(bot_token: &str, primary_channel_id: i64, secondary_discussion_id: i64) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(API_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: format!("https://api.telegram.org/bot{bot_token}"),
            primary_channel_id,
            secondary_discussion_id,
        }
    }

    /// For tests: point the client at a local mock server.
    pub fn with_base_url(base_url: String, primary: i64, secondary: i64) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            primary_channel_id: primary,
            secondary_discussion_id: secondary,
        }
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<T, String> {
        let response = self
            .http
            .post(format!("{}/{method}", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let parsed: ApiResponse<T> = response.json().await.map_err(|e| e.to_string())?;
        if !parsed.ok {
            return Err(parsed
                .description
                .unwrap_or_else(|| "unknown Telegram API error".to_string()));
        }
        parsed.result.ok_or_else(|| "missing result".to_string())
    }

    async fn safe_unban(&self, chat_id: i64, tg_id: i64) {
        let body = json!({ "chat_id": chat_id, "user_id": tg_id, "only_if_banned": true });
        if let Err(error) = self.call::<bool>("unbanChatMember", body).await {
            tracing::warn!(chat_id, tg_id, error = %error, "Failed to unban member");
        }
    }

    async fn safe_ban(&self, chat_id: i64, tg_id: i64) -> bool {
        let body = json!({ "chat_id": chat_id, "user_id": tg_id, "revoke_messages": true });
        match self.call::<bool>("banChatMember", body).await {
            Ok(_) => true,
            Err(error) => {
                tracing::warn!(chat_id, tg_id, error = %error, "Failed to ban member");
                false
            }
        }
    }

    async fn safe_invite_link(&self, chat_id: i64, tg_id: i64) -> Option<String> {
        let body = json!({
            "chat_id": chat_id,
            "creates_join_request": true,
            "name": format!("access-{tg_id}"),
        });
        match self.call::<InviteLink>("createChatInviteLink", body).await {
            Ok(link) => Some(link.invite_link),
            Err(error) => {
                tracing::warn!(chat_id, tg_id, error = %error, "Failed to create invite link");
                None
            }
        }
    }
}

#[async_trait]
impl AccessGateway for TelegramClient {
    async fn grant(&self, tg_id: i64) -> AccessLinks {
        self.safe_unban(self.primary_channel_id, tg_id).await;
        self.safe_unban(self.secondary_discussion_id, tg_id).await;
        AccessLinks {
            channel_invite_link: self.safe_invite_link(self.primary_channel_id, tg_id).await,
            group_invite_link: self
                .safe_invite_link(self.secondary_discussion_id, tg_id)
                .await,
        }
    }

    async fn revoke(&self, tg_id: i64) -> BestEffort<()> {
        let channel_ok = self.safe_ban(self.primary_channel_id, tg_id).await;
        let group_ok = self.safe_ban(self.secondary_discussion_id, tg_id).await;
        if channel_ok && group_ok {
            BestEffort::Ok(())
        } else {
            BestEffort::Failed
        }
    }
}

#[async_trait]
impl Notifier for TelegramClient {
    async fn send_text(&self, tg_id: i64, text: &str) -> BestEffort<()> {
        let body = json!({ "chat_id": tg_id, "text": text });
        match self.call::<serde_json::Value>("sendMessage", body).await {
            Ok(_) => BestEffort::Ok(()),
            Err(error) => {
                tracing::warn!(tg_id, error = %error, "Failed to send message");
                BestEffort::Failed
            }
        }
    }
}
