//! Access control gateway and notification seams
//!
//! Chat-platform side effects are best-effort: the authoritative membership
//! state commits regardless of whether the platform call succeeded, and the
//! scheduled sweeps provide eventual correction. `BestEffort` makes that
//! policy explicit in the type instead of a swallowed exception.

use async_trait::async_trait;

/// Outcome of a fire-and-forget external call. A `Failed` outcome has
/// already been logged by the implementation and must never abort the
/// surrounding business transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BestEffort<T> {
    Ok(T),
    Failed,
}

impl<T> BestEffort<T> {
    pub fn ok(self) -> Option<T> {
        match self {
            BestEffort::Ok(value) => Some(value),
            BestEffort::Failed => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, BestEffort::Failed)
    }
}

/// Single-use, join-request-gated invite links issued on grant.
/// Either link may be absent when its creation failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessLinks {
    pub channel_invite_link: Option<String>,
    pub group_invite_link: Option<String>,
}

/// Grants and revokes actual chat access. Implementations never raise:
/// every failure is logged and folded into the return value.
#[async_trait]
pub trait AccessGateway: Send + Sync {
    /// Unban the user in both chats and issue join-request invite links.
    async fn grant(&self, tg_id: i64) -> AccessLinks;

    /// Ban the user in both chats, revoking message history.
    async fn revoke(&self, tg_id: i64) -> BestEffort<()>;
}

/// Sends a text message to one user on the chat platform.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_text(&self, tg_id: i64, text: &str) -> BestEffort<()>;
}
