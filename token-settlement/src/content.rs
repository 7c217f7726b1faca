//! Content and social graph boundary
//!
//! Tips target a piece of content; the directory resolves it to the creator
//! who receives the tokens. Follower counts feed the payout rate.

use async_trait::async_trait;
use std::collections::HashMap;
use token_ledger::{ContentId, UserId};
use tokio::sync::RwLock;

/// Tip target as seen by the settlement engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentTarget {
    /// Content
    pub content_id: ContentId,
    /// Creator receiving tips; `None` when the content is orphaned
    pub creator_id: Option<UserId>,
    /// Creator display name
    pub creator_name: String,
    /// Content is published
    pub published: bool,
    /// Content is private
    pub private: bool,
}

impl ContentTarget {
    /// Creator if the content can receive tips
    pub fn tippable_creator(&self) -> Option<UserId> {
        if self.published && !self.private {
            self.creator_id
        } else {
            None
        }
    }
}

/// Content lookup
#[async_trait]
pub trait ContentDirectory: Send + Sync {
    /// Resolve content; `None` if it does not exist
    async fn resolve(&self, content_id: ContentId) -> Option<ContentTarget>;

    /// Number of followers of a creator
    async fn follower_count(&self, user_id: UserId) -> u64;
}

/// In-memory directory
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    content: RwLock<HashMap<ContentId, ContentTarget>>,
    followers: RwLock<HashMap<UserId, u64>>,
}

impl InMemoryDirectory {
    /// Empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Register published, public content
    pub async fn publish(&self, content_id: ContentId, creator_id: UserId, creator_name: &str) {
        self.insert(ContentTarget {
            content_id,
            creator_id: Some(creator_id),
            creator_name: creator_name.to_string(),
            published: true,
            private: false,
        })
        .await;
    }

    /// Register or replace content
    pub async fn insert(&self, target: ContentTarget) {
        self.content.write().await.insert(target.content_id, target);
    }

    /// Set a creator's follower count
    pub async fn set_followers(&self, user_id: UserId, count: u64) {
        self.followers.write().await.insert(user_id, count);
    }
}

#[async_trait]
impl ContentDirectory for InMemoryDirectory {
    async fn resolve(&self, content_id: ContentId) -> Option<ContentTarget> {
        self.content.read().await.get(&content_id).cloned()
    }

    async fn follower_count(&self, user_id: UserId) -> u64 {
        self.followers.read().await.get(&user_id).copied().unwrap_or(0)
    }
}
