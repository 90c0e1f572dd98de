use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    content::{GeneratedContent, SeedInput},
    history::KvSubstrate,
};

pub const DEFAULT_SAVED_POSTS_KEY: &str = "saved_posts";
pub const DEFAULT_DRAFT_KEY: &str = "agri_content_form_autosave";

/// A generated post the user bookmarked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedPost {
    pub id: String,
    pub timestamp: i64,
    pub content: GeneratedContent,
}

/// Bookmarked posts, newest first. Unlike the history this list is not
/// capped and a rejected write is reported to the caller.
pub struct SavedPostStore {
    key: String,
    substrate: Arc<dyn KvSubstrate>,
    posts: Vec<SavedPost>,
    last_issued_id: i64,
}

impl SavedPostStore {
    pub fn open(key: impl Into<String>, substrate: Arc<dyn KvSubstrate>) -> Self {
        let key = key.into();
        let posts: Vec<SavedPost> = match substrate.get(&key) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|err| {
                warn!(key = %key, error = %err, "discarding unparseable saved posts");
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(err) => {
                warn!(key = %key, error = %err, "failed to read saved posts");
                Vec::new()
            }
        };
        let last_issued_id = posts
            .iter()
            .filter_map(|post| post.id.parse::<i64>().ok())
            .max()
            .unwrap_or_default();

        Self {
            key,
            substrate,
            posts,
            last_issued_id,
        }
    }

    pub fn list(&self) -> &[SavedPost] {
        &self.posts
    }

    /// Bookmark `content`. On a failed write the in-memory list is left as it
    /// was and the error is returned.
    pub fn save(&mut self, content: GeneratedContent) -> anyhow::Result<SavedPost> {
        let now = Utc::now().timestamp_millis();
        let id = match self.last_issued_id.checked_add(1) {
            Some(next) => now.max(next),
            None => now,
        };
        let post = SavedPost {
            id: id.to_string(),
            timestamp: now,
            content,
        };

        let mut updated = Vec::with_capacity(self.posts.len() + 1);
        updated.push(post.clone());
        updated.extend(self.posts.iter().cloned());
        self.write(&updated)?;

        self.posts = updated;
        self.last_issued_id = id;
        Ok(post)
    }

    /// Remove a bookmark. Returns whether a post with `id` existed.
    pub fn remove(&mut self, id: &str) -> anyhow::Result<bool> {
        let before = self.posts.len();
        let updated: Vec<SavedPost> = self
            .posts
            .iter()
            .filter(|post| post.id != id)
            .cloned()
            .collect();
        if updated.len() == before {
            return Ok(false);
        }

        self.write(&updated)?;
        self.posts = updated;
        Ok(true)
    }

    fn write(&self, posts: &[SavedPost]) -> anyhow::Result<()> {
        let serialized = serde_json::to_string(posts).context("serializing saved posts")?;
        self.substrate
            .set(&self.key, &serialized)
            .with_context(|| format!("writing saved posts under {}", self.key))
    }
}

/// Read the autosaved form draft, ignoring corrupt values.
pub fn load_draft(substrate: &dyn KvSubstrate, key: &str) -> Option<SeedInput> {
    let raw = match substrate.get(key) {
        Ok(raw) => raw?,
        Err(err) => {
            warn!(key = %key, error = %err, "failed to read form draft");
            return None;
        }
    };

    match serde_json::from_str(&raw) {
        Ok(draft) => Some(draft),
        Err(err) => {
            warn!(key = %key, error = %err, "discarding unparseable form draft");
            None
        }
    }
}

pub fn save_draft(
    substrate: &dyn KvSubstrate,
    key: &str,
    draft: &SeedInput,
) -> anyhow::Result<()> {
    let serialized = serde_json::to_string(draft).context("serializing form draft")?;
    substrate
        .set(key, &serialized)
        .with_context(|| format!("writing form draft under {key}"))
}
