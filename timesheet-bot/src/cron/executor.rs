//! Runs periodic actions.

use super::action::{ActionKind, PeriodicAction};
use crate::error::SyncResult;
use crate::gateway::{Destination, MessageId};
use crate::sync::{LiveSync, RenderFilter, TranslationRecord, TranslationRegistry};
use async_trait::async_trait;
use tracing::{info, warn};

/// Reason given to the live post an auto-repost replaces.
pub const REPLACED_BY_REPOST: &str = "replaced by auto-repost";

/// Carries out one run of an action.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Run `action` and return its updated record.
    async fn execute(&self, action: PeriodicAction) -> SyncResult<PeriodicAction>;
}

/// Executor backed by the live post registry.
#[derive(Debug, Clone)]
pub struct RepostExecutor {
    translations: TranslationRegistry,
}

impl RepostExecutor {
    /// Executor creating live posts in `translations`.
    pub const fn new(translations: TranslationRegistry) -> Self {
        Self { translations }
    }

    /// Move the chat's pin from the replaced post to the new one.
    ///
    /// Missing pin rights must not fail the repost, so errors are only logged.
    async fn move_pin(
        &self,
        action_id: u64,
        replaced: Option<(Destination, MessageId)>,
        post: &LiveSync,
    ) {
        let gateway = self.translations.gateway();
        if let Some((chat, message_id)) = replaced
            && let Err(e) = gateway.unpin(&chat, message_id).await
        {
            warn!(action_id, %chat, message_id, error = %e, "could not unpin replaced post");
        }
        if let Some(message_id) = post.message_id()
            && let Err(e) = gateway.pin(post.target(), message_id).await
        {
            warn!(action_id, chat = %post.target(), message_id, error = %e, "could not pin repost");
        }
    }
}

#[async_trait]
impl ActionExecutor for RepostExecutor {
    async fn execute(&self, mut action: PeriodicAction) -> SyncResult<PeriodicAction> {
        match &mut action.kind {
            ActionKind::AutoRepost {
                chat,
                source_id,
                translation_id,
            } => {
                let replaced = translation_id.take().and_then(|previous| {
                    let post = self
                        .translations
                        .get(previous)
                        .and_then(|old| old.message_id().map(|id| (old.target().clone(), id)));
                    self.translations.remove(previous, REPLACED_BY_REPOST);
                    post
                });
                let chat = chat.clone();
                let source = source_id.clone();
                match self
                    .translations
                    .create(|id| {
                        TranslationRecord::new(id, chat, source).with_filter(RenderFilter::Upcoming)
                    })
                    .await
                {
                    Ok(sync) => {
                        *translation_id = Some(sync.id());
                        self.move_pin(action.id, replaced, &sync).await;
                        info!(action_id = action.id, translation_id = sync.id(), "auto-repost done");
                    }
                    Err(e) => {
                        warn!(action_id = action.id, error = %e, "auto-repost failed");
                        return Err(e);
                    }
                }
            }
            ActionKind::RefreshTranslations => {
                let refreshed = self.translations.refresh_all().await;
                info!(action_id = action.id, refreshed, "live posts refreshed");
            }
        }
        Ok(action)
    }
}
