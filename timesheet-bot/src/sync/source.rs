//! What a live post renders from.

use crate::emitter::Subscription;
use crate::events::Content;
use crate::gateway::Destination;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Called whenever something a live post depends on changes.
pub type ChangeListener = Arc<dyn Fn() + Send + Sync>;

/// Which entries of a source make it into the post.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderFilter {
    /// Everything.
    All,
    /// Entries starting today or later.
    #[default]
    Upcoming,
}

/// Observable data a live post is rendered from.
pub trait ContentSource: Send + Sync {
    /// Stable id used to resolve the source again after a restart.
    fn source_id(&self) -> String;

    /// Render for `target`. Empty content means there is nothing to show.
    fn render(&self, target: &Destination, filter: RenderFilter) -> Content;

    /// Subscribe `on_change` to the source and to whatever else affects
    /// rendering into `target`, such as that chat's settings.
    fn watch(&self, target: &Destination, on_change: ChangeListener) -> Vec<Subscription>;
}

/// Looks sources up by id.
pub trait SourceResolver: Send + Sync {
    /// The source, or `None` if it no longer exists.
    fn resolve(&self, source_id: &str) -> Option<Arc<dyn ContentSource>>;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::emitter::Emitter;
    use std::collections::HashMap;
    use std::sync::{Mutex, RwLock};

    /// A source holding one line of text.
    pub(crate) struct TextSource {
        pub id: String,
        pub text: RwLock<String>,
        pub changes: Emitter<()>,
    }

    impl TextSource {
        pub(crate) fn new(id: &str, text: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                text: RwLock::new(text.to_string()),
                changes: Emitter::new(),
            })
        }

        pub(crate) fn set(&self, text: &str) {
            *self.text.write().unwrap() = text.to_string();
            self.changes.publish(None, &());
        }
    }

    impl ContentSource for TextSource {
        fn source_id(&self) -> String {
            self.id.clone()
        }

        fn render(&self, _target: &Destination, _filter: RenderFilter) -> Content {
            Content::plain(self.text.read().unwrap().clone())
        }

        fn watch(&self, _target: &Destination, on_change: ChangeListener) -> Vec<Subscription> {
            vec![self.changes.subscribe(None, move |()| on_change())]
        }
    }

    /// Resolver over a fixed set of sources.
    #[derive(Default)]
    pub(crate) struct Sources {
        pub map: Mutex<HashMap<String, Arc<TextSource>>>,
    }

    impl Sources {
        pub(crate) fn with(source: &Arc<TextSource>) -> Arc<Self> {
            let sources = Self::default();
            sources
                .map
                .lock()
                .unwrap()
                .insert(source.id.clone(), Arc::clone(source));
            Arc::new(sources)
        }

        pub(crate) fn forget(&self, id: &str) {
            self.map.lock().unwrap().remove(id);
        }
    }

    impl SourceResolver for Sources {
        fn resolve(&self, source_id: &str) -> Option<Arc<dyn ContentSource>> {
            self.map
                .lock()
                .unwrap()
                .get(source_id)
                .map(|s| Arc::clone(s) as Arc<dyn ContentSource>)
        }
    }

    #[test]
    fn test_default_filter_is_upcoming() {
        assert_eq!(RenderFilter::default(), RenderFilter::Upcoming);
        assert_eq!(
            serde_json::to_string(&RenderFilter::All).unwrap(),
            "\"all\""
        );
    }
}
