use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use tracing::debug;

const DEFAULTS: &[(&str, &str)] = &[
    ("invalidImageError", "Invalid image provided."),
    ("back", "Back"),
    ("save", "Save"),
    ("changesLoseWarningHint", "If you press \"reset\" button your changes will be lost."),
    ("adjustTab", "Adjust"),
    ("finetuneTab", "Finetune"),
    ("filtersTab", "Filters"),
    ("watermarkTab", "Watermark"),
    ("annotateTab", "Annotate"),
    ("resizeTab", "Resize"),
];

/// Fetches translation strings for a language from some remote catalogue.
pub trait TranslationBackend: Send + Sync {
    fn fetch(&self, language: &str) -> BoxFuture<'static, anyhow::Result<HashMap<String, String>>>;
}

/// Key lookup with built-in English defaults, config overrides and fetched
/// strings layered on top.
#[derive(Clone, Default)]
pub struct Translator {
    strings: Arc<RwLock<HashMap<String, String>>>,
}

impl Translator {
    pub fn new(overrides: &HashMap<String, String>) -> Self {
        let translator = Self::default();
        {
            let mut strings = translator.strings.write();
            strings.extend(DEFAULTS.iter().map(|(k, v)| (k.to_string(), v.to_string())));
            strings.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        translator
    }

    /// Returns the key itself when no string is known for it.
    pub fn t(&self, key: &str) -> String {
        self.strings
            .read()
            .get(key)
            .cloned()
            .unwrap_or_else(|| key.to_string())
    }

    pub fn extend(&self, fetched: HashMap<String, String>) {
        debug!(count = fetched.len(), "merging fetched translations");
        self.strings.write().extend(fetched);
    }
}
