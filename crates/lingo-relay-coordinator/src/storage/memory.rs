//! In-memory configuration and vocabulary storage.

use std::{collections::HashMap, sync::RwLock};

use async_trait::async_trait;
use futures::{StreamExt, future};
use lingo_relay_core::{
    Config, ConfigPatch, ConfigStore, VocabularyStore,
    message::{VocabularyInput, now_millis},
    traits::{ConfigChanges, ConfigError, StorageError, VocabularyEntry},
};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

const CHANGE_CAPACITY: usize = 64;

/// In-memory configuration store.
///
/// Useful for development and single-process deployments.
/// Data is lost on restart.
pub struct MemoryConfigStore {
    saved: RwLock<Option<Config>>,
    sender: broadcast::Sender<Config>,
}

impl MemoryConfigStore {
    /// Create a store with nothing saved yet.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            saved: RwLock::new(None),
            sender,
        }
    }

    /// Create a store that already holds `config`.
    #[must_use]
    pub fn with_config(config: Config) -> Self {
        let store = Self::new();
        if let Ok(mut saved) = store.saved.write() {
            *saved = Some(config);
        }
        store
    }

    /// Whether anything was ever saved.
    #[must_use]
    pub fn is_saved(&self) -> bool {
        self.saved.read().is_ok_and(|saved| saved.is_some())
    }
}

impl Default for MemoryConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get(&self) -> Result<Config, ConfigError> {
        Ok(self
            .saved
            .read()
            .map_err(|e| ConfigError::Unavailable(e.to_string()))?
            .clone()
            .unwrap_or_default())
    }

    async fn set(&self, patch: ConfigPatch) -> Result<Config, ConfigError> {
        let config = {
            let mut saved = self
                .saved
                .write()
                .map_err(|e| ConfigError::Unavailable(e.to_string()))?;
            let mut config = saved.clone().unwrap_or_default();
            config.apply(patch);
            *saved = Some(config.clone());
            config
        };

        // No subscribers is fine.
        let _ = self.sender.send(config.clone());
        Ok(config)
    }

    fn subscribe(&self) -> ConfigChanges {
        BroadcastStream::new(self.sender.subscribe())
            .filter_map(|change| future::ready(change.ok()))
            .boxed()
    }
}

/// In-memory vocabulary storage.
pub struct MemoryVocabularyStore {
    entries: RwLock<HashMap<Uuid, VocabularyEntry>>,
}

impl MemoryVocabularyStore {
    /// Create an empty vocabulary.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryVocabularyStore {
    fn default() -> Self {
        Self::new()
    }
}

fn same_word(entry: &VocabularyEntry, word: &str, language: &str) -> bool {
    entry.language == language && entry.word.to_lowercase() == word.trim().to_lowercase()
}

#[async_trait]
impl VocabularyStore for MemoryVocabularyStore {
    async fn add(
        &self,
        input: VocabularyInput,
        language: &str,
    ) -> Result<VocabularyEntry, StorageError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        let timestamp = now_millis();

        if let Some(existing) = entries
            .values_mut()
            .find(|entry| same_word(entry, &input.word, language))
        {
            existing.translation = input.translation;
            if input.context.is_some() {
                existing.context = input.context;
            }
            existing.updated_at = timestamp;
            return Ok(existing.clone());
        }

        let entry = VocabularyEntry {
            id: Uuid::new_v4(),
            word: input.word.trim().to_string(),
            translation: input.translation,
            context: input.context,
            language: language.to_string(),
            added_at: timestamp,
            updated_at: timestamp,
        };
        entries.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn remove(&self, word: &str, language: &str) -> Result<VocabularyEntry, StorageError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;

        let id = entries
            .values()
            .find(|entry| same_word(entry, word, language))
            .map(|entry| entry.id)
            .ok_or_else(|| StorageError::NotFound(format!("{word} ({language})")))?;

        entries
            .remove(&id)
            .ok_or_else(|| StorageError::NotFound(format!("{word} ({language})")))
    }

    async fn list(&self) -> Result<Vec<VocabularyEntry>, StorageError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?;

        let mut result: Vec<VocabularyEntry> = entries.values().cloned().collect();

        // Most recently updated first
        result.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.word.cmp(&b.word))
        });

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::assert_ok;

    use super::*;

    fn word(word: &str, translation: &str) -> VocabularyInput {
        VocabularyInput {
            word: word.to_string(),
            translation: translation.to_string(),
            context: None,
            language: None,
        }
    }

    #[tokio::test]
    async fn test_config_defaults_until_saved() {
        let store = MemoryConfigStore::new();
        assert!(!store.is_saved());
        assert_eq!(store.get().await.unwrap(), Config::default());

        let config = store.set(ConfigPatch::api_key("sk-1")).await.unwrap();
        assert!(config.has_credential());
        assert!(store.is_saved());
        assert_eq!(store.get().await.unwrap(), config);
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let store = MemoryConfigStore::new();
        let mut changes = store.subscribe();

        assert_ok!(store.set(ConfigPatch::api_key("sk-1")).await);
        assert_ok!(store.set(ConfigPatch::api_key("")).await);

        assert!(changes.next().await.unwrap().has_credential());
        assert!(!changes.next().await.unwrap().has_credential());
    }

    #[tokio::test]
    async fn test_adding_existing_word_updates_it() {
        let store = MemoryVocabularyStore::new();
        let first = store.add(word("Hund", "dog"), "de").await.unwrap();
        let second = store.add(word("hund", "hound"), "de").await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.translation, "hound");
        assert_eq!(store.list().await.unwrap().len(), 1);

        // Same word, other language: separate entry.
        store.add(word("Hund", "dog"), "nl").await.unwrap();
        assert_eq!(store.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_words_match_regardless_of_case_beyond_ascii() {
        let store = MemoryVocabularyStore::new();
        let first = store.add(word("Übung", "exercise"), "de").await.unwrap();
        let second = store.add(word("übung", "practice"), "de").await.unwrap();
        assert_eq!(first.id, second.id);

        store.add(word("Собака", "dog"), "ru").await.unwrap();
        assert_eq!(store.list().await.unwrap().len(), 2);

        assert_eq!(store.remove("ÜBUNG", "de").await.unwrap().translation, "practice");
        assert_eq!(store.remove("собака", "ru").await.unwrap().word, "Собака");
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove() {
        let store = MemoryVocabularyStore::new();
        store.add(word("Katze", "cat"), "de").await.unwrap();

        let removed = store.remove("katze", "de").await.unwrap();
        assert_eq!(removed.word, "Katze");
        assert!(store.list().await.unwrap().is_empty());

        let missing = store.remove("katze", "de").await.unwrap_err();
        assert!(matches!(missing, StorageError::NotFound(_)));
    }
}
