//! Ordered dialogue of one chat.
//!
//! Keeps the ordered key list and the key to entry map in lockstep: every
//! listed key resolves to an entry and every entry is listed.

use std::collections::HashMap;

use crate::error::{ChatError, ChatResult};
use crate::types::{DialogueEntry, DialogueKey, Token};

/// Dialogue list and map of one chat
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DialogueBuilder {
    order: Vec<DialogueKey>,
    entries: HashMap<DialogueKey, DialogueEntry>,
}

impl DialogueBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from history entries; entries without a token are skipped.
    pub fn from_history(history: Vec<DialogueEntry>) -> Self {
        let mut builder = Self::new();
        for entry in history {
            let Some(query_id) = entry.query_id.clone().filter(|id| !id.is_empty()) else {
                continue;
            };
            let key = DialogueKey::Confirmed(Token::new(query_id));
            if builder.entries.insert(key.clone(), entry).is_none() {
                builder.order.push(key);
            }
        }
        builder
    }

    /// Append an entry whose token is not known yet.
    pub fn push_provisional(&mut self, entry: DialogueEntry) -> DialogueKey {
        let key = DialogueKey::provisional();
        self.order.push(key.clone());
        self.entries.insert(key.clone(), entry);
        key
    }

    /// Rekey a provisional entry to its issued token, keeping its slot.
    ///
    /// Afterwards the provisional key no longer resolves.
    pub fn confirm(&mut self, provisional: &DialogueKey, token: &Token) -> ChatResult<DialogueKey> {
        if token.is_empty() {
            return Err(ChatError::Validation("issued token is empty".to_string()));
        }
        let confirmed = DialogueKey::Confirmed(token.clone());
        if self.entries.contains_key(&confirmed) {
            return Err(ChatError::InvalidState {
                operation: "confirm".to_string(),
                reason: format!("token {} already present in dialogue", token),
            });
        }
        let slot = self
            .order
            .iter()
            .position(|k| k == provisional)
            .ok_or_else(|| ChatError::NotFound(format!("dialogue entry {}", provisional)))?;
        let mut entry = self
            .entries
            .remove(provisional)
            .ok_or_else(|| ChatError::NotFound(format!("dialogue entry {}", provisional)))?;

        entry.query_id = Some(token.to_string());
        self.order[slot] = confirmed.clone();
        self.entries.insert(confirmed.clone(), entry);
        Ok(confirmed)
    }

    /// Replace the entry stored under `key`.
    ///
    /// Only keys already in the dialogue are accepted, so no entry can exist
    /// without a list slot.
    pub fn update_dialogue(&mut self, key: &DialogueKey, entry: DialogueEntry) -> ChatResult<()> {
        match self.entries.get_mut(key) {
            Some(slot) => {
                *slot = entry;
                Ok(())
            }
            None => Err(ChatError::NotFound(format!("dialogue entry {}", key))),
        }
    }

    pub fn get(&self, key: &DialogueKey) -> Option<&DialogueEntry> {
        self.entries.get(key)
    }

    pub fn get_by_token(&self, token: &Token) -> Option<&DialogueEntry> {
        self.entries.get(&DialogueKey::Confirmed(token.clone()))
    }

    /// Key at a position in the dialogue
    pub fn key_at(&self, index: usize) -> Option<&DialogueKey> {
        self.order.get(index)
    }

    pub fn last_key(&self) -> Option<&DialogueKey> {
        self.order.last()
    }

    pub fn keys(&self) -> &[DialogueKey] {
        &self.order
    }

    /// Entries in dialogue order
    pub fn entries(&self) -> impl Iterator<Item = (&DialogueKey, &DialogueEntry)> {
        self.order
            .iter()
            .filter_map(move |key| self.entries.get(key).map(|entry| (key, entry)))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Check that list and map agree
    pub fn is_consistent(&self) -> bool {
        self.order.len() == self.entries.len() && self.order.iter().all(|k| self.entries.contains_key(k))
    }
}
