//! Thread listings: personal threads, project threads and favorites.
//!
//! The index only holds ordered chat ids; session metadata lives in the
//! registry's chat map.

use crate::backend::{ThreadPage, THREADS_PER_PAGE};
use crate::types::ChatId;

/// Cursor requesting the first page of a listing
pub fn first_page_cursor() -> String {
    format!("{}:0:0", THREADS_PER_PAGE)
}

/// One cursor-paginated thread list
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PagedThreads {
    ids: Vec<ChatId>,
    pub next_cursor: Option<String>,
    pub prev_cursor: Option<String>,
    pub next_page_results: bool,
    pub total_pages: u32,
    pub total_results: Option<u64>,
}

impl PagedThreads {
    pub fn ids(&self) -> &[ChatId] {
        &self.ids
    }

    pub fn contains(&self, chat_id: &str) -> bool {
        self.ids.iter().any(|id| id == chat_id)
    }

    /// Merge a listing page.
    ///
    /// The first page replaces everything. Later pages only move the cursor
    /// and add ids not already listed; listed ids keep their position.
    pub fn apply_page(&mut self, page: &ThreadPage, first_page: bool) {
        if first_page {
            *self = Self {
                ids: Vec::new(),
                next_cursor: page.next_cursor.clone(),
                prev_cursor: page.prev_cursor.clone(),
                next_page_results: page.next_page_results,
                total_pages: page.total_pages,
                total_results: page.total_results,
            };
        } else {
            self.next_cursor = page.next_cursor.clone();
            self.next_page_results = page.next_page_results;
            self.total_pages = page.total_pages;
            if page.total_results.is_some() {
                self.total_results = page.total_results;
            }
        }
        self.append_unseen(page.results.iter().map(|t| t.chat_id.clone()));
    }

    /// Append ids that are not listed yet, in order.
    pub fn append_unseen(&mut self, ids: impl IntoIterator<Item = ChatId>) {
        for id in ids {
            if !self.contains(&id) {
                self.ids.push(id);
            }
        }
    }

    /// Put a chat at the top of the list.
    pub fn prepend(&mut self, chat_id: ChatId) {
        self.ids.retain(|id| *id != chat_id);
        self.ids.insert(0, chat_id);
    }

    pub fn remove(&mut self, chat_id: &str) -> bool {
        let before = self.ids.len();
        self.ids.retain(|id| id != chat_id);
        self.ids.len() != before
    }

    pub fn position(&self, chat_id: &str) -> Option<usize> {
        self.ids.iter().position(|id| id == chat_id)
    }

    /// Put a chat back at `index`, clamped to the list; listed chats stay put.
    pub fn reinsert(&mut self, chat_id: &str, index: usize) {
        reinsert(&mut self.ids, chat_id, index);
    }
}

/// Where a chat sits in each list
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Placement {
    pub personal: Option<usize>,
    pub project: Option<usize>,
    pub favorite: Option<usize>,
}

fn reinsert(ids: &mut Vec<ChatId>, chat_id: &str, index: usize) {
    if ids.iter().any(|id| id == chat_id) {
        return;
    }
    let index = index.min(ids.len());
    ids.insert(index, chat_id.to_string());
}

/// Ordered thread lists per scope
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThreadIndex {
    personal: PagedThreads,
    project: PagedThreads,
    favorites: Vec<ChatId>,
}

impl ThreadIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn threads(&self, is_project_chat: bool) -> &PagedThreads {
        if is_project_chat {
            &self.project
        } else {
            &self.personal
        }
    }

    pub fn threads_mut(&mut self, is_project_chat: bool) -> &mut PagedThreads {
        if is_project_chat {
            &mut self.project
        } else {
            &mut self.personal
        }
    }

    pub fn favorites(&self) -> &[ChatId] {
        &self.favorites
    }

    pub fn is_favorite(&self, chat_id: &str) -> bool {
        self.favorites.iter().any(|id| id == chat_id)
    }

    /// Replace favorites with a confirmed backend list.
    pub fn set_favorites(&mut self, favorites: Vec<ChatId>) {
        self.favorites.clear();
        for id in favorites {
            if !self.is_favorite(&id) {
                self.favorites.push(id);
            }
        }
    }

    pub fn add_favorite(&mut self, chat_id: &str) {
        if !self.is_favorite(chat_id) {
            self.favorites.push(chat_id.to_string());
        }
    }

    pub fn remove_favorite(&mut self, chat_id: &str) {
        self.favorites.retain(|id| id != chat_id);
    }

    pub fn favorite_position(&self, chat_id: &str) -> Option<usize> {
        self.favorites.iter().position(|id| id == chat_id)
    }

    pub fn reinsert_favorite(&mut self, chat_id: &str, index: usize) {
        reinsert(&mut self.favorites, chat_id, index);
    }

    /// Drop a chat from every list.
    pub fn remove_everywhere(&mut self, chat_id: &str) {
        self.personal.remove(chat_id);
        self.project.remove(chat_id);
        self.remove_favorite(chat_id);
    }

    pub fn placement(&self, chat_id: &str) -> Placement {
        Placement {
            personal: self.personal.position(chat_id),
            project: self.project.position(chat_id),
            favorite: self.favorite_position(chat_id),
        }
    }

    /// Put a removed chat back where `placement` found it.
    ///
    /// Only this chat's entries change; other ids listed since stay.
    pub fn restore(&mut self, chat_id: &str, placement: Placement) {
        if let Some(index) = placement.personal {
            self.personal.reinsert(chat_id, index);
        }
        if let Some(index) = placement.project {
            self.project.reinsert(chat_id, index);
        }
        if let Some(index) = placement.favorite {
            self.reinsert_favorite(chat_id, index);
        }
    }
}
