use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::error::{ClipError, Result};
use crate::snapshot::{ContentKind, ContentSnapshot, ImageSnapshot};
use crate::watcher::ClipboardChange;

pub const SHORTCUT_SLOTS: usize = 9;
const SUMMARY_LENGTH: usize = 100;
const IMAGE_KEYWORDS: [&str; 5] = ["img", "image", "jpg", "jpeg", "png"];

static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s{2,}").unwrap());

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub content_type: ContentKind,
    pub text: Option<String>,
    pub html: Option<String>,
    #[serde(rename = "imageData")]
    pub image: Option<ImageSnapshot>,
    pub is_pinned: bool,
}

impl From<ClipboardChange> for HistoryEntry {
    fn from(change: ClipboardChange) -> Self {
        Self {
            content_type: change.content_type,
            text: change.text,
            html: change.html,
            image: change.image_data,
            is_pinned: false,
        }
    }
}

impl HistoryEntry {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content_type: ContentKind::Text,
            text: Some(text.into()),
            html: None,
            image: None,
            is_pinned: false,
        }
    }

    pub fn content(&self) -> ContentSnapshot {
        ContentSnapshot {
            kind: self.content_type,
            text: self.text.clone(),
            html: self.html.clone(),
            image: self.image.clone(),
        }
    }

    /// One-line preview: whitespace runs dropped, trimmed, cut at 100 chars.
    pub fn summary(&self) -> String {
        if self.content_type == ContentKind::Image {
            return match &self.image {
                Some(img) => format!("[image {}x{}]", img.size.width, img.size.height),
                None => "[image]".to_string(),
            };
        }

        let text = self.text.as_deref().unwrap_or_default();
        let squeezed = WHITESPACE_RUN.replace_all(text, "");
        let trimmed = squeezed.trim();

        let mut summary: String = trimmed.chars().take(SUMMARY_LENGTH).collect();
        if trimmed.chars().count() > SUMMARY_LENGTH {
            summary.push_str(" ...");
        }
        summary
    }

    /// Search match: substring of text or HTML; images match image keywords.
    pub fn matches(&self, query: &str) -> bool {
        match self.content_type {
            ContentKind::Text => self.text.as_deref().is_some_and(|t| t.contains(query)),
            ContentKind::Html => self.html.as_deref().is_some_and(|h| h.contains(query)),
            ContentKind::Image => query.is_empty() || IMAGE_KEYWORDS.contains(&query),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortcutBinding {
    pub index: usize,
    pub accelerator: String,
}

impl ShortcutBinding {
    fn for_slot(index: usize) -> Self {
        Self {
            index,
            accelerator: format!("Ctrl+{}", index + 1),
        }
    }
}

/// What happens when the only entry left to evict is the one just inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CapacityPolicy {
    #[default]
    Strict,
    AllowPinnedOverflow,
}

/// Ordered, capacity-bounded clipboard history. Unpinned entries run
/// newest-first; pinned entries hold their slot.
#[derive(Debug)]
pub struct HistoryStore {
    entries: Vec<HistoryEntry>,
    capacity: usize,
    policy: CapacityPolicy,
}

impl HistoryStore {
    pub fn new(capacity: usize, policy: CapacityPolicy) -> Self {
        Self {
            entries: Vec::with_capacity(capacity + 1),
            capacity,
            policy,
        }
    }

    /// The entry lands in the first unpinned slot; each later unpinned entry
    /// moves to the next unpinned slot and the last one is pushed to the tail.
    /// Pinned entries never move.
    pub fn insert(&mut self, entry: HistoryEntry) -> Vec<HistoryEntry> {
        let landing = self
            .entries
            .iter()
            .position(|e| !e.is_pinned)
            .unwrap_or(self.entries.len());

        let mut carry = entry;
        for slot in self.entries.iter_mut().filter(|e| !e.is_pinned) {
            carry = std::mem::replace(slot, carry);
        }
        self.entries.push(carry);

        let mut evicted = Vec::new();
        while self.entries.len() > self.capacity {
            let Some(victim) = self.entries.iter().rposition(|e| !e.is_pinned) else {
                break;
            };
            // only pins are left besides the capture just made
            if victim == landing && self.policy == CapacityPolicy::AllowPinnedOverflow {
                break;
            }
            evicted.push(self.entries.remove(victim));
        }

        if !evicted.is_empty() {
            debug!("history over capacity, evicted {} entries", evicted.len());
        }
        evicted
    }

    pub fn toggle_pin(&mut self, index: usize) -> Result<bool> {
        let len = self.entries.len();
        let entry = self
            .entries
            .get_mut(index)
            .ok_or(ClipError::IndexOutOfRange { index, len })?;
        entry.is_pinned = !entry.is_pinned;
        Ok(entry.is_pinned)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn get(&self, index: usize) -> Result<&HistoryEntry> {
        self.entries.get(index).ok_or(ClipError::IndexOutOfRange {
            index,
            len: self.entries.len(),
        })
    }

    pub fn assign_shortcuts(&self) -> Vec<ShortcutBinding> {
        (0..self.entries.len().min(SHORTCUT_SLOTS))
            .map(ShortcutBinding::for_slot)
            .collect()
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
