//! Named messages exchanged with the presentation layer.

use serde::{Deserialize, Serialize};

use crate::history::HistoryEntry;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "channel", content = "payload", rename_all = "kebab-case")]
pub enum OutboundMessage {
    RefreshHistory(Vec<HistoryEntry>),
    UpdateActiveContent(usize),
    DisplayFullText { index: usize, entry: HistoryEntry },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "channel", content = "payload", rename_all = "kebab-case")]
pub enum InboundMessage {
    SetClipboard(usize),
    DisplayFullTextWindow(usize),
    FullTextWindowClosed,
    PinEntry(usize),
    WindowMove,
    WindowMoved,
    ClearHistory,
}
