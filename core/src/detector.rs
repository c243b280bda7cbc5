//! Change detection between a watcher's baseline and a fresh read.

use crate::snapshot::{ContentKind, ContentSnapshot, ImageSnapshot};

/// Decide whether `current` differs from `previous` for `current`'s kind.
///
/// - Text changes only when non-blank and different from the baseline text.
/// - HTML compares the raw markup strings.
/// - Images compare their base64 encodings, length first.
pub fn has_changed(previous: Option<&ContentSnapshot>, current: &ContentSnapshot) -> bool {
    match current.kind {
        ContentKind::Text => text_changed(
            previous.and_then(|p| p.text.as_deref()),
            current.text.as_deref(),
        ),
        ContentKind::Html => previous.and_then(|p| p.html.as_deref()) != current.html.as_deref(),
        ContentKind::Image => image_changed(
            previous.and_then(|p| p.image.as_ref()),
            current.image.as_ref(),
        ),
    }
}

fn text_changed(previous: Option<&str>, current: Option<&str>) -> bool {
    match current {
        Some(text) if !text.trim().is_empty() => previous != Some(text),
        _ => false,
    }
}

fn image_changed(previous: Option<&ImageSnapshot>, current: Option<&ImageSnapshot>) -> bool {
    let Some(current) = current else {
        return false;
    };
    match previous {
        None => true,
        Some(previous) => {
            // length check first; equal lengths still need the full compare
            previous.base64.len() != current.base64.len() || previous.base64 != current.base64
        }
    }
}
