use log::debug;
use std::sync::Arc;

use crate::backend::{ClipboardBackend, WritePayload};
use crate::error::{ClipError, Result};
use crate::snapshot::{ContentSnapshot, ImageSnapshot};

#[derive(Clone)]
pub struct ClipboardReader {
    backend: Arc<dyn ClipboardBackend>,
}

impl ClipboardReader {
    pub fn new(backend: Arc<dyn ClipboardBackend>) -> Self {
        Self { backend }
    }

    pub fn read_snapshot(&self) -> Result<ContentSnapshot> {
        let text = self.backend.read_text()?;
        let html = self.backend.read_html()?;

        let has_text = |s: &Option<String>| s.as_deref().is_some_and(|s| !s.is_empty());
        // pixels are only encoded when they decide the kind
        let image = if has_text(&text) || has_text(&html) {
            None
        } else {
            match self.backend.read_image()? {
                Some(raw) => Some(ImageSnapshot::new(raw.width, raw.height, raw.rgba)?),
                None => None,
            }
        };

        Ok(ContentSnapshot::classify(text, html, image))
    }

    /// Place `content` on the clipboard: text and HTML when present, else the image.
    pub fn write(&self, content: &ContentSnapshot) -> Result<()> {
        let payload = match (&content.html, &content.text, &content.image) {
            (Some(html), text, _) => WritePayload::Html {
                html,
                text: text.as_deref(),
            },
            (None, Some(text), _) => WritePayload::Text(text),
            (None, None, Some(image)) => WritePayload::Image {
                width: image.size.width,
                height: image.size.height,
                rgba: &image.rgba,
            },
            (None, None, None) => {
                return Err(ClipError::ClipboardIo(
                    "nothing to write to the clipboard".to_string(),
                ));
            }
        };

        debug!("writing {:?} content to clipboard", content.kind);
        self.backend.write(payload)
    }

    pub fn clear(&self) -> Result<()> {
        self.backend.clear()
    }
}
