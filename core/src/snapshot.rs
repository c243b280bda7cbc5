use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};

use crate::data_url;
use crate::error::Result;

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static BLANK_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]{2,}").unwrap());

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    #[default]
    Text,
    Html,
    Image,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: usize,
    pub height: usize,
}

/// A clipboard image: the raw RGBA pixels plus their PNG data URL.
///
/// Only the encoded form is serialized; the pixels stay in-process so the
/// image can be written back to the clipboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSnapshot {
    pub base64: String,
    pub size: ImageSize,
    pub aspect_ratio: f64,
    #[serde(skip)]
    pub rgba: Arc<Vec<u8>>,
}

impl ImageSnapshot {
    pub fn new(width: usize, height: usize, rgba: Vec<u8>) -> Result<Self> {
        let base64 = data_url::to_data_url(width, height, &rgba)?;
        let aspect_ratio = if height == 0 {
            0.0
        } else {
            width as f64 / height as f64
        };

        Ok(Self {
            base64,
            size: ImageSize { width, height },
            aspect_ratio,
            rgba: Arc::new(rgba),
        })
    }

    pub fn same_encoding(&self, other: &ImageSnapshot) -> bool {
        self.base64.len() == other.base64.len() && self.base64 == other.base64
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContentSnapshot {
    pub kind: ContentKind,
    pub text: Option<String>,
    pub html: Option<String>,
    pub image: Option<ImageSnapshot>,
}

impl ContentSnapshot {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: ContentKind::Text,
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn html(html: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: ContentKind::Html,
            text: Some(text.into()),
            html: Some(html.into()),
            image: None,
        }
    }

    pub fn image(image: ImageSnapshot) -> Self {
        Self {
            kind: ContentKind::Image,
            image: Some(image),
            ..Self::default()
        }
    }

    /// Classify raw clipboard formats: HTML, then plain text, then image.
    /// An empty clipboard is an empty Text snapshot.
    pub fn classify(
        text: Option<String>,
        html: Option<String>,
        image: Option<ImageSnapshot>,
    ) -> Self {
        let text = text.filter(|t| !t.is_empty());

        match (html.filter(|h| !h.is_empty()), text, image) {
            (Some(html), text, _) => {
                let text = text.unwrap_or_else(|| plain_text_from_html(&html));
                Self::html(html, text)
            }
            (None, Some(text), _) => Self::text(text),
            (None, None, Some(image)) => Self::image(image),
            (None, None, None) => Self {
                kind: ContentKind::Text,
                ..Self::default()
            },
        }
    }

    pub fn same_content(&self, other: &ContentSnapshot) -> bool {
        if self.kind != other.kind {
            return false;
        }
        match self.kind {
            ContentKind::Text => self.text == other.text,
            ContentKind::Html => self.html == other.html,
            ContentKind::Image => match (&self.image, &other.image) {
                (Some(a), Some(b)) => a.same_encoding(b),
                (None, None) => true,
                _ => false,
            },
        }
    }

    /// Fold the fields relevant to `current.kind` into this baseline.
    /// HTML captures also carry their text, so both move together.
    pub fn adopt_changed(&mut self, current: &ContentSnapshot) {
        match current.kind {
            ContentKind::Html => {
                self.html = current.html.clone();
                self.text = current.text.clone();
            }
            ContentKind::Text => self.text = current.text.clone(),
            ContentKind::Image => self.image = current.image.clone(),
        }
        self.kind = current.kind;
    }
}

/// Plain-text rendition of an HTML fragment, for HTML captures that arrive
/// without a text flavour.
pub fn plain_text_from_html(html: &str) -> String {
    let stripped = TAG.replace_all(html, " ");
    let decoded = stripped
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    BLANK_RUN.replace_all(&decoded, " ").trim().to_string()
}
