use arboard::{Clipboard, ImageData};
use parking_lot::Mutex;
use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{ClipError, Result};

/// Raw image as the OS hands it over: tightly packed RGBA8 rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    pub width: usize,
    pub height: usize,
    pub rgba: Vec<u8>,
}

/// What to place on the clipboard. Text and HTML travel together; an image is
/// only written when there is no text.
#[derive(Debug, Clone, Copy)]
pub enum WritePayload<'a> {
    Text(&'a str),
    Html { html: &'a str, text: Option<&'a str> },
    Image { width: usize, height: usize, rgba: &'a [u8] },
}

/// The OS clipboard primitive. `None` means the format is not on the clipboard.
pub trait ClipboardBackend: Send + Sync {
    fn read_text(&self) -> Result<Option<String>>;
    fn read_html(&self) -> Result<Option<String>>;
    fn read_image(&self) -> Result<Option<RawImage>>;
    fn write(&self, payload: WritePayload<'_>) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

pub struct ArboardBackend {
    clipboard: Mutex<Clipboard>,
}

impl ArboardBackend {
    pub fn new() -> Result<Self> {
        let clipboard = Clipboard::new().map_err(io_error)?;
        Ok(Self {
            clipboard: Mutex::new(clipboard),
        })
    }
}

fn io_error(e: arboard::Error) -> ClipError {
    ClipError::ClipboardIo(e.to_string())
}

fn optional<T>(result: std::result::Result<T, arboard::Error>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(arboard::Error::ContentNotAvailable) => Ok(None),
        Err(e) => Err(io_error(e)),
    }
}

impl ClipboardBackend for ArboardBackend {
    fn read_text(&self) -> Result<Option<String>> {
        optional(self.clipboard.lock().get_text())
    }

    fn read_html(&self) -> Result<Option<String>> {
        optional(self.clipboard.lock().get().html())
    }

    fn read_image(&self) -> Result<Option<RawImage>> {
        let image = optional(self.clipboard.lock().get_image())?;
        Ok(image.map(|img| RawImage {
            width: img.width,
            height: img.height,
            rgba: img.bytes.into_owned(),
        }))
    }

    fn write(&self, payload: WritePayload<'_>) -> Result<()> {
        let mut clipboard = self.clipboard.lock();
        match payload {
            WritePayload::Text(text) => clipboard.set_text(text),
            WritePayload::Html { html, text } => clipboard.set_html(html, text),
            WritePayload::Image {
                width,
                height,
                rgba,
            } => clipboard.set_image(ImageData {
                width,
                height,
                bytes: Cow::Borrowed(rgba),
            }),
        }
        .map_err(io_error)
    }

    fn clear(&self) -> Result<()> {
        self.clipboard.lock().clear().map_err(io_error)
    }
}

#[derive(Debug, Default, Clone)]
struct MemoryContents {
    text: Option<String>,
    html: Option<String>,
    image: Option<RawImage>,
}

/// In-process clipboard. Writes are visible to the next read, and
/// `set_failing(true)` makes every call return `ClipboardIo`.
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    contents: Mutex<MemoryContents>,
    failing: AtomicBool,
    writes: Mutex<usize>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn copy_text(&self, text: &str) {
        *self.contents.lock() = MemoryContents {
            text: Some(text.to_string()),
            ..Default::default()
        };
    }

    pub fn copy_html(&self, html: &str, text: &str) {
        *self.contents.lock() = MemoryContents {
            text: Some(text.to_string()),
            html: Some(html.to_string()),
            image: None,
        };
    }

    pub fn copy_image(&self, width: usize, height: usize, rgba: Vec<u8>) {
        *self.contents.lock() = MemoryContents {
            image: Some(RawImage {
                width,
                height,
                rgba,
            }),
            ..Default::default()
        };
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn write_count(&self) -> usize {
        *self.writes.lock()
    }

    pub fn is_empty(&self) -> bool {
        let contents = self.contents.lock();
        contents.text.is_none() && contents.html.is_none() && contents.image.is_none()
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ClipError::ClipboardIo("clipboard unavailable".to_string()));
        }
        Ok(())
    }
}

impl ClipboardBackend for MemoryClipboard {
    fn read_text(&self) -> Result<Option<String>> {
        self.check()?;
        Ok(self.contents.lock().text.clone())
    }

    fn read_html(&self) -> Result<Option<String>> {
        self.check()?;
        Ok(self.contents.lock().html.clone())
    }

    fn read_image(&self) -> Result<Option<RawImage>> {
        self.check()?;
        Ok(self.contents.lock().image.clone())
    }

    fn write(&self, payload: WritePayload<'_>) -> Result<()> {
        self.check()?;
        *self.writes.lock() += 1;
        match payload {
            WritePayload::Text(text) => self.copy_text(text),
            WritePayload::Html { html, text } => self.copy_html(html, text.unwrap_or_default()),
            WritePayload::Image {
                width,
                height,
                rgba,
            } => self.copy_image(width, height, rgba.to_vec()),
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.check()?;
        *self.contents.lock() = MemoryContents::default();
        Ok(())
    }
}
