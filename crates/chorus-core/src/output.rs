//! Backend-neutral reply building.
//!
//! Plugins build replies through an [`Output`]: structured fields (title,
//! fields, color, footer, ...) plus two [`PlainText`] accumulators that escape
//! according to the backend they are rendered for. Backends without rich
//! formatting flatten the structured part with [`Reply::render_plain`].
//!
//! An [`Output`] is consumed by [`send`](Output::send), so each one performs
//! exactly one delivery.
//!
//! ```rust,ignore
//! let mut out = invocation.reply();
//! out.title("Weather", None).color(Color::INFO);
//! out.plain().append_formatted("Forecast: ", TextFormat::Bold).append(&forecast);
//! out.send();
//! ```

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backend::{BackendKind, BoxedBackend};

/// Field separator used when flattening rich replies.
const PLAIN_SEPARATOR: &str = " | ";

// =============================================================================
// Formatting
// =============================================================================

/// Inline text styles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextFormat {
    /// Bold text.
    Bold,
    /// Italic text.
    Italic,
    /// Underlined text.
    Underline,
    /// Monospaced text.
    Code,
}

impl TextFormat {
    fn markers(self, kind: BackendKind) -> (&'static str, &'static str) {
        match (kind, self) {
            (BackendKind::Irc, Self::Bold) => ("\x02", "\x02"),
            (BackendKind::Irc, Self::Italic) => ("\x1d", "\x1d"),
            (BackendKind::Irc, Self::Underline) => ("\x1f", "\x1f"),
            (BackendKind::Irc, Self::Code) => ("\x11", "\x11"),
            (BackendKind::Discord, Self::Bold) => ("**", "**"),
            (BackendKind::Discord, Self::Italic) => ("*", "*"),
            (BackendKind::Discord, Self::Underline) => ("__", "__"),
            (BackendKind::Discord, Self::Code) => ("`", "`"),
        }
    }
}

/// Escapes user-provided text for the given backend.
///
/// Discord escapes markdown metacharacters. IRC cannot carry line breaks or
/// NUL bytes inside a message, so those are removed.
pub fn escape(kind: BackendKind, text: &str) -> Cow<'_, str> {
    match kind {
        BackendKind::Irc => {
            if text.contains(['\r', '\n', '\0']) {
                Cow::Owned(text.chars().filter(|c| !matches!(c, '\r' | '\n' | '\0')).collect())
            } else {
                Cow::Borrowed(text)
            }
        }
        BackendKind::Discord => {
            const SPECIAL: [char; 7] = ['\\', '*', '_', '~', '`', '|', '>'];
            if !text.contains(SPECIAL) {
                return Cow::Borrowed(text);
            }
            let mut escaped = String::with_capacity(text.len() + 8);
            for ch in text.chars() {
                if SPECIAL.contains(&ch) {
                    escaped.push('\\');
                }
                escaped.push(ch);
            }
            Cow::Owned(escaped)
        }
    }
}

// =============================================================================
// PlainText
// =============================================================================

/// A text accumulator that escapes everything appended to it.
#[derive(Debug, Clone)]
pub struct PlainText {
    kind: BackendKind,
    buf: String,
}

impl PlainText {
    /// Creates an empty accumulator for `kind`.
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            buf: String::new(),
        }
    }

    /// Appends escaped text.
    pub fn append(&mut self, text: &str) -> &mut Self {
        self.buf.push_str(&escape(self.kind, text));
        self
    }

    /// Appends escaped text wrapped in a style.
    pub fn append_formatted(&mut self, text: &str, format: TextFormat) -> &mut Self {
        let (open, close) = format.markers(self.kind);
        self.buf.push_str(open);
        self.buf.push_str(&escape(self.kind, text));
        self.buf.push_str(close);
        self
    }

    /// Appends text verbatim. The caller is responsible for escaping.
    pub fn append_raw(&mut self, text: &str) -> &mut Self {
        self.buf.push_str(text);
        self
    }

    /// Appends a line break, or a separator on backends that cannot carry one.
    pub fn newline(&mut self) -> &mut Self {
        match self.kind {
            BackendKind::Irc => self.buf.push_str(PLAIN_SEPARATOR),
            BackendKind::Discord => self.buf.push('\n'),
        }
        self
    }

    /// The accumulated text.
    pub fn as_str(&self) -> &str {
        &self.buf
    }

    /// Whether nothing has been appended.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn into_string(self) -> String {
        self.buf
    }
}

impl fmt::Display for PlainText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.buf)
    }
}

// =============================================================================
// Reply
// =============================================================================

/// An RGB color for rich replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color(pub u32);

impl Color {
    /// Neutral informational color.
    pub const INFO: Self = Self(0x3498db);
    /// Success color.
    pub const SUCCESS: Self = Self(0x2ecc71);
    /// Error color.
    pub const ERROR: Self = Self(0xe74c3c);

    /// Builds a color from its components.
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self(((r as u32) << 16) | ((g as u32) << 8) | b as u32)
    }
}

/// A name/value pair in a rich reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// Field name.
    pub name: String,
    /// Field value.
    pub value: String,
    /// Whether the field may share a row with its neighbours.
    pub inline: bool,
}

/// A finished reply, ready to be rendered by a backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    /// Title line.
    pub title: Option<String>,
    /// Link attached to the title.
    pub url: Option<String>,
    /// Author line.
    pub author: Option<String>,
    /// Description body (already escaped).
    pub description: String,
    /// Structured fields.
    pub fields: Vec<Field>,
    /// Accent color.
    pub color: Option<Color>,
    /// Footer line.
    pub footer: Option<String>,
    /// Large image url.
    pub image: Option<String>,
    /// Thumbnail url.
    pub thumbnail: Option<String>,
    /// Plain message content (already escaped).
    pub plain: String,
}

impl Reply {
    /// Whether the reply carries anything at all.
    pub fn is_empty(&self) -> bool {
        self.plain.is_empty() && !self.has_rich_content()
    }

    /// Whether any structured part is set.
    pub fn has_rich_content(&self) -> bool {
        self.title.is_some()
            || self.author.is_some()
            || !self.description.is_empty()
            || !self.fields.is_empty()
            || self.footer.is_some()
            || self.image.is_some()
            || self.thumbnail.is_some()
    }

    /// Flattens the reply into a single line of text.
    ///
    /// Used by backends without rich formatting. Colors, images and the
    /// author line are dropped.
    pub fn render_plain(&self, kind: BackendKind) -> String {
        let mut parts: Vec<String> = Vec::new();

        if let Some(title) = &self.title {
            let (open, close) = TextFormat::Bold.markers(kind);
            let mut line = format!("{open}{}{close}", escape(kind, title));
            if let Some(url) = &self.url {
                line.push_str(&format!(" <{url}>"));
            }
            parts.push(line);
        }
        if !self.description.is_empty() {
            parts.push(self.description.clone());
        }
        for field in &self.fields {
            parts.push(format!(
                "{}: {}",
                escape(kind, &field.name),
                escape(kind, &field.value)
            ));
        }
        if !self.plain.is_empty() {
            parts.push(self.plain.clone());
        }
        if let Some(footer) = &self.footer {
            parts.push(escape(kind, footer).into_owned());
        }

        parts.join(PLAIN_SEPARATOR)
    }
}

// =============================================================================
// Output
// =============================================================================

/// Where a finished [`Reply`] goes.
pub trait ReplySink: Send + Sync {
    /// Hands the reply off for delivery. Must not block.
    fn deliver(&self, reply: Reply);
}

/// Delivers replies to one channel of one backend.
pub struct ChannelSink {
    backend: BoxedBackend,
    channel: String,
}

impl ChannelSink {
    /// Creates a sink for the channel with the given identifier.
    pub fn new(backend: BoxedBackend, channel: impl Into<String>) -> Self {
        Self {
            backend,
            channel: channel.into(),
        }
    }
}

impl ReplySink for ChannelSink {
    fn deliver(&self, reply: Reply) {
        self.backend.deliver(&self.channel, reply);
    }
}

/// A reply under construction.
pub struct Output {
    kind: BackendKind,
    reply: Reply,
    description: PlainText,
    plain: PlainText,
    sink: Arc<dyn ReplySink>,
}

impl Output {
    /// Creates an empty output that will be delivered through `sink`.
    pub fn new(kind: BackendKind, sink: Arc<dyn ReplySink>) -> Self {
        Self {
            kind,
            reply: Reply::default(),
            description: PlainText::new(kind),
            plain: PlainText::new(kind),
            sink,
        }
    }

    /// Creates an output addressed to a channel of `backend`.
    pub fn to_channel(backend: &BoxedBackend, channel: &str) -> Self {
        let kind = backend.kind();
        Self::new(kind, Arc::new(ChannelSink::new(Arc::clone(backend), channel)))
    }

    /// The backend family this output renders for.
    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Sets the title and an optional link.
    pub fn title(&mut self, title: impl Into<String>, url: Option<String>) -> &mut Self {
        self.reply.title = Some(title.into());
        self.reply.url = url;
        self
    }

    /// Sets the author line.
    pub fn author(&mut self, author: impl Into<String>) -> &mut Self {
        self.reply.author = Some(author.into());
        self
    }

    /// Adds a field.
    pub fn field(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
        inline: bool,
    ) -> &mut Self {
        self.reply.fields.push(Field {
            name: name.into(),
            value: value.into(),
            inline,
        });
        self
    }

    /// Sets the accent color.
    pub fn color(&mut self, color: Color) -> &mut Self {
        self.reply.color = Some(color);
        self
    }

    /// Sets the footer.
    pub fn footer(&mut self, footer: impl Into<String>) -> &mut Self {
        self.reply.footer = Some(footer.into());
        self
    }

    /// Sets the image.
    pub fn image(&mut self, url: impl Into<String>) -> &mut Self {
        self.reply.image = Some(url.into());
        self
    }

    /// Sets the thumbnail.
    pub fn thumbnail(&mut self, url: impl Into<String>) -> &mut Self {
        self.reply.thumbnail = Some(url.into());
        self
    }

    /// The description accumulator.
    pub fn description(&mut self) -> &mut PlainText {
        &mut self.description
    }

    /// The plain content accumulator.
    pub fn plain(&mut self) -> &mut PlainText {
        &mut self.plain
    }

    /// Finishes the reply without sending it.
    pub fn build(self) -> Reply {
        let mut reply = self.reply;
        reply.description = self.description.into_string();
        reply.plain = self.plain.into_string();
        reply
    }

    /// Sends the reply. Empty replies are discarded.
    pub fn send(self) {
        let sink = Arc::clone(&self.sink);
        let reply = self.build();
        if reply.is_empty() {
            tracing::debug!("Discarding empty reply");
            return;
        }
        sink.deliver(reply);
    }
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Output")
            .field("kind", &self.kind)
            .field("reply", &self.reply)
            .finish_non_exhaustive()
    }
}
