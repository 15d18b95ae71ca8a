//! Post-processing handler chains.
//!
//! Registries are ordered name-to-handler tables. Post handlers all run, in
//! registration order, on every post a factory returns; menu item handlers are
//! looked up by the item's type and at most one runs. Shortcode handlers render
//! the `[name ...]` tags the [`Shortcodes`] post handler finds in content.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use metrics::counter;
use thiserror::Error;
use tracing::trace;

use crate::domain::entities::MenuItem;
use crate::domain::posts::Post;

pub(crate) const METRIC_HANDLER_RUN_TOTAL: &str = "presskit_handler_run_total";

/// Name the [`Shortcodes`] handler is conventionally registered under.
pub const SHORTCODES_HANDLER: &str = "shortcodes";

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("handler `{name}` failed: {message}")]
    Failed { name: String, message: String },
}

impl HandlerError {
    pub fn failed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            name: name.into(),
            message: message.into(),
        }
    }
}

pub trait PostHandler: Send + Sync {
    fn handle(&self, post: &mut Post) -> Result<(), HandlerError>;
}

pub trait MenuItemHandler: Send + Sync {
    fn handle(&self, item: &mut MenuItem) -> Result<(), HandlerError>;
}

pub trait ShortcodeHandler: Send + Sync {
    /// The replacement text for one shortcode occurrence.
    fn render(&self, shortcode: &Shortcode) -> Result<String, HandlerError>;
}

pub struct HandlerRegistry<H: ?Sized> {
    handlers: Vec<(String, Arc<H>)>,
}

impl<H: ?Sized> Default for HandlerRegistry<H> {
    fn default() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }
}

impl<H: ?Sized> Clone for HandlerRegistry<H> {
    fn clone(&self) -> Self {
        Self {
            handlers: self.handlers.clone(),
        }
    }
}

impl<H: ?Sized> fmt::Debug for HandlerRegistry<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl<H: ?Sized> HandlerRegistry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under `name`; re-registering a name replaces the handler in place.
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<H>) {
        let name = name.into();
        match self.handlers.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = handler,
            None => self.handlers.push((name, handler)),
        }
    }

    pub fn with(mut self, name: impl Into<String>, handler: Arc<H>) -> Self {
        self.register(name, handler);
        self
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<H>> {
        self.handlers
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, handler)| Arc::clone(handler))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

pub type PostHandlers = HandlerRegistry<dyn PostHandler>;
pub type MenuItemHandlers = HandlerRegistry<dyn MenuItemHandler>;
pub type ShortcodeHandlers = HandlerRegistry<dyn ShortcodeHandler>;

impl HandlerRegistry<dyn PostHandler> {
    /// Run every handler in order, recording each name on the post. Stops at
    /// the first failure.
    pub fn run(&self, post: &mut Post) -> Result<(), HandlerError> {
        for (name, handler) in &self.handlers {
            handler.handle(post)?;
            post.record_handler(name);
            counter!(METRIC_HANDLER_RUN_TOTAL, "kind" => "post", "handler" => name.clone())
                .increment(1);
            trace!(handler = %name, post_id = ?post.id(), "post handler ran");
        }
        Ok(())
    }
}

impl HandlerRegistry<dyn MenuItemHandler> {
    /// Run the handler registered for the item's type, if any. Returns
    /// whether one ran.
    pub fn run(&self, item: &mut MenuItem) -> Result<bool, HandlerError> {
        let Some(item_type) = item.item_type.clone() else {
            return Ok(false);
        };
        let Some(handler) = self.resolve(&item_type) else {
            return Ok(false);
        };
        handler.handle(item)?;
        item.handlers.push(item_type.clone());
        counter!(METRIC_HANDLER_RUN_TOTAL, "kind" => "menu_item", "handler" => item_type)
            .increment(1);
        Ok(true)
    }
}

/// One parsed shortcode occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shortcode {
    pub name: String,
    /// Named attributes; bare words are stored with an empty value.
    pub attributes: BTreeMap<String, String>,
    /// Text between `[name]` and `[/name]`, unprocessed.
    pub content: Option<String>,
}

impl Shortcode {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

struct OpenTag {
    name: String,
    attributes: BTreeMap<String, String>,
    self_closing: bool,
    len: usize,
}

fn is_name_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == '-'
}

/// Parse `[name attr="v" ...]` or `[name /]` at the start of `input`.
fn parse_open_tag(input: &str) -> Option<OpenTag> {
    let inner_end = input.find(']')?;
    let inner = input.get(1..inner_end)?;
    let name_len = inner.find(|ch: char| !is_name_char(ch)).unwrap_or(inner.len());
    if name_len == 0 {
        return None;
    }
    let (name, rest) = inner.split_at(name_len);
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) && !rest.starts_with('/') {
        return None;
    }
    let rest = rest.trim();
    let (rest, self_closing) = match rest.strip_suffix('/') {
        Some(stripped) => (stripped.trim_end(), true),
        None => (rest, false),
    };
    Some(OpenTag {
        name: name.to_string(),
        attributes: parse_attributes(rest)?,
        self_closing,
        len: inner_end + 1,
    })
}

fn parse_attributes(mut input: &str) -> Option<BTreeMap<String, String>> {
    let mut attributes = BTreeMap::new();
    loop {
        input = input.trim_start();
        if input.is_empty() {
            return Some(attributes);
        }
        let key_len = input
            .find(|ch: char| ch == '=' || ch.is_whitespace())
            .unwrap_or(input.len());
        let key = &input[..key_len];
        if key.is_empty() || key.contains(['"', '\'', '[']) {
            return None;
        }
        input = &input[key_len..];
        if let Some(after_eq) = input.strip_prefix('=') {
            let (value, remaining) = match after_eq.chars().next() {
                Some(quote @ ('"' | '\'')) => {
                    let body = &after_eq[1..];
                    let close = body.find(quote)?;
                    (&body[..close], &body[close + 1..])
                }
                _ => {
                    let end = after_eq.find(char::is_whitespace).unwrap_or(after_eq.len());
                    after_eq.split_at(end)
                }
            };
            attributes.insert(key.to_string(), value.to_string());
            input = remaining;
        } else {
            attributes.insert(key.to_string(), String::new());
        }
    }
}

/// Expands shortcodes in post content and excerpt through a registry of
/// [`ShortcodeHandler`]s. Tags with no registered handler are left as written.
#[derive(Debug, Clone, Default)]
pub struct Shortcodes {
    handlers: ShortcodeHandlers,
}

impl Shortcodes {
    pub fn new(handlers: ShortcodeHandlers) -> Self {
        Self { handlers }
    }

    pub fn expand(&self, text: &str) -> Result<String, HandlerError> {
        if self.handlers.is_empty() || !text.contains('[') {
            return Ok(text.to_string());
        }

        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find('[') {
            out.push_str(&rest[..start]);
            let candidate = &rest[start..];

            let matched = parse_open_tag(candidate).and_then(|tag| {
                self.handlers
                    .resolve(&tag.name)
                    .map(|handler| (tag, handler))
            });
            let Some((tag, handler)) = matched else {
                out.push('[');
                rest = &candidate[1..];
                continue;
            };

            let after_open = &candidate[tag.len..];
            let closing = format!("[/{}]", tag.name);
            let (content, consumed) = match after_open.find(&closing) {
                Some(index) if !tag.self_closing => (
                    Some(after_open[..index].to_string()),
                    tag.len + index + closing.len(),
                ),
                _ => (None, tag.len),
            };

            let shortcode = Shortcode {
                name: tag.name,
                attributes: tag.attributes,
                content,
            };
            out.push_str(&handler.render(&shortcode)?);
            rest = &candidate[consumed..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

impl PostHandler for Shortcodes {
    fn handle(&self, post: &mut Post) -> Result<(), HandlerError> {
        let content = self.expand(post.content())?;
        let excerpt = self.expand(post.excerpt())?;
        let record = post.record_mut();
        record.post_content = content;
        record.post_excerpt = excerpt;
        Ok(())
    }
}
