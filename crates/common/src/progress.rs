//! Progress feed
//!
//! The delivery channels never talk to a UI directly. They emit
//! [`ProgressMessage`]s into a [`ProgressSink`], and whoever owns the sink
//! decides how to present them (log lines, a websocket, a test recorder).
//!
//! A message is either *localizable*, carrying a stable id and an English
//! template with positional `{0}`, `{1}` placeholders, or *unlocalized*,
//! carrying literal text such as an OS error string meant for bug reports.

use std::sync::Arc;
use tracing::{error, info, warn};

/// Severity of a progress message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgressKind {
    /// Ordinary step in a longer operation
    Progress,
    /// Something the user will want to notice, e.g. a completed send
    Note,
    /// Something the user needs to do
    Instruction,
    /// Recoverable problem
    Warning,
    /// Failure of the current operation
    Error,
}

/// A single entry in the progress feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressMessage {
    /// Stable localization key; `None` for unlocalized text
    pub id: Option<String>,
    /// English template, or the literal text when `id` is `None`
    pub template: String,
    /// Values substituted for `{0}`, `{1}`, ...
    pub params: Vec<String>,
    pub kind: ProgressKind,
}

impl ProgressMessage {
    pub fn localizable(id: &str, template: &str, params: &[&str], kind: ProgressKind) -> Self {
        Self {
            id: Some(id.to_string()),
            template: template.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
            kind,
        }
    }

    pub fn unlocalized(text: &str, kind: ProgressKind) -> Self {
        Self {
            id: None,
            template: text.to_string(),
            params: Vec::new(),
            kind,
        }
    }

    /// Text with all parameters substituted
    pub fn render(&self) -> String {
        if self.params.is_empty() {
            return self.template.clone();
        }
        render_template(&self.template, &self.params)
    }
}

/// Substitute `{n}` placeholders with `params[n]`
///
/// Placeholders without a matching parameter are left untouched.
pub fn render_template<S: AsRef<str>>(template: &str, params: &[S]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let substituted = after.find('}').and_then(|close| {
            let index: usize = after[..close].parse().ok()?;
            let value = params.get(index)?;
            Some((value.as_ref(), close))
        });
        match substituted {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Receiver of progress messages
///
/// Only [`ProgressSink::report`] must be implemented; the other methods are
/// the shapes callers actually use.
pub trait ProgressSink: Send + Sync {
    fn report(&self, message: ProgressMessage);

    fn message(&self, id: &str, template: &str, params: &[&str]) {
        self.report(ProgressMessage::localizable(
            id,
            template,
            params,
            ProgressKind::Progress,
        ));
    }

    fn message_of_kind(&self, id: &str, template: &str, params: &[&str], kind: ProgressKind) {
        self.report(ProgressMessage::localizable(id, template, params, kind));
    }

    fn error(&self, id: &str, template: &str) {
        self.report(ProgressMessage::localizable(
            id,
            template,
            &[],
            ProgressKind::Error,
        ));
    }

    fn message_without_localizing(&self, text: &str, kind: ProgressKind) {
        self.report(ProgressMessage::unlocalized(text, kind));
    }

    fn error_without_localizing(&self, text: &str) {
        self.report(ProgressMessage::unlocalized(text, ProgressKind::Error));
    }
}

impl<T: ProgressSink + ?Sized> ProgressSink for Arc<T> {
    fn report(&self, message: ProgressMessage) {
        (**self).report(message)
    }
}

/// Sink that writes every message to the tracing log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn report(&self, message: ProgressMessage) {
        let id = message.id.as_deref().unwrap_or("-");
        let text = message.render();
        match message.kind {
            ProgressKind::Error => error!(target: "progress", id, "{}", text),
            ProgressKind::Warning => warn!(target: "progress", id, "{}", text),
            ProgressKind::Progress | ProgressKind::Note | ProgressKind::Instruction => {
                info!(target: "progress", id, "{}", text)
            }
        }
    }
}

/// Sink that prepends a fixed prefix to the id of localizable messages
///
/// Each delivery channel keeps its message ids under its own namespace, e.g.
/// `PublishTab.Android.Usb.Progress.Connected`.
#[derive(Debug, Clone)]
pub struct PrefixedProgress<S> {
    inner: S,
    prefix: String,
}

impl<S: ProgressSink> PrefixedProgress<S> {
    pub fn new(inner: S, prefix: impl Into<String>) -> Self {
        Self {
            inner,
            prefix: prefix.into(),
        }
    }
}

impl<S: ProgressSink> ProgressSink for PrefixedProgress<S> {
    fn report(&self, mut message: ProgressMessage) {
        if let Some(id) = message.id.take() {
            message.id = Some(format!("{}{}", self.prefix, id));
        }
        self.inner.report(message);
    }
}
