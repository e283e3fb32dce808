//! Directive parser.
//!
//! A directive is one configuration string describing one binding:
//!
//! ```text
//! [pre] ] action[ + source] [--> target] [ [post]     emitter / listener
//! [pre] ] action [<-- source] [ [post]                emitBack
//! ```
//!
//! Whitespace around `]`, `-->`, `<--`, `[` and `+` is insignificant.
//! Anything the grammar does not recognise yields a [`ParseSkip`] so a
//! partially invalid configuration never aborts the wiring pass.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

const FORWARD: &str = "-->";
const BACKWARD: &str = "<--";

/// Characters that only make sense as operators.
const OPERATOR_CHARS: &[char] = &['<', '>', '=', '[', ']'];

/// What a compiled binding does with its action name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    /// Outbound emit invoked by the application.
    Emitter,
    /// Inbound transport event written into application state.
    Listener,
    /// Outbound emit triggered by a change of watched state.
    EmitBack,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Emitter => "emitter",
            Self::Listener => "listener",
            Self::EmitBack => "emitBack",
        })
    }
}

/// Compiled form of a directive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Binding {
    pub role: Role,
    pub action: String,
    /// Emitter: extra payload path. EmitBack: watched path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Where acks (emitters) or payloads (listeners) are written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Pre-hook, or the validator for emitBacks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre: Option<String>,
    /// Post-hook, or the done hook for emitBacks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post: Option<String>,
}

impl Binding {
    /// Path a listener writes to; defaults to the event name.
    pub fn target_or_action(&self) -> &str {
        self.target.as_deref().unwrap_or(&self.action)
    }

    /// Path an emitBack watches; a bare emitBack mirrors its own name.
    pub fn source_or_action(&self) -> &str {
        self.source.as_deref().unwrap_or(&self.action)
    }
}

/// A directive that was ignored. Not an error.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseSkip {
    #[error("directive is not a string")]
    NotAString,

    #[error("directive is empty")]
    Empty,

    #[error("unknown operator in '{0}'")]
    UnknownOperator(String),

    #[error("'{arrow}' is not valid for {role} directives")]
    ArrowNotAllowed { role: Role, arrow: &'static str },

    #[error("'{0}' is not a valid name")]
    InvalidName(String),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Arrow {
    Forward,
    Backward,
}

/// Compile one raw configuration entry for a role.
pub fn compile(raw: &Value, role: Role) -> Result<Binding, ParseSkip> {
    match raw {
        Value::String(text) => parse(text, role),
        _ => Err(ParseSkip::NotAString),
    }
}

/// Parse directive text for a role.
pub fn parse(text: &str, role: Role) -> Result<Binding, ParseSkip> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ParseSkip::Empty);
    }

    let (pre, rest) = match text.split_once(']') {
        Some((hook, rest)) => (Some(name(hook)?), rest),
        None => (None, text),
    };
    let (body, post) = match rest.rsplit_once('[') {
        Some((body, hook)) => (body, Some(name(hook)?)),
        None => (rest, None),
    };

    let forward = body.matches(FORWARD).count();
    let backward = body.matches(BACKWARD).count();
    let (lhs, rhs, arrow) = match (forward, backward) {
        (0, 0) => (body, None, None),
        (1, 0) => split_arrow(body, FORWARD, Arrow::Forward),
        (0, 1) => split_arrow(body, BACKWARD, Arrow::Backward),
        _ => return Err(ParseSkip::UnknownOperator(text.to_owned())),
    };
    if lhs.contains(OPERATOR_CHARS) || rhs.is_some_and(|r| r.contains(OPERATOR_CHARS)) {
        return Err(ParseSkip::UnknownOperator(text.to_owned()));
    }

    match (role, arrow) {
        (Role::Emitter | Role::Listener, Some(Arrow::Backward)) => {
            return Err(ParseSkip::ArrowNotAllowed { role, arrow: BACKWARD });
        }
        (Role::EmitBack, Some(Arrow::Forward)) => {
            return Err(ParseSkip::ArrowNotAllowed { role, arrow: FORWARD });
        }
        _ => {}
    }

    let (action, source, target) = match role {
        Role::Emitter => {
            let (action, extra) = split_plus(lhs, text)?;
            (action, extra, rhs.map(name).transpose()?)
        }
        Role::Listener => {
            // `+` has no meaning for inbound events.
            let (action, _) = split_plus(lhs, text)?;
            (action, None, rhs.map(name).transpose()?)
        }
        Role::EmitBack => (name(lhs)?, rhs.map(name).transpose()?, None),
    };

    Ok(Binding {
        role,
        action,
        source,
        target,
        pre,
        post,
    })
}

fn split_arrow<'a>(body: &'a str, arrow: &str, kind: Arrow) -> (&'a str, Option<&'a str>, Option<Arrow>) {
    match body.split_once(arrow) {
        Some((lhs, rhs)) => (lhs, Some(rhs), Some(kind)),
        None => (body, None, None),
    }
}

fn split_plus(lhs: &str, text: &str) -> Result<(String, Option<String>), ParseSkip> {
    let mut parts = lhs.split('+');
    let action = name(parts.next().unwrap_or_default())?;
    let extra = parts.next().map(name).transpose()?;
    if parts.next().is_some() {
        return Err(ParseSkip::UnknownOperator(text.to_owned()));
    }
    Ok((action, extra))
}

fn name(raw: &str) -> Result<String, ParseSkip> {
    let trimmed = raw.trim();
    let valid = !trimmed.is_empty()
        && !trimmed
            .chars()
            .any(|c| c.is_whitespace() || c == '+' || OPERATOR_CHARS.contains(&c));
    if valid {
        Ok(trimmed.to_owned())
    } else {
        Err(ParseSkip::InvalidName(trimmed.to_owned()))
    }
}
