//! Parser for the terse function-call protocol emitted by the model.
//!
//! Two call-site dialects appear in practice:
//!
//! ```text
//! call:open_app{app_name:<escape>notepad<escape>,level:5}
//! <start_function_call>call:type_text{text:<escape>Hello<escape>}<end_function_call>
//! ```
//!
//! Text carrying `<start_function_call>` is read with the tagged multi-call
//! grammar; anything else falls back to the first bracketed call. A miss is
//! never an error: it yields no calls.

use std::fmt::Write as _;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::value::{coerce, Arguments, Value};

pub const START_FUNCTION_CALL: &str = "<start_function_call>";
pub const END_FUNCTION_CALL: &str = "<end_function_call>";
pub const ESCAPE: &str = "<escape>";

static TAGGED_CALL: Lazy<Regex> = Lazy::new(|| {
    // The body may hold `<` only as part of `<escape>`, so an unterminated span
    // cannot swallow the next one.
    Regex::new(r"(?s)<start_function_call>call:(\w+)\{((?:[^<]|<escape>)*?)\}<end_function_call>")
        .expect("tagged call pattern")
});

static TAGGED_ARGUMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\w+):(?:<escape>([^<]*)<escape>|([^,}]*))").expect("tagged argument pattern")
});

static BRACKETED_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"call:(\w+)\{(.*?)\}").expect("bracketed call pattern"));

static ESCAPED_ARGUMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\w+):<escape>([^<]+)<escape>").expect("escaped argument pattern"));

static DIGIT_ARGUMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\w+):(\d+)").expect("digit argument pattern"));

static CALL_OPENER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"call:\w+\{").expect("call opener pattern"));

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\w+$").expect("identifier pattern"));

/// A call that cannot be written in the tagged dialect without changing
/// what the parser reads back.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("'{0}' is not a valid call or argument name")]
    InvalidIdentifier(String),
    #[error("argument {key} contains '<', which the escape syntax cannot carry")]
    UnescapableText { key: String },
}

/// One structured call extracted from model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: Arguments,
}

impl FunctionCall {
    pub fn new(name: impl Into<String>, arguments: Arguments) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// Renders the call in the tagged dialect. Strings are escaped, other
    /// values are written bare; both use the canonical [`Value`] text, so
    /// [`parse`] reads back an equal call.
    pub fn to_protocol(&self) -> Result<String, ProtocolError> {
        if !IDENTIFIER.is_match(&self.name) {
            return Err(ProtocolError::InvalidIdentifier(self.name.clone()));
        }
        let mut out = format!("{START_FUNCTION_CALL}call:{}{{", self.name);
        for (idx, (key, value)) in self.arguments.iter().enumerate() {
            if !IDENTIFIER.is_match(key) {
                return Err(ProtocolError::InvalidIdentifier(key.to_string()));
            }
            if idx > 0 {
                out.push(',');
            }
            match value {
                Value::String(text) if text.contains('<') => {
                    return Err(ProtocolError::UnescapableText {
                        key: key.to_string(),
                    });
                }
                Value::String(_) => {
                    let _ = write!(out, "{key}:{ESCAPE}{value}{ESCAPE}");
                }
                other => {
                    let _ = write!(out, "{key}:{other}");
                }
            }
        }
        out.push('}');
        out.push_str(END_FUNCTION_CALL);
        Ok(out)
    }
}

/// Extracts every call in `text`, in textual order.
pub fn parse(text: &str) -> Vec<FunctionCall> {
    if text.contains(START_FUNCTION_CALL) {
        parse_tagged(text)
    } else {
        parse_bracketed(text).into_iter().collect()
    }
}

/// Whether `text` carries anything that looks like the start of a call.
pub fn contains_call_marker(text: &str) -> bool {
    text.contains(START_FUNCTION_CALL) || CALL_OPENER.is_match(text)
}

fn parse_tagged(text: &str) -> Vec<FunctionCall> {
    TAGGED_CALL
        .captures_iter(text)
        .map(|caps| {
            let mut arguments = Arguments::new();
            for arg in TAGGED_ARGUMENT.captures_iter(&caps[2]) {
                let raw = arg
                    .get(2)
                    .or_else(|| arg.get(3))
                    .map(|m| m.as_str())
                    .unwrap_or_default();
                arguments.insert_first(&arg[1], coerce(raw));
            }
            FunctionCall::new(&caps[1], arguments)
        })
        .collect()
}

fn parse_bracketed(text: &str) -> Option<FunctionCall> {
    let caps = BRACKETED_CALL.captures(text)?;
    let body = &caps[2];
    let mut arguments = Arguments::new();

    for arg in ESCAPED_ARGUMENT.captures_iter(body) {
        arguments.insert_first(&arg[1], Value::String(arg[2].trim().to_string()));
    }
    // Only keys the escaped pass left untouched; digits inside an escaped
    // value must not clobber it.
    for arg in DIGIT_ARGUMENT.captures_iter(body) {
        if arguments.contains_key(&arg[1]) {
            continue;
        }
        let value = match arg[2].parse::<i64>() {
            Ok(number) => Value::Integer(number),
            Err(_) => coerce(&arg[2]),
        };
        arguments.insert_first(&arg[1], value);
    }

    Some(FunctionCall::new(&caps[1], arguments))
}
