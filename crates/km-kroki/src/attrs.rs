//! Info-string attribute parsing.
//!
//! Attributes follow the diagram marker in a fenced block's info string:
//!
//! ```text
//! ```kroki {lang=graphviz, title="Build graph"}
//! ```kroki lang=plantuml
//! ```
//!
//! When braces are present the text between the first `{` and the last `}` is
//! parsed; otherwise the whole remainder is. Tokens are `key=value`,
//! `key="quoted value"`, `key='quoted value'`, or a bare `key` (value
//! `"true"`), separated by whitespace or commas.

use std::collections::HashMap;
use std::iter::Peekable;
use std::str::CharIndices;

use crate::consts::LANG_ATTRIBUTE;

/// Error parsing block attributes.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AttributeParseError {
    /// `{` without a `}` after it.
    #[error("unbalanced braces in attributes: {0}")]
    UnbalancedBrace(String),
    /// A quoted value ran to the end of the input.
    #[error("unterminated quote in value of '{0}'")]
    UnterminatedQuote(String),
    /// `=value` with nothing before the `=`.
    #[error("attribute with empty key at offset {0}")]
    EmptyKey(usize),
}

/// Attributes declared on a kroki block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockAttributes {
    values: HashMap<String, String>,
}

impl BlockAttributes {
    /// Value of attribute `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Diagram type selected by the `lang` attribute, if non-empty.
    #[must_use]
    pub fn lang(&self) -> Option<&str> {
        self.get(LANG_ATTRIBUTE).filter(|lang| !lang.is_empty())
    }

    /// Number of attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no attributes were declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Parse attributes from the info string remainder after the marker.
///
/// # Errors
///
/// Returns [`AttributeParseError`] for unbalanced braces, unterminated
/// quotes, or empty keys. Callers treat a failure as "no attributes".
pub fn parse_info_attributes(rest: &str) -> Result<BlockAttributes, AttributeParseError> {
    let body = match (rest.find('{'), rest.rfind('}')) {
        (Some(open), Some(close)) if open < close => &rest[open + 1..close],
        // Without an opening brace the whole remainder is plain attributes
        (None, _) => rest,
        _ => return Err(AttributeParseError::UnbalancedBrace(rest.to_owned())),
    };
    parse_pairs(body)
}

fn is_separator(c: char) -> bool {
    c.is_whitespace() || c == ',' || c == '}'
}

fn parse_pairs(body: &str) -> Result<BlockAttributes, AttributeParseError> {
    let mut values = HashMap::new();
    let mut chars = body.char_indices().peekable();

    loop {
        while chars.next_if(|&(_, c)| is_separator(c)).is_some() {}
        let Some(&(start, _)) = chars.peek() else {
            break;
        };

        let mut key = String::new();
        while let Some((_, c)) = chars.next_if(|&(_, c)| c != '=' && !is_separator(c)) {
            key.push(c);
        }
        if key.is_empty() {
            return Err(AttributeParseError::EmptyKey(start));
        }

        let value = if chars.next_if(|&(_, c)| c == '=').is_some() {
            parse_value(&mut chars, &key)?
        } else {
            "true".to_owned()
        };
        values.insert(key, value);
    }

    Ok(BlockAttributes { values })
}

fn parse_value(
    chars: &mut Peekable<CharIndices<'_>>,
    key: &str,
) -> Result<String, AttributeParseError> {
    let mut value = String::new();
    if let Some((_, quote)) = chars.next_if(|&(_, c)| c == '"' || c == '\'') {
        loop {
            match chars.next() {
                Some((_, c)) if c == quote => return Ok(value),
                Some((_, c)) => value.push(c),
                None => return Err(AttributeParseError::UnterminatedQuote(key.to_owned())),
            }
        }
    }
    while let Some((_, c)) = chars.next_if(|&(_, c)| !is_separator(c)) {
        value.push(c);
    }
    Ok(value)
}
