use std::collections::HashSet;

use serde_json::{Number, Value};

/// Conservative conversion of string values that look like booleans or numbers.
///
/// Non-strings, blank strings and anything with a sign, exponent or
/// surrounding text are returned unchanged.
pub fn smart_cast(value: &Value) -> Value {
    let Value::String(raw) = value else {
        return value.clone();
    };
    let text = raw.trim();
    if text.is_empty() {
        return value.clone();
    }

    if text.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if text.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }

    if text.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(int) = text.parse::<u64>() {
            return Value::Number(Number::from(int));
        }
        return value.clone();
    }

    if is_simple_decimal(text) {
        if let Some(number) = text.parse::<f64>().ok().and_then(Number::from_f64) {
            return Value::Number(number);
        }
    }

    value.clone()
}

/// `12.5`, `12.` or `.5`: one dot, digits only, at least one digit.
fn is_simple_decimal(text: &str) -> bool {
    let Some((whole, fraction)) = text.split_once('.') else {
        return false;
    };
    let digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    digits(whole) && digits(fraction) && !(whole.is_empty() && fraction.is_empty())
}

/// Which connections get their incoming values cast.
#[derive(Debug, Clone, Default)]
pub struct CastPolicy {
    all: bool,
    connections: HashSet<String>,
}

impl CastPolicy {
    pub fn applies_to(&self, connection: &str) -> bool {
        self.all || self.connections.contains(connection)
    }

    /// An empty list enables casting for every connection.
    pub fn enable<S: AsRef<str>>(&mut self, connections: &[S]) {
        if connections.is_empty() {
            self.all = true;
            return;
        }
        self.connections
            .extend(connections.iter().map(|c| c.as_ref().to_string()));
    }

    pub fn casts_everything(&self) -> bool {
        self.all
    }
}

#[cfg(test)]
#[path = "tests/cast_tests.rs"]
mod tests;
