use serde::{Serialize, Serializer};
use std::fmt;

/// Wraps customer contact details so that log macros only ever print a
/// redacted form. Serialization is unaffected because API responses need
/// the real value.
#[derive(Clone)]
pub struct Masked<T>(pub T);

const VISIBLE_SUFFIX: usize = 2;

fn redact(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= VISIBLE_SUFFIX * 2 {
        return "*".repeat(chars.len().max(4));
    }
    let tail: String = chars[chars.len() - VISIBLE_SUFFIX..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - VISIBLE_SUFFIX), tail)
}

impl<T: AsRef<str>> fmt::Debug for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", redact(self.0.as_ref()))
    }
}

impl<T: AsRef<str>> fmt::Display for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&redact(self.0.as_ref()))
    }
}

impl<T: Serialize> Serialize for Masked<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}
