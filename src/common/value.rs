use std::fmt;

use serde::{Deserialize, Serialize};

/// A register or consensus value. The undefined value is the initial bottom
/// value and is never decided or returned to the application.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Value {
    defined: bool,
    payload: Vec<u8>,
}

impl Value {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Value {
            defined: true,
            payload: payload.into(),
        }
    }

    pub fn undefined() -> Self {
        Value::default()
    }

    pub fn is_defined(&self) -> bool {
        self.defined
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.defined.then_some(self.payload.as_slice())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.payload() {
            Some(bytes) => write!(f, "{:?}", String::from_utf8_lossy(bytes)),
            None => f.write_str("⊥"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::new(s.as_bytes())
    }
}
