use crate::root::LogicalRoot;
use serde::Serialize;
use std::fmt;
use std::fmt::Write as _;

/// Raw content of a registry value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ValueData {
    Absent,
    Int32(i32),
    Int64(i64),
    Bytes(Vec<u8>),
    Text(String),
    TextSequence(Vec<String>),
}

impl ValueData {
    /// String form used in manifests and logs.
    ///
    /// Binary data renders as uppercase hex pairs. Multi-string elements are
    /// concatenated without a separator, so the result cannot be split back.
    pub fn to_display_string(&self) -> String {
        match self {
            ValueData::Absent => String::new(),
            ValueData::Int32(value) => value.to_string(),
            ValueData::Int64(value) => value.to_string(),
            ValueData::Bytes(bytes) => {
                let mut hex = String::with_capacity(bytes.len() * 2);
                for byte in bytes {
                    let _ = write!(hex, "{byte:02X}");
                }
                hex
            }
            ValueData::Text(text) => text.clone(),
            ValueData::TextSequence(items) => items.concat(),
        }
    }
}

/// One captured key/value observation.
///
/// `value_name == None` together with `ValueData::Absent` marks an empty leaf
/// key (no subkeys, no values).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RegistryValue {
    pub root: LogicalRoot,
    pub key_name: String,
    pub value_name: Option<String>,
    pub value: ValueData,
}

impl RegistryValue {
    pub fn new(root: LogicalRoot, key_name: &str, value_name: &str, value: ValueData) -> Self {
        Self {
            root,
            key_name: key_name.to_string(),
            value_name: Some(value_name.to_string()),
            value,
        }
    }

    pub fn empty_key(root: LogicalRoot, key_name: &str) -> Self {
        Self {
            root,
            key_name: key_name.to_string(),
            value_name: None,
            value: ValueData::Absent,
        }
    }

    pub fn is_empty_key_marker(&self) -> bool {
        self.value_name.is_none() && self.value == ValueData::Absent
    }
}

impl fmt::Display for RegistryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Root: {}, KeyName: {}, Value Name: {}, Value: {}",
            self.root,
            self.key_name,
            self.value_name.as_deref().unwrap_or(""),
            self.value.to_display_string()
        )
    }
}
