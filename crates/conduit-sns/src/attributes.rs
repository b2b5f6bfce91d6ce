use std::collections::HashMap;

use aws_sdk_sns::types::MessageAttributeValue;
use conduit_core::{Carrier, CarrierError};

/// SNS accepts at most this many attributes per message.
pub const MAX_ATTRIBUTES: usize = 10;

const MAX_NAME_LEN: usize = 256;
const STRING_TYPE: &str = "String";

/// Message attributes of an SNS publish request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes(HashMap<String, MessageAttributeValue>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// String value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.string_value())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> HashMap<String, MessageAttributeValue> {
        self.0
    }
}

fn validate_name(key: &str) -> Result<(), &'static str> {
    if key.is_empty() || key.len() > MAX_NAME_LEN {
        return Err("attribute name must be 1 to 256 characters");
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err("attribute name may only contain alphanumerics, '-', '_' and '.'");
    }
    if key.starts_with('.') || key.ends_with('.') || key.contains("..") {
        return Err("attribute name has a misplaced '.'");
    }
    let lower = key.to_ascii_lowercase();
    if lower.starts_with("aws.") || lower.starts_with("amazon.") {
        return Err("attribute name uses a reserved prefix");
    }
    Ok(())
}

impl Carrier for Attributes {
    fn set(&mut self, key: &str, value: String) -> Result<(), CarrierError> {
        validate_name(key).map_err(|reason| CarrierError::new(key, reason))?;
        if !self.0.contains_key(key) && self.0.len() >= MAX_ATTRIBUTES {
            return Err(CarrierError::new(
                key,
                format!("message already has {MAX_ATTRIBUTES} attributes"),
            ));
        }
        let attribute = MessageAttributeValue::builder()
            .data_type(STRING_TYPE)
            .string_value(value)
            .build()
            .map_err(|e| CarrierError::new(key, e.to_string()))?;
        self.0.insert(key.to_string(), attribute);
        Ok(())
    }
}
