use conduit_core::{Carrier, CarrierError};
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};

/// AMQP short strings are length-prefixed by a single byte.
pub const MAX_KEY_LEN: usize = 255;

/// Message headers as an AMQP field table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AmqpHeaders(FieldTable);

impl AmqpHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// String value stored under `key`.
    pub fn get(&self, key: &str) -> Option<String> {
        match self.0.inner().get(&ShortString::from(key.to_string()))? {
            AMQPValue::LongString(value) => {
                Some(String::from_utf8_lossy(value.as_bytes()).into_owned())
            }
            AMQPValue::ShortString(value) => Some(value.as_str().to_string()),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.0.inner().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.inner().is_empty()
    }

    pub fn into_inner(self) -> FieldTable {
        self.0
    }

    /// `base` with these headers written over it.
    pub fn merged_over(self, base: Option<&FieldTable>) -> FieldTable {
        let Some(base) = base else {
            return self.0;
        };
        let mut merged = base.clone();
        for (key, value) in self.0.inner() {
            merged.insert(key.clone(), value.clone());
        }
        merged
    }
}

impl From<FieldTable> for AmqpHeaders {
    fn from(table: FieldTable) -> Self {
        Self(table)
    }
}

impl Carrier for AmqpHeaders {
    fn set(&mut self, key: &str, value: String) -> Result<(), CarrierError> {
        if key.is_empty() {
            return Err(CarrierError::new(key, "header key is empty"));
        }
        if key.len() > MAX_KEY_LEN {
            return Err(CarrierError::new(
                key,
                format!("header key exceeds {MAX_KEY_LEN} bytes"),
            ));
        }
        self.0.insert(
            ShortString::from(key.to_string()),
            AMQPValue::LongString(LongString::from(value)),
        );
        Ok(())
    }
}
