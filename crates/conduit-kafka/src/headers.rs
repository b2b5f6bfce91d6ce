use conduit_core::{Carrier, CarrierError};
use rdkafka::message::{Header, OwnedHeaders};

/// Record headers, kept as ordered key/value pairs until the record is built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KafkaHeaders(Vec<(String, String)>);

impl KafkaHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn to_owned_headers(&self) -> OwnedHeaders {
        self.0
            .iter()
            .fold(OwnedHeaders::new_with_capacity(self.0.len()), |headers, (key, value)| {
                headers.insert(Header {
                    key: key.as_str(),
                    value: Some(value.as_str()),
                })
            })
    }
}

impl Carrier for KafkaHeaders {
    fn set(&mut self, key: &str, value: String) -> Result<(), CarrierError> {
        if key.is_empty() {
            return Err(CarrierError::new(key, "header key is empty"));
        }
        match self.0.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing = value,
            None => self.0.push((key.to_string(), value)),
        }
        Ok(())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for KafkaHeaders {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
