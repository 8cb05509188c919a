use crate::tokengate::pg::protocol::MessageReader;
use crate::tokengate::{Error, Result};

/// The name/value parameters carried in a startup message, in wire order.
#[derive(Clone, Debug, Default)]
pub struct StartupParams {
    params: Vec<(String, String)>,
}

impl StartupParams {
    pub fn new() -> Self {
        Self { params: Vec::new() }
    }

    /// Parse the parameter section of a startup message body (everything
    /// after the 4-byte protocol version): alternating null-terminated
    /// name/value strings, terminated by an empty name.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let mut params = Self::new();
        let mut r = MessageReader::new(body);
        loop {
            let key = r.read_str()?;
            if key.is_empty() {
                break;
            }
            let value = r
                .read_str()
                .map_err(|_| Error::protocol_error(format!("startup parameter {} has no value", key)))?;
            params.add(key, value);
        }
        Ok(params)
    }

    pub fn add(&mut self, k: &str, v: &str) {
        if let Some(entry) = self.params.iter_mut().find(|(name, _)| name == k) {
            entry.1 = v.to_string();
        } else {
            self.params.push((k.to_string(), v.to_string()));
        }
    }

    pub fn get(&self, k: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(name, _)| name == k)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}
