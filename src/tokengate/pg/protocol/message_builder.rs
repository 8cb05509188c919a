use bytes::{BufMut, Bytes, BytesMut};

use crate::tokengate::pg::protocol::{StartupParams, Tag};

/// Builds framed Postgres wire protocol messages. Multiple messages can be
/// appended with add_new and sent as one write.
pub struct MessageBuilder {
    data: BytesMut,
    start: usize, // start position of the message currently being built
}

impl MessageBuilder {
    pub fn new(tag: Tag) -> Self {
        let mut builder = MessageBuilder {
            data: BytesMut::with_capacity(256), // typically we build short messages
            start: 0,
        };
        builder.add_new(tag);
        builder
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Complete the current message and return the whole batch as one buffer.
    pub fn finish(mut self) -> Bytes {
        self.complete_message();
        self.data.freeze()
    }

    /// Complete the current message and start a new one with the given tag.
    pub fn add_new(&mut self, tag: Tag) {
        let len = self.len();
        if len != 0 {
            self.complete_message();
            self.start = len;
        }
        if tag != Tag::UNTAGGED {
            self.data.put_u8(tag.as_u8());
        }
        self.data.put_i32(0); // length placeholder, patched in complete_message
    }

    fn complete_message(&mut self) {
        let mut len = self.len() - self.start;
        // An untagged message starts with the zeroed length placeholder,
        // a tagged one with its (non-zero) tag byte.
        let pos = if self.data[self.start] == 0 {
            self.start
        } else {
            len -= 1;
            self.start + 1
        };
        assert!(len >= 4, "message too short");
        self.data[pos..pos + 4].copy_from_slice(&(len as u32).to_be_bytes());
    }

    pub fn write_byte(&mut self, b: u8) {
        self.data.put_u8(b);
    }

    pub fn write_str(&mut self, s: &str) {
        self.write_bytes(s.as_bytes());
        self.write_byte(0);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn write_i32(&mut self, i: i32) {
        self.data.put_i32(i);
    }

    pub fn write_params(&mut self, params: &StartupParams) {
        for (k, v) in params.iter() {
            self.write_str(k);
            self.write_str(v);
        }
    }
}
