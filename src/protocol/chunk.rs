use crate::error::ProtocolError;

/// Split `text` into pieces of `size` characters.
///
/// The returned value is lazy and restartable: every call to
/// [`MessageChunks::iter`] walks the text from the start again. Pieces never
/// split a UTF-8 code point; the last one may be shorter.
pub fn chunk_message(text: &str, size: usize) -> Result<MessageChunks<'_>, ProtocolError> {
    if size == 0 {
        return Err(ProtocolError::InvalidChunkSize);
    }
    Ok(MessageChunks { text, size })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageChunks<'a> {
    text: &'a str,
    size: usize,
}

impl<'a> MessageChunks<'a> {
    pub fn iter(&self) -> ChunkIter<'a> {
        ChunkIter {
            rest: self.text,
            size: self.size,
        }
    }

    /// Number of chunks without walking them
    pub fn count(&self) -> usize {
        self.text.chars().count().div_ceil(self.size)
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

impl<'a> IntoIterator for MessageChunks<'a> {
    type Item = &'a str;
    type IntoIter = ChunkIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a> IntoIterator for &MessageChunks<'a> {
    type Item = &'a str;
    type IntoIter = ChunkIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[derive(Debug, Clone)]
pub struct ChunkIter<'a> {
    rest: &'a str,
    size: usize,
}

impl<'a> Iterator for ChunkIter<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }

        let split = self
            .rest
            .char_indices()
            .nth(self.size)
            .map(|(idx, _)| idx)
            .unwrap_or(self.rest.len());

        let (head, tail) = self.rest.split_at(split);
        self.rest = tail;
        Some(head)
    }
}
