use crate::error::Result;
use crate::traits::BlockSource;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemorySource {
    data: Vec<u8>,
}

impl MemorySource {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl From<Vec<u8>> for MemorySource {
    fn from(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl From<&[u8]> for MemorySource {
    fn from(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
        }
    }
}

impl From<String> for MemorySource {
    fn from(text: String) -> Self {
        Self {
            data: text.into_bytes(),
        }
    }
}

impl From<&str> for MemorySource {
    fn from(text: &str) -> Self {
        Self {
            data: text.as_bytes().to_vec(),
        }
    }
}

impl BlockSource for MemorySource {
    fn read_chunk(&mut self, offset: u64, buffer: &mut [u8]) -> Result<usize> {
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        if start >= self.data.len() {
            return Ok(0);
        }
        let len = buffer.len().min(self.data.len() - start);
        buffer[..len].copy_from_slice(&self.data[start..start + len]);
        Ok(len)
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_and_bytes_normalize_to_same_source() {
        let from_text = MemorySource::from("EFI PART");
        let from_bytes = MemorySource::from(b"EFI PART".as_slice());
        assert_eq!(from_text, from_bytes);
        assert_eq!(from_text.size(), 8);
    }

    #[test]
    fn test_read_chunk_past_end() {
        let mut source = MemorySource::from(vec![1u8, 2, 3, 4, 5]);

        let mut buffer = [0u8; 4];
        assert_eq!(source.read_chunk(3, &mut buffer).unwrap(), 2);
        assert_eq!(&buffer[..2], &[4, 5]);

        assert_eq!(source.read_chunk(5, &mut buffer).unwrap(), 0);
        assert_eq!(source.read_chunk(u64::MAX, &mut buffer).unwrap(), 0);
    }
}
