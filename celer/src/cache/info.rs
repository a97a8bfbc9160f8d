use faststr::FastStr;

use super::strategy::CacheInfo;

/// Minimal entry projection: a key and the size of the entry's data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheInfoWithDataSize {
    key: FastStr,
    data_size: u64,
}

impl CacheInfoWithDataSize {
    pub fn new(key: impl Into<FastStr>, data_size: u64) -> Self {
        Self {
            key: key.into(),
            data_size,
        }
    }

    pub fn set_data_size(&mut self, data_size: u64) {
        self.data_size = data_size;
    }
}

impl CacheInfo for CacheInfoWithDataSize {
    fn key(&self) -> &FastStr {
        &self.key
    }

    fn data_size(&self) -> u64 {
        self.data_size
    }
}
