// bpf-vm/src/memory.rs

use crate::error::BpfError;

/// Default memory region size (1 MiB)
pub const MAX_MEMORY: usize = 1024 * 1024;

/// Bounded, zero-initialised linear memory shared by both interpreters
///
/// Backing storage grows lazily up to `limit`; bytes never written read as
/// zero. Every access is checked against `limit` before it happens.
#[derive(Debug, Clone)]
pub struct Memory {
    data: Vec<u8>,
    limit: usize,
}

impl Memory {
    pub fn new(limit: usize) -> Self {
        Self {
            data: Vec::new(),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Highest byte touched so far (exclusive)
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Validate `[address, address + len)` against the limit
    pub fn check(&self, address: u64, len: u64) -> Result<(usize, usize), BpfError> {
        let end = address
            .checked_add(len)
            .filter(|end| *end <= self.limit as u64)
            .ok_or_else(|| BpfError::out_of_bounds(address, len, self.limit as u64))?;
        Ok((address as usize, end as usize))
    }

    fn grow(&mut self, end: usize) {
        if self.data.len() < end {
            self.data.resize(end, 0);
        }
    }

    /// Make `[address, address + len)` part of the touched region
    pub fn touch(&mut self, address: u64, len: u64) -> Result<(), BpfError> {
        if len == 0 {
            return Ok(());
        }
        let (_, end) = self.check(address, len)?;
        self.grow(end);
        Ok(())
    }

    pub fn read(&self, address: u64, len: u64) -> Result<Vec<u8>, BpfError> {
        let (start, end) = self.check(address, len)?;
        let mut out = vec![0u8; end - start];
        if start < self.data.len() {
            let available = end.min(self.data.len());
            out[..available - start].copy_from_slice(&self.data[start..available]);
        }
        Ok(out)
    }

    pub fn write(&mut self, address: u64, bytes: &[u8]) -> Result<(), BpfError> {
        if bytes.is_empty() {
            return Ok(());
        }
        let (start, end) = self.check(address, bytes.len() as u64)?;
        self.grow(end);
        self.data[start..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Little-endian load of 1, 2, 4 or 8 bytes, zero-extended
    pub fn load(&self, address: u64, size: usize) -> Result<u64, BpfError> {
        let bytes = self.read(address, size as u64)?;
        let mut word = [0u8; 8];
        word[..size].copy_from_slice(&bytes);
        Ok(u64::from_le_bytes(word))
    }

    /// Little-endian store of the low `size` bytes of `value`
    pub fn store(&mut self, address: u64, size: usize, value: u64) -> Result<(), BpfError> {
        let bytes = value.to_le_bytes();
        self.write(address, &bytes[..size])
    }

    pub fn read_word(&self, address: u64) -> Result<[u8; 32], BpfError> {
        let bytes = self.read(address, 32)?;
        let mut word = [0u8; 32];
        word.copy_from_slice(&bytes);
        Ok(word)
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new(MAX_MEMORY)
    }
}
