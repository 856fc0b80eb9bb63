//! Flat little-endian byte memory shared by the IR interpreter and the
//! machine simulator, so both see globals at the same addresses.

use std::collections::BTreeMap;
use thiserror::Error;

pub const DEFAULT_MEMORY_SIZE: usize = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{size}-byte access at {addr:#x} is out of bounds")]
pub struct MemoryFault {
    pub addr: u64,
    pub size: u32,
}

#[derive(Debug, Clone)]
pub struct Memory {
    bytes: Vec<u8>,
    /// Addresses bound to relocation tokens.
    symbols: BTreeMap<String, u64>,
}

impl Default for Memory {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_SIZE)
    }
}

impl Memory {
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![0; size],
            symbols: BTreeMap::new(),
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn range(&self, addr: u64, size: u32) -> Result<std::ops::Range<usize>, MemoryFault> {
        let fault = MemoryFault { addr, size };
        let end = addr.checked_add(size as u64).ok_or(fault)?;
        if end > self.size() {
            return Err(fault);
        }
        Ok(addr as usize..end as usize)
    }

    /// Read 4 (sign-extended) or 8 bytes.
    pub fn load(&self, addr: u64, size: u32) -> Result<i64, MemoryFault> {
        let range = self.range(addr, size)?;
        let bytes = &self.bytes[range];
        let value = match size {
            4 => {
                let mut b = [0u8; 4];
                b.copy_from_slice(bytes);
                i32::from_le_bytes(b) as i64
            }
            _ => {
                let mut b = [0u8; 8];
                b.copy_from_slice(bytes);
                i64::from_le_bytes(b)
            }
        };
        Ok(value)
    }

    /// Write the low 4 or all 8 bytes of `value`.
    pub fn store(&mut self, addr: u64, size: u32, value: i64) -> Result<(), MemoryFault> {
        let range = self.range(addr, size)?;
        let le = value.to_le_bytes();
        self.bytes[range].copy_from_slice(&le[..size as usize]);
        Ok(())
    }

    pub fn bind_symbol(&mut self, token: &str, addr: u64) {
        self.symbols.insert(token.to_string(), addr);
    }

    pub fn symbol(&self, token: &str) -> Option<u64> {
        self.symbols.get(token).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_loads_sign_extend() {
        let mut m = Memory::new(64);
        m.store(8, 4, -5).unwrap();
        assert_eq!(m.load(8, 4).unwrap(), -5);
        assert_eq!(m.load(8, 8).unwrap(), 0xFFFF_FFFB);
    }

    #[test]
    fn out_of_bounds_faults() {
        let m = Memory::new(16);
        assert_eq!(m.load(12, 8), Err(MemoryFault { addr: 12, size: 8 }));
        assert!(m.load(u64::MAX, 8).is_err());
    }
}
