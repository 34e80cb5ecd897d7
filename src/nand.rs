//! # NAND Medium Model
//!
//! This module models the physical NAND flash array: an ordered sequence of
//! erase blocks, each holding a fixed number of pages. It enforces the two
//! constraints that shape everything built on top of it:
//!
//! 1. **One-way programming.** A program operation can only move bits from 1
//!    to 0. For every byte the stored value after a program is `old & input`;
//!    a program that would require any 0 -> 1 transition is rejected whole.
//! 2. **Block-granularity erase.** The only way to restore bits to 1 is to
//!    erase an entire block, which resets every data and OOB byte to 0xFF and
//!    increments the block's erase counter.
//!
//! ## Geometry
//!
//! ```text
//! Page   = 4096 data bytes + 64 OOB (spare) bytes
//! Block  = 64 pages, smallest erasable unit
//! Chip   = N blocks, N fixed at construction
//! ```
//!
//! The OOB region carries no semantics at this layer; the translation layer
//! above uses its first bytes for mapping metadata.
//!
//! ## Failure Model
//!
//! Every operation is total, synchronous and deterministic. Geometry
//! violations and undersized buffers report `InvalidAddress`; a rejected
//! program reports `WriteError` and leaves the page untouched (the physics
//! check runs over the full input before any byte is committed). There is no
//! I/O latency at this layer; timing lives in the controller.

use std::fmt;

/// Payload bytes per page.
pub const PAGE_DATA_SIZE: usize = 4096;

/// Spare (out-of-band) bytes per page.
pub const OOB_SIZE: usize = 64;

/// Pages per erase block.
pub const PAGES_PER_BLOCK: usize = 64;

/// Failure codes for medium operations. `Ok(())` is the success case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NandError {
    /// A program would require a 0 -> 1 bit transition without an erase.
    WriteError,
    /// Block or page index outside the chip geometry, or an undersized
    /// caller buffer.
    InvalidAddress,
}

impl fmt::Display for NandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NandError::WriteError => write!(f, "program rejected: 0 -> 1 transition requires erase"),
            NandError::InvalidAddress => write!(f, "address outside chip geometry or buffer too small"),
        }
    }
}

impl std::error::Error for NandError {}

pub type NandResult<T> = Result<T, NandError>;

/// One page: data region plus spare region, both erased to 0xFF.
struct Page {
    data: [u8; PAGE_DATA_SIZE],
    oob: [u8; OOB_SIZE],
}

impl Page {
    fn new() -> Self {
        Self {
            data: [0xFF; PAGE_DATA_SIZE],
            oob: [0xFF; OOB_SIZE],
        }
    }
}

/// One erase block: pages, wear counter, factory bad marker.
struct Block {
    pages: Vec<Page>,
    erase_count: u32,
    is_bad: bool,
}

impl Block {
    fn new() -> Self {
        Self {
            pages: (0..PAGES_PER_BLOCK).map(|_| Page::new()).collect(),
            erase_count: 0,
            is_bad: false,
        }
    }

    fn erase(&mut self) {
        for page in &mut self.pages {
            page.data.fill(0xFF);
            page.oob.fill(0xFF);
        }
        self.erase_count += 1;
    }
}

/// The NAND chip: an ordered array of erase blocks addressed by
/// `(block, page)`.
pub struct NandChip {
    blocks: Vec<Block>,
}

impl NandChip {
    /// Creates a chip of `num_blocks` erased blocks.
    pub fn new(num_blocks: usize) -> Self {
        Self {
            blocks: (0..num_blocks).map(|_| Block::new()).collect(),
        }
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Erase counter of a block, if the index is in range.
    pub fn erase_count(&self, block: usize) -> Option<u32> {
        self.blocks.get(block).map(|b| b.erase_count)
    }

    /// Factory bad marker of a block, if the index is in range.
    pub fn is_bad(&self, block: usize) -> Option<bool> {
        self.blocks.get(block).map(|b| b.is_bad)
    }

    /// Reads a page into `data` and, when requested, its spare region into
    /// `oob`. Both buffers must cover their full region.
    pub fn read_page(
        &self,
        block: usize,
        page: usize,
        data: &mut [u8],
        oob: Option<&mut [u8]>,
    ) -> NandResult<()> {
        if block >= self.blocks.len() || page >= PAGES_PER_BLOCK {
            return Err(NandError::InvalidAddress);
        }
        if data.len() < PAGE_DATA_SIZE {
            return Err(NandError::InvalidAddress);
        }
        if let Some(ref oob) = oob {
            if oob.len() < OOB_SIZE {
                return Err(NandError::InvalidAddress);
            }
        }

        let src = &self.blocks[block].pages[page];
        data[..PAGE_DATA_SIZE].copy_from_slice(&src.data);
        if let Some(oob) = oob {
            oob[..OOB_SIZE].copy_from_slice(&src.oob);
        }

        Ok(())
    }

    /// Programs a page: each covered stored byte becomes `old & input`.
    ///
    /// The whole input is validated first; if any byte would need a 0 -> 1
    /// transition the program fails with `WriteError` and nothing is
    /// mutated. Inputs shorter than their region leave the trailing bytes
    /// unchanged; bytes past the region are ignored.
    pub fn program_page(
        &mut self,
        block: usize,
        page: usize,
        data: &[u8],
        oob: Option<&[u8]>,
    ) -> NandResult<()> {
        if block >= self.blocks.len() || page >= PAGES_PER_BLOCK {
            return Err(NandError::InvalidAddress);
        }

        let dst = &mut self.blocks[block].pages[page];
        let data_len = data.len().min(PAGE_DATA_SIZE);
        let oob_len = oob.map_or(0, |o| o.len().min(OOB_SIZE));

        for i in 0..data_len {
            if dst.data[i] & data[i] != data[i] {
                return Err(NandError::WriteError);
            }
        }
        if let Some(oob) = oob {
            for i in 0..oob_len {
                if dst.oob[i] & oob[i] != oob[i] {
                    return Err(NandError::WriteError);
                }
            }
        }

        for i in 0..data_len {
            dst.data[i] &= data[i];
        }
        if let Some(oob) = oob {
            for i in 0..oob_len {
                dst.oob[i] &= oob[i];
            }
        }

        Ok(())
    }

    /// Erases a block: every data and OOB byte returns to 0xFF and the
    /// block's erase counter increments.
    pub fn erase_block(&mut self, block: usize) -> NandResult<()> {
        match self.blocks.get_mut(block) {
            Some(b) => {
                b.erase();
                Ok(())
            }
            None => Err(NandError::InvalidAddress),
        }
    }
}
