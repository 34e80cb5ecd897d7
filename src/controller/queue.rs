//! # Queue Entry Wire Layouts
//!
//! Host software talks to the controller through two rings in host memory:
//! 64-byte submission entries and 16-byte completion entries. The structs
//! here pin those layouts with explicit little-endian fields; the command
//! engine itself gathers the handful of fields it needs with word-granular
//! DMA at the byte offsets exported below.
//!
//! ## Submission entry (64 bytes)
//!
//! ```text
//! Offset  Size  Field       Used  Description
//! ------  ----  ----------  ----  ------------------------------
//! 0       1     opcode      yes   0x01 write, 0x02 read
//! 1       1     flags             fused / PSDT
//! 2       2     cid               command identifier
//! 4       4     nsid              namespace
//! 8       8     reserved
//! 16      8     mptr              metadata pointer
//! 24      8     prp1        yes   data buffer physical address
//! 32      8     prp2
//! 40      4     cdw10       yes   LBA (low 32 bits)
//! 44      4     cdw11             LBA (high 32 bits, unused)
//! 48      4     cdw12       yes   length in blocks
//! 52      12    cdw13..15
//! ```
//!
//! ## Completion entry (16 bytes)
//!
//! ```text
//! Offset  Size  Field        Description
//! ------  ----  -----------  ------------------------------------
//! 0       4     dw0          command specific
//! 4       4     reserved
//! 8       2     sq_head      submission head at completion time
//! 10      2     sq_id        submission queue id
//! 12      4     status_word  bit 0 phase, bits 17+ status code
//! ```
//!
//! The controller writes only the status word; the other completion fields
//! are left to whatever the host memory held.

use eyre::{ensure, Result};
use zerocopy::little_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::regs::{NvmeOpcode, STATUS_SHIFT};
use crate::bus::PhysAddr;
use crate::ftl::Lba;

pub const SQ_ENTRY_SIZE: usize = 64;
pub const CQ_ENTRY_SIZE: usize = 16;

// Byte offsets the command engine fetches with word reads.
pub const SQE_OPCODE_OFFSET: u32 = 0;
pub const SQE_DATA_PTR_OFFSET: u32 = 24;
pub const SQE_LBA_OFFSET: u32 = 40;
pub const SQE_LEN_OFFSET: u32 = 48;

// Byte offset of the status word inside a completion entry.
pub const CQE_STATUS_OFFSET: u32 = 12;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct SubmissionEntry {
    opcode: u8,
    flags: u8,
    cid: U16,
    nsid: U32,
    reserved: [u8; 8],
    mptr: U64,
    prp1: U64,
    prp2: U64,
    cdw10: U32,
    cdw11: U32,
    cdw12: U32,
    cdw13: U32,
    cdw14: U32,
    cdw15: U32,
}

const _: () = assert!(std::mem::size_of::<SubmissionEntry>() == SQ_ENTRY_SIZE);

impl SubmissionEntry {
    fn command(opcode: u8, lba: Lba, buffer: PhysAddr) -> Self {
        Self {
            opcode,
            flags: 0,
            cid: U16::new(0),
            nsid: U32::new(0),
            reserved: [0; 8],
            mptr: U64::new(0),
            prp1: U64::new(buffer as u64),
            prp2: U64::new(0),
            cdw10: U32::new(lba),
            cdw11: U32::new(0),
            cdw12: U32::new(0),
            cdw13: U32::new(0),
            cdw14: U32::new(0),
            cdw15: U32::new(0),
        }
    }

    /// A single-block write command: payload is fetched from `buffer`.
    pub fn write_command(lba: Lba, buffer: PhysAddr) -> Self {
        Self::command(NvmeOpcode::WRITE, lba, buffer)
    }

    /// A single-block read command: payload is delivered to `buffer`.
    pub fn read_command(lba: Lba, buffer: PhysAddr) -> Self {
        Self::command(NvmeOpcode::READ, lba, buffer)
    }

    pub fn with_opcode(opcode: u8, lba: Lba, buffer: PhysAddr) -> Self {
        Self::command(opcode, lba, buffer)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        ensure!(
            bytes.len() >= SQ_ENTRY_SIZE,
            "buffer too small for SubmissionEntry: {} < {}",
            bytes.len(),
            SQ_ENTRY_SIZE
        );

        Self::ref_from_bytes(&bytes[..SQ_ENTRY_SIZE])
            .map_err(|e| eyre::eyre!("failed to read SubmissionEntry: {:?}", e))
    }

    pub fn opcode(&self) -> u8 {
        self.opcode
    }

    pub fn data_ptr(&self) -> u64 {
        self.prp1.get()
    }

    pub fn lba(&self) -> Lba {
        self.cdw10.get()
    }

    pub fn block_count(&self) -> u32 {
        self.cdw12.get()
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct CompletionEntry {
    dw0: U32,
    reserved: U32,
    sq_head: U16,
    sq_id: U16,
    status_word: U32,
}

const _: () = assert!(std::mem::size_of::<CompletionEntry>() == CQ_ENTRY_SIZE);

impl CompletionEntry {
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        ensure!(
            bytes.len() >= CQ_ENTRY_SIZE,
            "buffer too small for CompletionEntry: {} < {}",
            bytes.len(),
            CQ_ENTRY_SIZE
        );

        Self::ref_from_bytes(&bytes[..CQ_ENTRY_SIZE])
            .map_err(|e| eyre::eyre!("failed to read CompletionEntry: {:?}", e))
    }

    pub fn status_word(&self) -> u32 {
        self.status_word.get()
    }

    /// Phase tag, bit 0 of the status word.
    pub fn phase(&self) -> bool {
        self.status_word.get() & 1 != 0
    }

    /// Status code, recovered from bits 17+ of the status word.
    pub fn status_code(&self) -> u16 {
        (self.status_word.get() >> STATUS_SHIFT) as u16
    }
}
