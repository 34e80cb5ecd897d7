//! # Storage Controller
//!
//! Bus-attached NVMe-flavored front end for the translation layer. The
//! controller exposes a small register file inside an 8 KiB MMIO window and
//! drives one admin submission/completion queue pair living in host memory.
//!
//! ## Command Lifecycle
//!
//! ```text
//!        host                                controller
//! ──────────────────────────────────────────────────────────────────
//!  write 64B entry to SQ ring
//!  write SQ0TDBL (tail)      ──────>  fetch: 4 DMA word reads,
//!                                     head += 1, busy = 5
//!  tick × 5                  ──────>  execute: DMA payload transfer
//!                                     + FTL read/write
//!                                     post: status word into CQ entry,
//!                                     cq_tail += 1, irq latched
//!  read 16B entry from CQ ring
//!  write CQ0HDBL (head)      ──────>  acknowledge
//! ```
//!
//! The five-tick delay models command access latency; the engine holds at
//! most one fetched command and ignores doorbells while counting down.
//!
//! ## DMA Pattern
//!
//! Page payloads cross the bus strictly as word transactions at word-aligned
//! buffer offsets (0, 4, 8, …), each word packing four consecutive payload
//! bytes little-endian. This gather/scatter shape is observable to the host
//! interconnect and is kept bit-for-bit stable.
//!
//! ## Reset
//!
//! Clearing CC.EN drops ready, zeroes all four queue pointers and discards
//! any fetched-but-unexecuted command. A completion that was already posted
//! is not rolled back.

pub mod regs;

mod queue;

pub use queue::{
    CompletionEntry, SubmissionEntry, CQE_STATUS_OFFSET, CQ_ENTRY_SIZE, SQE_DATA_PTR_OFFSET,
    SQE_LBA_OFFSET, SQE_LEN_OFFSET, SQE_OPCODE_OFFSET, SQ_ENTRY_SIZE,
};

use log::trace;

use crate::bus::{MemoryBus, PhysAddr, Word};
use crate::ftl::{Ftl, Lba};
use crate::nand::PAGE_DATA_SIZE;
use regs::NvmeOpcode;

/// Ticks between command fetch and execution, modelling access latency.
const COMMAND_LATENCY_TICKS: u32 = 5;

/// Latched fields of the fetched submission entry.
#[derive(Debug, Clone, Copy, Default)]
struct PendingCommand {
    opcode: u8,
    data_ptr: PhysAddr,
    lba: Lba,
    block_count: u32,
}

pub struct StorageController {
    ftl: Ftl,
    base: PhysAddr,

    cc: Word,
    csts: Word,
    aqa: Word,
    asq: PhysAddr,
    acq: PhysAddr,

    sq_tail: u16,
    sq_head: u16,
    cq_head: u16,
    cq_tail: u16,

    busy_ticks: u32,
    pending: PendingCommand,
    has_pending: bool,
    irq_pending: bool,
}

impl StorageController {
    /// Attaches the controller over `ftl` with its register window at
    /// `base`. The device powers on ready.
    pub fn new(ftl: Ftl, base: PhysAddr) -> Self {
        Self {
            ftl,
            base,
            cc: 0,
            csts: regs::CSTS_READY,
            aqa: 0,
            asq: 0,
            acq: 0,
            sq_tail: 0,
            sq_head: 0,
            cq_head: 0,
            cq_tail: 0,
            busy_ticks: 0,
            pending: PendingCommand::default(),
            has_pending: false,
            irq_pending: false,
        }
    }

    pub fn ftl(&self) -> &Ftl {
        &self.ftl
    }

    pub fn into_ftl(self) -> Ftl {
        self.ftl
    }

    pub fn base(&self) -> PhysAddr {
        self.base
    }

    /// True when `addr` falls inside the claimed MMIO window.
    pub fn contains(&self, addr: PhysAddr) -> bool {
        addr >= self.base && addr - self.base < regs::REG_WINDOW_SIZE
    }

    /// Register read. Unrecognized offsets inside the window read as zero.
    pub fn mmio_read(&self, addr: PhysAddr) -> Word {
        if !self.contains(addr) {
            return 0;
        }
        match addr - self.base {
            regs::VS => regs::VERSION,
            regs::CC => self.cc,
            regs::CSTS => self.csts,
            regs::AQA => self.aqa,
            regs::ASQ_LO => self.asq,
            regs::ACQ_LO => self.acq,
            _ => 0,
        }
    }

    /// Register write. Doorbell writes may start a DMA fetch against `bus`;
    /// unrecognized offsets are ignored.
    pub fn mmio_write<B: MemoryBus>(&mut self, bus: &mut B, addr: PhysAddr, word: Word) {
        if !self.contains(addr) {
            return;
        }
        match addr - self.base {
            regs::CC => {
                self.cc = word;
                if word & regs::CC_ENABLE != 0 {
                    self.csts |= regs::CSTS_READY;
                } else {
                    self.csts &= !regs::CSTS_READY;
                    self.sq_head = 0;
                    self.sq_tail = 0;
                    self.cq_head = 0;
                    self.cq_tail = 0;
                    self.busy_ticks = 0;
                    self.has_pending = false;
                }
            }
            regs::AQA => self.aqa = word,
            regs::ASQ_LO => self.asq = word,
            regs::ACQ_LO => self.acq = word,
            regs::SQ0TDBL => {
                self.sq_tail = word as u16;
                if self.sq_tail != self.sq_head {
                    self.fetch_command(bus);
                }
            }
            regs::CQ0HDBL => self.cq_head = word as u16,
            _ => {}
        }
    }

    /// Advances the latency counter; when it expires the latched command
    /// executes against `bus`.
    pub fn tick<B: MemoryBus>(&mut self, bus: &mut B) {
        if self.busy_ticks > 0 {
            self.busy_ticks -= 1;
            if self.busy_ticks == 0 && self.has_pending {
                self.execute_command(bus);
            }
        }
    }

    /// Drains the interrupt latch set by completion posting.
    pub fn take_interrupt(&mut self) -> bool {
        std::mem::take(&mut self.irq_pending)
    }

    /// DMA-reads the submission entry at the internal head into the pending
    /// latch and arms the latency counter.
    fn fetch_command<B: MemoryBus>(&mut self, bus: &mut B) {
        if self.busy_ticks > 0 {
            return;
        }

        let entry = self.asq + u32::from(self.sq_head) * SQ_ENTRY_SIZE as u32;
        self.pending = PendingCommand {
            opcode: (bus.read_word(entry + SQE_OPCODE_OFFSET) & 0xFF) as u8,
            data_ptr: bus.read_word(entry + SQE_DATA_PTR_OFFSET),
            lba: bus.read_word(entry + SQE_LBA_OFFSET),
            block_count: bus.read_word(entry + SQE_LEN_OFFSET),
        };
        self.sq_head = self.sq_head.wrapping_add(1);
        self.has_pending = true;
        self.busy_ticks = COMMAND_LATENCY_TICKS;

        trace!(
            "fetched opcode {:#04x} lba {} nlb {} buffer {:#010x}",
            self.pending.opcode,
            self.pending.lba,
            self.pending.block_count,
            self.pending.data_ptr
        );
    }

    fn execute_command<B: MemoryBus>(&mut self, bus: &mut B) {
        self.has_pending = false;
        let cmd = self.pending;

        let status = match NvmeOpcode::from_byte(cmd.opcode) {
            NvmeOpcode::Write => {
                let mut staging = vec![0u8; PAGE_DATA_SIZE];
                for i in (0..PAGE_DATA_SIZE).step_by(4) {
                    let word = bus.read_word(cmd.data_ptr + i as u32);
                    staging[i..i + 4].copy_from_slice(&word.to_le_bytes());
                }
                match self.ftl.write(cmd.lba, &staging) {
                    Ok(()) => regs::STATUS_SUCCESS,
                    Err(_) => regs::STATUS_INTERNAL_ERROR,
                }
            }
            NvmeOpcode::Read => {
                // Staging starts as the erased pattern so a failed medium
                // read still hands the host deterministic bytes.
                let mut staging = vec![0xFFu8; PAGE_DATA_SIZE];
                let status = match self.ftl.read(cmd.lba, &mut staging) {
                    Ok(()) => regs::STATUS_SUCCESS,
                    Err(_) => regs::STATUS_UNRECOVERED_READ,
                };
                for i in (0..PAGE_DATA_SIZE).step_by(4) {
                    let mut raw = [0u8; 4];
                    raw.copy_from_slice(&staging[i..i + 4]);
                    bus.write_word(cmd.data_ptr + i as u32, Word::from_le_bytes(raw));
                }
                status
            }
            NvmeOpcode::Unknown => regs::STATUS_INTERNAL_ERROR,
        };

        self.post_completion(bus, status);
    }

    /// Writes the completion status word and advances the queue tail.
    ///
    /// The phase tag is pinned to 1 instead of alternating per queue wrap;
    /// hosts polling this device must treat a set phase bit as "entry
    /// present" rather than comparing against an expected phase.
    fn post_completion<B: MemoryBus>(&mut self, bus: &mut B, status: u16) {
        let entry = self.acq + u32::from(self.cq_tail) * CQ_ENTRY_SIZE as u32;
        let status_word = (u32::from(status) << regs::STATUS_SHIFT) | 1;
        bus.write_word(entry + CQE_STATUS_OFFSET, status_word);
        self.cq_tail = self.cq_tail.wrapping_add(1);
        self.irq_pending = true;

        trace!(
            "completion posted with status {:#06x} (cq tail {}, host head {})",
            status,
            self.cq_tail,
            self.cq_head
        );
    }
}
