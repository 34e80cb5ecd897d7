//! # Flash Translation Layer
//!
//! The FTL exposes `write(lba, page)` / `read(lba, page)` over a flat logical
//! page space while honoring the medium's physics: programs only clear bits,
//! so a logical overwrite never touches the old physical page. Instead every
//! write appends at a single frontier and the old page merely loses its
//! validity bit, to be reclaimed later by garbage collection.
//!
//! ## Runtime State
//!
//! ```text
//! mapping    : Lba -> Pba             (hash map, absence = unmapped)
//! blocks     : BlockInfo per block    (state, erase count, validity bitmap)
//! free_list  : Vec<block index>       (LIFO allocation stack)
//! frontier   : Option<(block, page)>  (where the next program lands)
//! ```
//!
//! None of this state is persisted separately. Every programmed page carries
//! its logical address in the spare region (see [`meta`]), and mount rebuilds
//! the whole table by scanning those tags; the medium is the only source of
//! truth across restarts.
//!
//! ## Mount
//!
//! Blocks are scanned in descending index order, pages in ascending order.
//! A block whose page 0 is untagged is free; a tagged block contributes its
//! pages to the mapping until the first untagged page, which (uniquely)
//! identifies the append frontier. Scanning descending makes the free list
//! pop in ascending block order, so allocation after a fresh mount is
//! deterministic.
//!
//! ## Garbage Collection
//!
//! Triggered only when allocation finds the free list empty. One pass:
//! pick the non-free, non-bad block with the fewest valid pages (lowest
//! index wins ties, the active block is exempt), stage its live pages in
//! RAM, erase it, then re-append the staged pages through the normal write
//! path. The erase lands a free block before any migration write runs,
//! which is what bounds re-entry.

mod block;
mod meta;

pub use block::{BlockInfo, BlockState};
pub use meta::{PageMeta, FTL_MAGIC, META_SIZE};

use eyre::{ensure, Result};
use hashbrown::HashMap;
use log::{debug, warn};
use zerocopy::IntoBytes;

use crate::nand::{NandChip, NandError, NandResult, OOB_SIZE, PAGES_PER_BLOCK, PAGE_DATA_SIZE};

/// Host-facing logical page address.
pub type Lba = u32;

/// Physical page address: `block * PAGES_PER_BLOCK + page`.
pub type Pba = u32;

fn phys_page(block: usize, page: usize) -> Pba {
    (block * PAGES_PER_BLOCK + page) as Pba
}

fn phys_split(pba: Pba) -> (usize, usize) {
    (
        pba as usize / PAGES_PER_BLOCK,
        pba as usize % PAGES_PER_BLOCK,
    )
}

/// Append position: the page that the next program will occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Frontier {
    block: usize,
    page: usize,
}

pub struct Ftl {
    nand: NandChip,
    total_blocks: usize,
    mapping: HashMap<Lba, Pba>,
    blocks: Vec<BlockInfo>,
    free_list: Vec<usize>,
    frontier: Option<Frontier>,
}

impl Ftl {
    /// Takes ownership of the medium and rebuilds the translation state from
    /// its OOB tags.
    ///
    /// If the scan discovered a partially written block its frontier is
    /// adopted; otherwise an initial active block is allocated from the free
    /// list. A chip that is completely full mounts into a degenerate state
    /// where the next write must rely on garbage collection.
    pub fn mount(nand: NandChip, total_blocks: usize) -> Result<Self> {
        ensure!(
            total_blocks <= nand.block_count(),
            "FTL spans {} blocks but the chip has {}",
            total_blocks,
            nand.block_count()
        );

        let mut ftl = Self {
            nand,
            total_blocks,
            mapping: HashMap::new(),
            blocks: vec![BlockInfo::new(); total_blocks],
            free_list: Vec::with_capacity(total_blocks),
            frontier: None,
        };
        ftl.scan_and_mount();

        if ftl.frontier.is_none() && !ftl.free_list.is_empty() {
            ftl.allocate_active_block();
        }

        Ok(ftl)
    }

    /// Gives the medium back, dropping all translation state. A subsequent
    /// [`Ftl::mount`] over the returned chip reconstructs it.
    pub fn into_nand(self) -> NandChip {
        self.nand
    }

    pub fn nand(&self) -> &NandChip {
        &self.nand
    }

    pub fn total_blocks(&self) -> usize {
        self.total_blocks
    }

    /// Snapshot of one block's state, erase count and validity bitmap.
    pub fn block_info(&self, block: usize) -> Option<BlockInfo> {
        self.blocks.get(block).copied()
    }

    /// Writes one logical page. The payload must be exactly
    /// [`PAGE_DATA_SIZE`] bytes.
    ///
    /// The page is appended at the frontier with its logical address tagged
    /// in the spare region. Only after the program succeeds is the mapping
    /// moved and the previous physical page invalidated; a failed program
    /// leaves the old mapping intact.
    pub fn write(&mut self, lba: Lba, data: &[u8]) -> NandResult<()> {
        if data.len() != PAGE_DATA_SIZE {
            return Err(NandError::WriteError);
        }

        let mut oob = [0xFFu8; OOB_SIZE];
        oob[..META_SIZE].copy_from_slice(PageMeta::new(lba).as_bytes());

        if self.frontier.is_none() {
            self.allocate_active_block();
        }
        let Some(frontier) = self.frontier else {
            return Err(NandError::WriteError);
        };

        self.nand
            .program_page(frontier.block, frontier.page, data, Some(&oob[..]))?;

        let new_pba = phys_page(frontier.block, frontier.page);
        if let Some(old) = self.mapping.insert(lba, new_pba) {
            // During GC a migrated page can land back in the slot it came
            // from; the stale entry then equals the new one and must not
            // clear the bit we are about to set.
            if old != new_pba {
                let (old_block, old_page) = phys_split(old);
                self.blocks[old_block].clear_valid(old_page);
            }
        }
        self.blocks[frontier.block].mark_valid(frontier.page);

        if frontier.page + 1 < PAGES_PER_BLOCK {
            self.frontier = Some(Frontier {
                block: frontier.block,
                page: frontier.page + 1,
            });
        } else {
            self.blocks[frontier.block].set_state(BlockState::Full);
            self.frontier = None;
        }

        Ok(())
    }

    /// Reads one logical page into `buf`.
    ///
    /// An unmapped address is not an error: the buffer is filled with the
    /// erased pattern (0xFF) and the read succeeds.
    pub fn read(&self, lba: Lba, buf: &mut [u8]) -> NandResult<()> {
        let Some(&pba) = self.mapping.get(&lba) else {
            buf.fill(0xFF);
            return Ok(());
        };

        let (block, page) = phys_split(pba);
        self.nand.read_page(block, page, buf, None)
    }

    /// Rebuilds mapping, block states, validity bitmaps, free list and
    /// frontier from OOB tags alone.
    fn scan_and_mount(&mut self) {
        let mut data = vec![0u8; PAGE_DATA_SIZE];
        let mut oob = [0xFFu8; OOB_SIZE];

        for b in (0..self.total_blocks).rev() {
            if self
                .nand
                .read_page(b, 0, &mut data, Some(&mut oob[..]))
                .is_err()
            {
                warn!("mount: block {b} page 0 unreadable, retiring as bad");
                self.blocks[b].set_state(BlockState::Bad);
                continue;
            }

            let first = match PageMeta::from_bytes(&oob) {
                Ok(m) if m.is_tagged() => m.lba(),
                _ => {
                    // Untagged page 0: the block was never written since its
                    // last erase.
                    self.blocks[b].set_state(BlockState::Free);
                    self.blocks[b].reset_erase_count();
                    self.free_list.push(b);
                    continue;
                }
            };
            self.adopt_mapping(first, phys_page(b, 0));

            let mut found_frontier = false;
            for p in 1..PAGES_PER_BLOCK {
                if self
                    .nand
                    .read_page(b, p, &mut data, Some(&mut oob[..]))
                    .is_err()
                {
                    break;
                }
                match PageMeta::from_bytes(&oob) {
                    Ok(m) if m.is_tagged() => self.adopt_mapping(m.lba(), phys_page(b, p)),
                    _ => {
                        // First untagged page of a used block: the unique
                        // append frontier.
                        self.frontier = Some(Frontier { block: b, page: p });
                        self.blocks[b].set_state(BlockState::Active);
                        found_frontier = true;
                        break;
                    }
                }
            }
            if !found_frontier {
                self.blocks[b].set_state(BlockState::Full);
            }
        }

        debug!(
            "mount: {} mapped pages, {} free blocks, frontier {:?}",
            self.mapping.len(),
            self.free_list.len(),
            self.frontier
        );
    }

    /// Upserts one scanned tag into the mapping, keeping the validity
    /// bitmaps in lockstep: the new page gains its bit, the page it
    /// displaced (if any) loses its bit.
    fn adopt_mapping(&mut self, lba: Lba, pba: Pba) {
        if let Some(old) = self.mapping.insert(lba, pba) {
            if old != pba {
                let (old_block, old_page) = phys_split(old);
                self.blocks[old_block].clear_valid(old_page);
            }
        }
        let (block, page) = phys_split(pba);
        self.blocks[block].mark_valid(page);
    }

    /// Pops the most recently freed block and makes it the frontier.
    /// Runs garbage collection first when the free list is dry.
    fn allocate_active_block(&mut self) -> Option<usize> {
        if self.free_list.is_empty() {
            if !self.garbage_collect() {
                return None;
            }
            // GC migrations may already have consumed the block it freed.
            if self.free_list.is_empty() {
                return None;
            }
        }

        let block = self.free_list.pop()?;
        self.blocks[block].set_state(BlockState::Active);
        self.blocks[block].reset_valid();
        self.frontier = Some(Frontier { block, page: 0 });
        Some(block)
    }

    /// One greedy collection pass. Returns true iff a block was reclaimed
    /// and every staged page was re-appended.
    fn garbage_collect(&mut self) -> bool {
        let active = self.frontier.map(|f| f.block);

        let mut victim: Option<(usize, u32)> = None;
        for b in 0..self.total_blocks {
            if Some(b) == active {
                continue;
            }
            let info = &self.blocks[b];
            if matches!(info.state(), BlockState::Free | BlockState::Bad) {
                continue;
            }
            let valid = info.valid_count();
            match victim {
                Some((_, best)) if valid >= best => {}
                _ => victim = Some((b, valid)),
            }
        }
        let Some((victim, valid_count)) = victim else {
            debug!("gc: no eligible victim");
            return false;
        };

        // Stage live pages in RAM before the erase. A tag whose mapping no
        // longer points at this exact page is stale and skipped.
        let mut staged: Vec<(Lba, Vec<u8>)> = Vec::with_capacity(valid_count as usize);
        let mut data = vec![0u8; PAGE_DATA_SIZE];
        let mut oob = [0xFFu8; OOB_SIZE];
        for p in 0..PAGES_PER_BLOCK {
            if !self.blocks[victim].is_valid(p) {
                continue;
            }
            if self
                .nand
                .read_page(victim, p, &mut data, Some(&mut oob[..]))
                .is_err()
            {
                continue;
            }
            let lba = match PageMeta::from_bytes(&oob) {
                Ok(m) if m.is_tagged() => m.lba(),
                _ => continue,
            };
            if self.mapping.get(&lba).copied() != Some(phys_page(victim, p)) {
                continue;
            }
            staged.push((lba, data.clone()));
        }

        if self.nand.erase_block(victim).is_err() {
            warn!("gc: erase of block {victim} failed, retiring as bad");
            self.blocks[victim].set_state(BlockState::Bad);
            return false;
        }
        self.blocks[victim].set_state(BlockState::Free);
        self.blocks[victim].reset_valid();
        self.blocks[victim].bump_erase_count();
        self.free_list.push(victim);
        debug!(
            "gc: reclaimed block {victim}, migrating {} live pages",
            staged.len()
        );

        for (lba, bytes) in &staged {
            if self.write(*lba, bytes).is_err() {
                return false;
            }
        }

        true
    }
}
