//! # Storage Controller End-to-End Tests
//!
//! These tests drive the controller the way host software does: submission
//! entries are placed in a host RAM ring, the tail doorbell is rung, the
//! tick source advances, and the outcome is observed through DMA side
//! effects (payload buffers, completion entries) only.
//!
//! Layout used throughout:
//!
//! ```text
//! 0x0000  admin submission queue ring
//! 0x0800  admin completion queue ring
//! 0x1000+ payload buffers
//! 0xF0000000  controller register window
//! ```

use nandbox::controller::{regs, CQE_STATUS_OFFSET, CQ_ENTRY_SIZE, SQ_ENTRY_SIZE};
use nandbox::{
    CompletionEntry, Ftl, HostMemory, MemoryBus, NandChip, StorageController, SubmissionEntry,
    PAGES_PER_BLOCK, PAGE_DATA_SIZE,
};
use zerocopy::IntoBytes;

const BASE: u32 = 0xF000_0000;
const ASQ_BASE: u32 = 0x0000;
const ACQ_BASE: u32 = 0x0800;

fn fresh_rig(blocks: usize) -> (StorageController, HostMemory) {
    let ftl = Ftl::mount(NandChip::new(blocks), blocks).unwrap();
    rig_over(ftl)
}

fn rig_over(ftl: Ftl) -> (StorageController, HostMemory) {
    let mut ctrl = StorageController::new(ftl, BASE);
    let mut ram = HostMemory::new(0, 0x20000);

    ctrl.mmio_write(&mut ram, BASE + regs::CC, regs::CC_ENABLE);
    ctrl.mmio_write(&mut ram, BASE + regs::ASQ_LO, ASQ_BASE);
    ctrl.mmio_write(&mut ram, BASE + regs::ACQ_LO, ACQ_BASE);
    (ctrl, ram)
}

fn submit_and_wait(
    ctrl: &mut StorageController,
    ram: &mut HostMemory,
    index: u16,
    sqe: SubmissionEntry,
) {
    ram.write_bytes(
        ASQ_BASE + u32::from(index) * SQ_ENTRY_SIZE as u32,
        sqe.as_bytes(),
    );
    ctrl.mmio_write(ram, BASE + regs::SQ0TDBL, u32::from(index) + 1);
    for _ in 0..50 {
        ctrl.tick(ram);
    }
}

fn completion(ram: &HostMemory, index: u16) -> CompletionEntry {
    let mut raw = [0u8; CQ_ENTRY_SIZE];
    ram.read_bytes(ACQ_BASE + u32::from(index) * CQ_ENTRY_SIZE as u32, &mut raw);
    *CompletionEntry::from_bytes(&raw).unwrap()
}

#[test]
fn write_then_read_roundtrip_over_dma() {
    let (mut ctrl, mut ram) = fresh_rig(64);

    let pattern: Vec<u8> = [0xEF, 0xBE, 0xAD, 0xDE]
        .iter()
        .copied()
        .cycle()
        .take(PAGE_DATA_SIZE)
        .collect();
    ram.write_bytes(0x1000, &pattern);

    submit_and_wait(&mut ctrl, &mut ram, 0, SubmissionEntry::write_command(5, 0x1000));
    submit_and_wait(&mut ctrl, &mut ram, 1, SubmissionEntry::read_command(5, 0x2000));

    assert_eq!(ram.read_word(0x2000), 0xDEAD_BEEF);
    let mut out = vec![0u8; PAGE_DATA_SIZE];
    ram.read_bytes(0x2000, &mut out);
    assert_eq!(out, pattern);

    assert_eq!(completion(&ram, 0).status_code(), regs::STATUS_SUCCESS);
    assert_eq!(completion(&ram, 1).status_code(), regs::STATUS_SUCCESS);
}

#[test]
fn every_doorbell_posts_exactly_one_completion() {
    let (mut ctrl, mut ram) = fresh_rig(8);
    ram.write_bytes(0x1000, &vec![0x11u8; PAGE_DATA_SIZE]);

    for i in 0..3u16 {
        submit_and_wait(
            &mut ctrl,
            &mut ram,
            i,
            SubmissionEntry::write_command(u32::from(i), 0x1000),
        );
    }

    for i in 0..3u16 {
        let cqe = completion(&ram, i);
        assert!(cqe.phase(), "completion {i} missing its phase tag");
        assert_eq!(cqe.status_code(), regs::STATUS_SUCCESS);
    }
    // No fourth doorbell, no fourth completion.
    assert_eq!(completion(&ram, 3).status_word(), 0);
}

#[test]
fn unmapped_read_delivers_erased_pattern_with_success() {
    let (mut ctrl, mut ram) = fresh_rig(8);

    submit_and_wait(&mut ctrl, &mut ram, 0, SubmissionEntry::read_command(99, 0x3000));

    let mut out = vec![0u8; PAGE_DATA_SIZE];
    ram.read_bytes(0x3000, &mut out);
    assert!(out.iter().all(|&b| b == 0xFF));
    assert_eq!(completion(&ram, 0).status_code(), regs::STATUS_SUCCESS);
}

#[test]
fn write_to_full_device_completes_with_error_status() {
    let mut ftl = Ftl::mount(NandChip::new(2), 2).unwrap();
    for lba in 0..(2 * PAGES_PER_BLOCK) as u32 {
        ftl.write(lba, &vec![0xFF; PAGE_DATA_SIZE]).unwrap();
    }
    let (mut ctrl, mut ram) = rig_over(ftl);

    submit_and_wait(&mut ctrl, &mut ram, 0, SubmissionEntry::write_command(200, 0x1000));

    let cqe = completion(&ram, 0);
    assert!(cqe.phase());
    assert_eq!(cqe.status_code(), regs::STATUS_INTERNAL_ERROR);
}

#[test]
fn unknown_opcode_completes_with_error_status() {
    let (mut ctrl, mut ram) = fresh_rig(8);

    submit_and_wait(
        &mut ctrl,
        &mut ram,
        0,
        SubmissionEntry::with_opcode(0x55, 0, 0x1000),
    );

    let cqe = completion(&ram, 0);
    assert!(cqe.phase());
    assert_eq!(cqe.status_code(), regs::STATUS_INTERNAL_ERROR);
}

#[test]
fn status_word_carries_code_above_the_phase_tag() {
    let (mut ctrl, mut ram) = fresh_rig(8);
    ram.write_bytes(0x1000, &vec![0x22u8; PAGE_DATA_SIZE]);

    submit_and_wait(&mut ctrl, &mut ram, 0, SubmissionEntry::write_command(1, 0x1000));
    submit_and_wait(
        &mut ctrl,
        &mut ram,
        1,
        SubmissionEntry::with_opcode(0x55, 0, 0x1000),
    );

    // Success: only the phase tag. Error: code shifted into bits 17+.
    let mut raw = [0u8; 4];
    ram.read_bytes(ACQ_BASE + CQE_STATUS_OFFSET, &mut raw);
    assert_eq!(u32::from_le_bytes(raw), 1);

    ram.read_bytes(
        ACQ_BASE + CQ_ENTRY_SIZE as u32 + CQE_STATUS_OFFSET,
        &mut raw,
    );
    assert_eq!(
        u32::from_le_bytes(raw),
        (u32::from(regs::STATUS_INTERNAL_ERROR) << regs::STATUS_SHIFT) | 1
    );
}

#[test]
fn interrupt_latch_fires_once_per_completion() {
    let (mut ctrl, mut ram) = fresh_rig(8);
    ram.write_bytes(0x1000, &vec![0x33u8; PAGE_DATA_SIZE]);

    submit_and_wait(&mut ctrl, &mut ram, 0, SubmissionEntry::write_command(0, 0x1000));

    assert!(ctrl.take_interrupt());
    assert!(!ctrl.take_interrupt());
}

#[test]
fn pages_written_through_the_controller_are_durable() {
    let (mut ctrl, mut ram) = fresh_rig(16);
    let payload = vec![0x5Au8; PAGE_DATA_SIZE];
    ram.write_bytes(0x1000, &payload);

    submit_and_wait(&mut ctrl, &mut ram, 0, SubmissionEntry::write_command(7, 0x1000));
    assert_eq!(completion(&ram, 0).status_code(), regs::STATUS_SUCCESS);

    // Tear the whole stack down to the bare chip and remount.
    let ftl = ctrl.into_ftl();
    let ftl = Ftl::mount(ftl.into_nand(), 16).unwrap();

    let mut buf = vec![0u8; PAGE_DATA_SIZE];
    ftl.read(7, &mut buf).unwrap();
    assert_eq!(buf, payload);
}
