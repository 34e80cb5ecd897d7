//! Drives the full storage stack the way a host would: submission entries in
//! RAM, doorbell writes, tick loop, completion polling. Prints a wear summary
//! at the end; run with `RUST_LOG`-style verbosity via the simplelog level
//! below to watch mount and collection activity.

use log::{info, LevelFilter};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

use nandbox::controller::regs;
use nandbox::{
    BlockState, CompletionEntry, Ftl, HostMemory, NandChip, StorageController, SubmissionEntry,
    PAGE_DATA_SIZE,
};
use zerocopy::IntoBytes;

const CTRL_BASE: u32 = 0xF000_0000;
const ASQ_BASE: u32 = 0x0000;
const ACQ_BASE: u32 = 0x4000;
const BUF_BASE: u32 = 0x8000;

const BLOCKS: usize = 16;
const LBA_SPACE: u32 = 256;
const COMMANDS: u32 = 2048;

fn main() -> eyre::Result<()> {
    TermLogger::init(
        LevelFilter::Debug,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )?;

    let ftl = Ftl::mount(NandChip::new(BLOCKS), BLOCKS)?;
    let mut ctrl = StorageController::new(ftl, CTRL_BASE);
    let mut ram = HostMemory::new(0, 0x20000);

    ctrl.mmio_write(&mut ram, CTRL_BASE + regs::CC, regs::CC_ENABLE);
    ctrl.mmio_write(&mut ram, CTRL_BASE + regs::ASQ_LO, ASQ_BASE);
    ctrl.mmio_write(&mut ram, CTRL_BASE + regs::ACQ_LO, ACQ_BASE);

    info!("issuing {COMMANDS} single-page writes over {LBA_SPACE} addresses");
    let mut completions = 0u32;
    for i in 0..COMMANDS {
        let lba = (i * 37) % LBA_SPACE;
        let payload = vec![(lba & 0xFF) as u8; PAGE_DATA_SIZE];
        ram.write_bytes(BUF_BASE, &payload);

        // Ring indices reuse a short window of both rings so the demo RAM
        // stays small; every command is drained before the next doorbell.
        let slot = (i % 64) as u16;
        ram.write_bytes(
            ASQ_BASE + u32::from(slot) * nandbox::controller::SQ_ENTRY_SIZE as u32,
            SubmissionEntry::write_command(lba, BUF_BASE).as_bytes(),
        );
        ctrl.mmio_write(&mut ram, CTRL_BASE + regs::SQ0TDBL, u32::from(slot) + 1);
        for _ in 0..8 {
            ctrl.tick(&mut ram);
        }
        if ctrl.take_interrupt() {
            completions += 1;
        }

        if slot == 63 {
            // Rewind both rings before the indices walk past the window.
            ctrl.mmio_write(&mut ram, CTRL_BASE + regs::CC, 0);
            ctrl.mmio_write(&mut ram, CTRL_BASE + regs::CC, regs::CC_ENABLE);
        }
    }
    info!("{completions} completions observed");

    // Read one address back through the controller and decode its entry.
    ram.write_bytes(
        ASQ_BASE,
        SubmissionEntry::read_command(5, BUF_BASE).as_bytes(),
    );
    ctrl.mmio_write(&mut ram, CTRL_BASE + regs::SQ0TDBL, 1);
    for _ in 0..8 {
        ctrl.tick(&mut ram);
    }
    let mut raw = [0u8; nandbox::controller::CQ_ENTRY_SIZE];
    ram.read_bytes(ACQ_BASE, &mut raw);
    let cqe = *CompletionEntry::from_bytes(&raw)?;
    info!(
        "read of lba 5: status {:#06x}, first payload word {:#010x}",
        cqe.status_code(),
        {
            let mut word = [0u8; 4];
            ram.read_bytes(BUF_BASE, &mut word);
            u32::from_le_bytes(word)
        }
    );

    let ftl = ctrl.into_ftl();
    info!("per-block wear after the workload:");
    for b in 0..BLOCKS {
        let Some(info) = ftl.block_info(b) else { break };
        info!(
            "  block {b:2}: {:?}{} erases {:2}, live pages {:2}",
            info.state(),
            if info.state() == BlockState::Active { " <-" } else { "" },
            info.erase_count(),
            info.valid_count()
        );
    }

    Ok(())
}
