// Alignment of two free-running port clocks, used when timestamps taken on two
// different NICs must be compared. Ported register layout and procedure from the ixgbe
// SYSTIM/TIMADJ scheme: reset both counters, measure the residual offset with
// alternating reads, apply the median estimate through the adjustment registers.

/// Register access for one port. The core never does address arithmetic; offsets come
/// from a ClockRegs layout.
pub trait PortRegisters {
    fn read_reg32(&mut self, offset: u32) -> u32;
    fn write_reg32(&mut self, offset: u32, value: u32);
}

/// Offsets of the clock and clock-adjustment registers of a port.
#[derive(Debug, Clone, Copy)]
pub struct ClockRegs {
    pub time_low: u32,
    pub time_high: u32,
    pub adj_low: u32,
    pub adj_high: u32,
    /// Bit set in adj_high to mark a negative adjustment; the magnitude always goes to
    /// adj_low because the register format has no signed encoding.
    pub sign_bit: u32,
}

impl ClockRegs {
    /// 82599/X540 (ixgbe) layout: SYSTIML/SYSTIMH/TIMADJL/TIMADJH.
    pub fn ixgbe() -> ClockRegs {
        ClockRegs {
            time_low: 0x08C0C,
            time_high: 0x08C10,
            adj_low: 0x08C18,
            adj_high: 0x08C1C,
            sign_bit: 1 << 31,
        }
    }
}

const SYNC_RUNS: usize = 7; // must be odd, the median of the runs is used

/// Reset a single port clock to zero. The low register is written twice: once before
/// and once after the high register, which cancels the race where the low word is about
/// to carry into the high word between the two writes.
pub fn reset_clock<P: PortRegisters>(port: &mut P, regs: ClockRegs) {
    port.write_reg32(regs.time_low, 0);
    port.write_reg32(regs.time_high, 0);
    port.write_reg32(regs.time_low, 0);
}

/// Synchronize the clock of port b to the clock of port a.
///
/// Both clocks are reset, then SYNC_RUNS alternating read exchanges (a, b, b, a)
/// estimate the one-way offset per round; the median rejects rounds that were hit by
/// scheduling jitter. The median offset is applied to b via its adjustment registers.
/// An offset of exactly zero is skipped since the register encoding has no meaningful
/// zero adjustment. Returns the applied offset.
pub fn sync_clocks<A, B>(a: &mut A, b: &mut B, regs: ClockRegs) -> i64
where
    A: PortRegisters,
    B: PortRegisters,
{
    reset_clock(a, regs);
    reset_clock(b, regs);

    let mut offsets = [0i64; SYNC_RUNS];
    for entry in offsets.iter_mut() {
        let x1 = a.read_reg32(regs.time_low) as i64;
        let x2 = b.read_reg32(regs.time_low) as i64;
        let y1 = b.read_reg32(regs.time_low) as i64;
        let y2 = a.read_reg32(regs.time_low) as i64;

        // Time spent between two reads; x1 - x2 still contains it plus the offset
        let delta_t = ((x1 - x2) - (y2 - y1)).abs() / 2;
        *entry = delta_t + (x1 - x2);
    }

    offsets.sort_unstable();
    let offs = offsets[SYNC_RUNS / 2];

    if offs != 0 {
        b.write_reg32(regs.adj_low, offs.unsigned_abs() as u32);
        b.write_reg32(regs.adj_high, if offs < 0 { regs.sign_bit } else { 0 });
    }

    offs
}

/// Raw difference between the two 64-bit port clocks, for drift verification. Does not
/// compensate for the delay between the register reads.
pub fn clock_difference<A, B>(a: &mut A, b: &mut B, regs: ClockRegs) -> i64
where
    A: PortRegisters,
    B: PortRegisters,
{
    let a_low = a.read_reg32(regs.time_low) as u64;
    let b_low = b.read_reg32(regs.time_low) as u64;
    let a_high = a.read_reg32(regs.time_high) as u64;
    let b_high = b.read_reg32(regs.time_high) as u64;

    ((a_high << 32 | a_low) as i64) - ((b_high << 32 | b_low) as i64)
}
