//! BasicBlock type for straight-line code regions.
//!
//! A basic block owns an ordered list of inclusive address ranges. After
//! refinement a block may hold several non-contiguous ranges (a jump-merge
//! absorbs the ranges of the merged block). The first range's low address
//! is the block's identity within its flow; every operation preserves the
//! chronological order of the range list so that identity never shifts
//! behind the flow's back.

use serde::{Deserialize, Serialize};

/// An inclusive address range `[low, high]` over instruction addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddrRange {
    pub low: u64,
    pub high: u64,
}

impl AddrRange {
    pub fn new(low: u64, high: u64) -> Self {
        debug_assert!(low <= high, "inverted address range");
        Self { low, high }
    }

    pub fn contains(&self, addr: u64) -> bool {
        self.low <= addr && addr <= self.high
    }
}

/// Block classification after refinement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockKind {
    Normal,
    Call,
    Other,
}

/// A basic block: id, kind, address ranges and (for call blocks) the
/// symbolized callee list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicBlock {
    id: usize,
    kind: BlockKind,
    addr_ranges: Vec<AddrRange>,
    callees: Vec<String>,
}

impl BasicBlock {
    /// Create an empty block. At least one range must be pushed before the
    /// block is handed to a flow.
    pub fn new(id: usize, kind: BlockKind) -> Self {
        Self {
            id,
            kind,
            addr_ranges: Vec::new(),
            callees: Vec::new(),
        }
    }

    /// Create a block holding a single contiguous range.
    pub fn with_range(id: usize, low: u64, high: u64, kind: BlockKind) -> Self {
        let mut block = Self::new(id, kind);
        block.push_range(low, high);
        block
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: usize) {
        self.id = id;
    }

    pub fn kind(&self) -> BlockKind {
        self.kind
    }

    pub fn set_kind(&mut self, kind: BlockKind) {
        self.kind = kind;
    }

    /// Append a range, preserving chronological order.
    pub fn push_range(&mut self, low: u64, high: u64) {
        self.addr_ranges.push(AddrRange::new(low, high));
    }

    pub fn addr_ranges(&self) -> &[AddrRange] {
        &self.addr_ranges
    }

    /// The block's identity: the low address of its first range.
    pub fn entry_addr(&self) -> u64 {
        self.addr_ranges[0].low
    }

    /// The high address of the last range.
    pub fn last_addr(&self) -> u64 {
        self.addr_ranges[self.addr_ranges.len() - 1].high
    }

    pub fn contains(&self, addr: u64) -> bool {
        self.addr_ranges.iter().any(|r| r.contains(addr))
    }

    pub fn callees(&self) -> &[String] {
        &self.callees
    }

    pub fn add_callee(&mut self, callee: impl Into<String>) {
        self.callees.push(callee.into());
    }

    /// Peel the tail of the block starting at `trim_addr`, returning the
    /// trimmed ranges (they become the new block `[trim_addr..]` in a
    /// split).
    ///
    /// If `trim_addr` is the low address of a range, that range and all
    /// subsequent ranges are removed and returned. Otherwise the range
    /// containing `trim_addr` is shortened to end at `trim_addr -
    /// insn_size` (the last address of the instruction preceding the trim
    /// point) and `[trim_addr, old_high]` plus all subsequent ranges are
    /// returned. Returns an empty vector when no range contains
    /// `trim_addr`.
    ///
    /// `range_hint` is a fast-path index into the range list; it is only
    /// trusted when in bounds and actually containing `trim_addr`.
    pub fn trim(&mut self, trim_addr: u64, insn_size: u64, range_hint: usize) -> Vec<AddrRange> {
        let mut trimmed = Vec::new();

        let start = if range_hint > 0
            && range_hint < self.addr_ranges.len()
            && self.addr_ranges[range_hint].contains(trim_addr)
        {
            range_hint
        } else {
            0
        };

        let mut cut = None;
        for idx in start..self.addr_ranges.len() {
            let range = self.addr_ranges[idx];
            if trim_addr == range.low {
                cut = Some(idx);
                break;
            }
            if range.low < trim_addr && trim_addr <= range.high {
                trimmed.push(AddrRange::new(trim_addr, range.high));
                self.addr_ranges[idx].high = trim_addr - insn_size;
                cut = Some(idx + 1);
                break;
            }
        }

        if let Some(idx) = cut {
            trimmed.extend(self.addr_ranges.drain(idx..));
        }
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_mid_range() {
        let mut block = BasicBlock::with_range(0, 0x0, 0x10, BlockKind::Normal);
        let trimmed = block.trim(0x8, 2, 0);
        assert_eq!(trimmed, vec![AddrRange::new(0x8, 0x10)]);
        assert_eq!(block.addr_ranges(), &[AddrRange::new(0x0, 0x6)]);
    }

    #[test]
    fn test_trim_at_range_start_peels_whole_tail() {
        let mut block = BasicBlock::with_range(0, 0x0, 0x6, BlockKind::Normal);
        block.push_range(0x10, 0x18);
        let trimmed = block.trim(0x10, 2, 0);
        assert_eq!(trimmed, vec![AddrRange::new(0x10, 0x18)]);
        assert_eq!(block.addr_ranges(), &[AddrRange::new(0x0, 0x6)]);
        assert_eq!(block.entry_addr(), 0x0);
    }

    #[test]
    fn test_trim_carries_subsequent_ranges() {
        let mut block = BasicBlock::with_range(0, 0x0, 0x8, BlockKind::Normal);
        block.push_range(0x20, 0x28);
        let trimmed = block.trim(0x4, 2, 0);
        assert_eq!(
            trimmed,
            vec![AddrRange::new(0x4, 0x8), AddrRange::new(0x20, 0x28)]
        );
        assert_eq!(block.addr_ranges(), &[AddrRange::new(0x0, 0x2)]);
    }

    #[test]
    fn test_trim_with_hint() {
        let mut block = BasicBlock::with_range(0, 0x0, 0x8, BlockKind::Normal);
        block.push_range(0x20, 0x28);
        let trimmed = block.trim(0x24, 2, 1);
        assert_eq!(trimmed, vec![AddrRange::new(0x24, 0x28)]);
        assert_eq!(
            block.addr_ranges(),
            &[AddrRange::new(0x0, 0x8), AddrRange::new(0x20, 0x22)]
        );
    }

    #[test]
    fn test_trim_outside_any_range() {
        let mut block = BasicBlock::with_range(0, 0x0, 0x8, BlockKind::Normal);
        assert!(block.trim(0x40, 2, 0).is_empty());
        assert_eq!(block.addr_ranges(), &[AddrRange::new(0x0, 0x8)]);
    }

    #[test]
    fn test_entry_and_last_addr() {
        let mut block = BasicBlock::with_range(3, 0x10, 0x14, BlockKind::Call);
        block.push_range(0x30, 0x38);
        assert_eq!(block.entry_addr(), 0x10);
        assert_eq!(block.last_addr(), 0x38);
        assert!(block.contains(0x32));
        assert!(!block.contains(0x20));
    }
}
