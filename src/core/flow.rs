//! The mutable CFG of a single function.
//!
//! A `Flow` owns its basic blocks, keyed by entry address, together with
//! two edge maps that are mutual transposes at all times, the post-entry
//! marker, the pre-exit set and the call-site metadata. All mutators
//! return `bool` for business-rule failures and only assert on structural
//! invariants that cannot be violated by well-formed callers.

use std::collections::{BTreeMap, BTreeSet};

use crate::core::basic_block::{AddrRange, BasicBlock, BlockKind};

/// Blocks keyed by entry address.
pub type BlockMap = BTreeMap<u64, BasicBlock>;

/// Adjacency keyed by block entry address. Values keep insertion order and
/// never contain duplicates.
pub type EdgeMap = BTreeMap<u64, Vec<u64>>;

/// Where to cut a block in [`Flow::split_block`]: the instruction ending
/// at `insn_addr` stays in the original block, everything from
/// `insn_addr + insn_size` onward moves to the new block. `range_hint`
/// indexes the address range expected to contain the boundary.
#[derive(Debug, Clone, Copy)]
pub struct SplitLocation {
    pub insn_addr: u64,
    pub insn_size: u64,
    pub range_hint: usize,
}

/// The control-flow graph of one function.
#[derive(Debug, Clone, Default)]
pub struct Flow {
    name: String,
    bb_count: usize,
    blocks: BlockMap,
    out_edges: EdgeMap,
    in_edges: EdgeMap,
    post_entry: u64,
    pre_exits: BTreeSet<u64>,
    call_sites: BTreeSet<u64>,
    call_targets: BTreeMap<u64, Vec<u64>>,
}

impl Flow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_block_present(&self, entry: u64) -> bool {
        self.blocks.contains_key(&entry)
    }

    /// Create a single-range block iff no block has this entry address.
    pub fn add_contiguous_block(&mut self, low: u64, high: u64, kind: BlockKind) -> bool {
        if self.is_block_present(low) {
            return false;
        }
        let block = BasicBlock::with_range(self.bb_count, low, high, kind);
        self.bb_count += 1;
        self.blocks.insert(low, block);
        true
    }

    /// Append address ranges to an existing block, preserving order.
    pub fn insert_ranges(&mut self, entry: u64, ranges: &[AddrRange]) -> bool {
        let Some(block) = self.blocks.get_mut(&entry) else {
            return false;
        };
        for range in ranges {
            block.push_range(range.low, range.high);
        }
        true
    }

    /// Remove a block along with its edges and its pre-exit mark.
    ///
    /// With `update_entry`, a removed post-entry block re-points the
    /// marker to its unique successor; calling this on a post-entry block
    /// with zero or multiple successors is a programming error.
    pub fn remove_block(&mut self, entry: u64, update_entry: bool) -> bool {
        if !self.blocks.contains_key(&entry) {
            return false;
        }

        if entry == self.post_entry && update_entry {
            let succs = self.out_edges.get(&entry).map(Vec::as_slice).unwrap_or(&[]);
            assert!(
                succs.len() == 1,
                "cannot remove post-entry block without a unique successor"
            );
            self.post_entry = succs[0];
        }

        self.pre_exits.remove(&entry);
        self.blocks.remove(&entry);

        for dst in self.out_edges.remove(&entry).unwrap_or_default() {
            Self::unlink(&mut self.in_edges, dst, entry);
        }
        for src in self.in_edges.remove(&entry).unwrap_or_default() {
            Self::unlink(&mut self.out_edges, src, entry);
        }
        true
    }

    /// Split a block at `split_loc`.
    ///
    /// The trimmed tail becomes a new block that inherits the original
    /// kind, the outgoing edges and (if set) the pre-exit mark; a single
    /// edge original -> new is added. Returns the entry address of the new
    /// block, or `None` when a block already starts right after the
    /// boundary, the boundary is the block's last address, or no range
    /// contains the boundary.
    pub fn split_block(&mut self, entry: u64, split_loc: SplitLocation) -> Option<u64> {
        let new_start = split_loc.insn_addr + split_loc.insn_size;
        if self.blocks.contains_key(&new_start) {
            return None;
        }

        let block = self.blocks.get_mut(&entry)?;
        if split_loc.insn_addr == block.last_addr() {
            return None;
        }

        let trimmed = block.trim(new_start, split_loc.insn_size, split_loc.range_hint);
        if trimmed.is_empty() {
            return None;
        }

        // Trimming never reorders ranges, but re-key unconditionally from
        // the block's own view of its entry in case that ever changes.
        let current_entry = block.entry_addr();
        let kind = block.kind();
        if current_entry != entry {
            let block = self.blocks.remove(&entry).unwrap();
            self.blocks.insert(current_entry, block);
        }

        let mut new_block = BasicBlock::new(self.bb_count, kind);
        self.bb_count += 1;
        for range in &trimmed {
            new_block.push_range(range.low, range.high);
        }
        let new_entry = trimmed[0].low;
        self.blocks.insert(new_entry, new_block);

        if self.pre_exits.remove(&current_entry) {
            self.pre_exits.insert(new_entry);
        }

        for dst in self.out_edges(current_entry).to_vec() {
            self.remove_edge(current_entry, dst);
            self.add_edge(new_entry, dst);
        }
        self.add_edge(current_entry, new_entry);

        Some(new_entry)
    }

    /// Add an edge, deduplicating and keeping the transpose in sync.
    pub fn add_edge(&mut self, src: u64, dst: u64) {
        let outs = self.out_edges.entry(src).or_default();
        if outs.contains(&dst) {
            return;
        }
        outs.push(dst);
        self.in_edges.entry(dst).or_default().push(src);
    }

    /// Remove an edge from both maps. Returns false if it was not present.
    pub fn remove_edge(&mut self, src: u64, dst: u64) -> bool {
        if !Self::unlink(&mut self.out_edges, src, dst) {
            return false;
        }
        let removed = Self::unlink(&mut self.in_edges, dst, src);
        debug_assert!(removed, "edge maps out of sync");
        true
    }

    fn unlink(map: &mut EdgeMap, key: u64, value: u64) -> bool {
        let Some(values) = map.get_mut(&key) else {
            return false;
        };
        let Some(pos) = values.iter().position(|&v| v == value) else {
            return false;
        };
        values.remove(pos);
        if values.is_empty() {
            map.remove(&key);
        }
        true
    }

    pub fn mark_post_entry(&mut self, addr: u64) {
        tracing::debug!(addr = format_args!("{addr:#x}"), "post-entry block");
        self.post_entry = addr;
    }

    pub fn mark_pre_exit(&mut self, addr: u64) {
        self.pre_exits.insert(addr);
    }

    pub fn mark_call_site(&mut self, site: u64, targets: Vec<u64>) {
        self.call_sites.insert(site);
        self.call_targets.insert(site, targets);
    }

    pub fn is_post_entry(&self, addr: u64) -> bool {
        self.post_entry == addr
    }

    pub fn is_pre_exit(&self, addr: u64) -> bool {
        self.pre_exits.contains(&addr)
    }

    /// True iff any recorded call site falls inside one of the block's
    /// address ranges.
    pub fn has_calls(&self, block: &BasicBlock) -> bool {
        block
            .addr_ranges()
            .iter()
            .any(|r| self.call_sites.range(r.low..=r.high).next().is_some())
    }

    pub fn blocks(&self) -> &BlockMap {
        &self.blocks
    }

    pub fn block_mut(&mut self, entry: u64) -> Option<&mut BasicBlock> {
        self.blocks.get_mut(&entry)
    }

    pub fn out_edges(&self, entry: u64) -> &[u64] {
        self.out_edges.get(&entry).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn in_edges(&self, entry: u64) -> &[u64] {
        self.in_edges.get(&entry).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All edges as (src, dst) pairs in deterministic order.
    pub fn edges(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.out_edges
            .iter()
            .flat_map(|(&src, dsts)| dsts.iter().map(move |&dst| (src, dst)))
    }

    pub fn post_entry(&self) -> u64 {
        self.post_entry
    }

    pub fn pre_exits(&self) -> &BTreeSet<u64> {
        &self.pre_exits
    }

    pub fn call_sites(&self) -> &BTreeSet<u64> {
        &self.call_sites
    }

    pub fn call_targets(&self) -> &BTreeMap<u64, Vec<u64>> {
        &self.call_targets
    }

    /// Reassign block ids to 0..n-1 in ascending entry order.
    pub fn renumber_blocks(&mut self) {
        for (id, block) in self.blocks.values_mut().enumerate() {
            block.set_id(id);
        }
        self.bb_count = self.blocks.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_block_flow() -> Flow {
        let mut flow = Flow::new("f");
        assert!(flow.add_contiguous_block(0x0, 0x6, BlockKind::Normal));
        assert!(flow.add_contiguous_block(0x8, 0xc, BlockKind::Normal));
        flow.mark_post_entry(0x0);
        flow.add_edge(0x0, 0x8);
        flow
    }

    #[test]
    fn test_add_block_fails_on_duplicate_entry() {
        let mut flow = two_block_flow();
        assert!(!flow.add_contiguous_block(0x0, 0x2, BlockKind::Normal));
    }

    #[test]
    fn test_edges_are_transposed_and_deduplicated() {
        let mut flow = two_block_flow();
        flow.add_edge(0x0, 0x8);
        assert_eq!(flow.out_edges(0x0), &[0x8]);
        assert_eq!(flow.in_edges(0x8), &[0x0]);

        assert!(flow.remove_edge(0x0, 0x8));
        assert!(flow.out_edges(0x0).is_empty());
        assert!(flow.in_edges(0x8).is_empty());
        assert!(!flow.remove_edge(0x0, 0x8));
    }

    #[test]
    fn test_remove_block_clears_edges_and_marks() {
        let mut flow = two_block_flow();
        flow.mark_pre_exit(0x8);
        assert!(flow.remove_block(0x8, false));
        assert!(!flow.is_block_present(0x8));
        assert!(flow.out_edges(0x0).is_empty());
        assert!(!flow.is_pre_exit(0x8));
    }

    #[test]
    fn test_remove_block_updates_post_entry() {
        let mut flow = two_block_flow();
        assert!(flow.remove_block(0x0, true));
        assert_eq!(flow.post_entry(), 0x8);
    }

    #[test]
    fn test_split_block_moves_edges_and_pre_exit() {
        let mut flow = Flow::new("f");
        flow.add_contiguous_block(0x0, 0x8, BlockKind::Normal);
        flow.add_contiguous_block(0x10, 0x12, BlockKind::Normal);
        flow.add_edge(0x0, 0x10);
        flow.mark_pre_exit(0x0);

        let new_entry = flow
            .split_block(
                0x0,
                SplitLocation {
                    insn_addr: 0x2,
                    insn_size: 2,
                    range_hint: 0,
                },
            )
            .expect("split");
        assert_eq!(new_entry, 0x4);
        assert_eq!(flow.out_edges(0x0), &[0x4]);
        assert_eq!(flow.out_edges(0x4), &[0x10]);
        assert!(flow.is_pre_exit(0x4));
        assert!(!flow.is_pre_exit(0x0));
        assert_eq!(flow.blocks()[&0x0].addr_ranges(), &[AddrRange::new(0, 2)]);
        assert_eq!(flow.blocks()[&0x4].addr_ranges(), &[AddrRange::new(4, 8)]);
    }

    #[test]
    fn test_split_block_rejects_existing_successor_block() {
        let mut flow = Flow::new("f");
        flow.add_contiguous_block(0x0, 0x8, BlockKind::Normal);
        flow.add_contiguous_block(0x4, 0x6, BlockKind::Normal);
        let split = flow.split_block(
            0x0,
            SplitLocation {
                insn_addr: 0x2,
                insn_size: 2,
                range_hint: 0,
            },
        );
        assert!(split.is_none());
    }

    #[test]
    fn test_split_block_rejects_block_end() {
        let mut flow = Flow::new("f");
        flow.add_contiguous_block(0x0, 0x8, BlockKind::Normal);
        let split = flow.split_block(
            0x0,
            SplitLocation {
                insn_addr: 0x8,
                insn_size: 2,
                range_hint: 0,
            },
        );
        assert!(split.is_none());
    }

    #[test]
    fn test_has_calls() {
        let mut flow = Flow::new("f");
        flow.add_contiguous_block(0x0, 0x8, BlockKind::Normal);
        flow.mark_call_site(0x4, vec![0x100]);
        let block = flow.blocks()[&0x0].clone();
        assert!(flow.has_calls(&block));
        let other = BasicBlock::with_range(9, 0x20, 0x28, BlockKind::Normal);
        assert!(!flow.has_calls(&other));
    }

    #[test]
    fn test_renumber_blocks() {
        let mut flow = Flow::new("f");
        flow.add_contiguous_block(0x8, 0xc, BlockKind::Normal);
        flow.add_contiguous_block(0x0, 0x6, BlockKind::Normal);
        flow.renumber_blocks();
        assert_eq!(flow.blocks()[&0x0].id(), 0);
        assert_eq!(flow.blocks()[&0x8].id(), 1);
    }
}
