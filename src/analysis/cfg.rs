//! Function discovery and per-function CFG construction.
//!
//! The generator runs in phases over one disassembled section: function
//! discovery from resolvable call sites, worklist-based reachable-address
//! exploration that creates contiguous blocks and edges, then three
//! refinement passes (overlap fix-up, jump-block merging, call-site
//! normalization) followed by callee symbolization.
//!
//! The approach assumes no intentional obfuscation (e.g. rerouting all
//! calls through a single dispatcher). Functions partially "inlined" via
//! branches instead of calls are not a problem; they only enlarge the
//! code region attributed to a function.

use std::collections::{btree_map, BTreeMap, VecDeque};

use tracing::{debug, info, warn};

use crate::arch::{self, Instruction, InstructionDecoder};
use crate::core::basic_block::BlockKind;
use crate::core::disasm::{DisasmInstruction, DisasmSection, InsnMap, SymbMap};
use crate::core::flow::{Flow, SplitLocation};
use crate::error::{BincfgError, Result};

/// Discovered function entries: entry address -> name.
pub type FuncMap = BTreeMap<u64, String>;

/// One flow per discovered function, keyed by entry address.
pub type FlowMap = BTreeMap<u64, Flow>;

/// Reconstructs control-flow graphs for one architecture.
pub struct FlowGenerator {
    decoder: InstructionDecoder,
    ignore_errors: bool,
}

impl FlowGenerator {
    pub fn new(decoder: InstructionDecoder, ignore_errors: bool) -> Self {
        Self {
            decoder,
            ignore_errors,
        }
    }

    /// Factory entry point: map an architecture name to its generator.
    pub fn for_arch(arch: &str, ignore_errors: bool) -> Result<Self> {
        arch::for_arch(arch)
            .map(|decoder| Self::new(decoder, ignore_errors))
            .ok_or_else(|| BincfgError::UnsupportedArchitecture(arch.to_string()))
    }

    pub fn decoder(&self) -> InstructionDecoder {
        self.decoder
    }

    /// Classify one disassembled instruction with this generator's error
    /// policy.
    pub fn instruction(&self, disasm: &DisasmInstruction) -> Result<Instruction> {
        self.decoder.parse(disasm, self.ignore_errors)
    }

    /// Phase A: discover function entries from call instructions with a
    /// single resolvable target. Targets with a symbol use its name;
    /// others get a synthesized `<context>+0x<offset>` name.
    pub fn find_functions(&self, section: &DisasmSection) -> Result<FuncMap> {
        let mut funcs = FuncMap::new();

        for (&addr, disasm) in section.instructions() {
            let Some(target) = self.call_target(disasm, addr)? else {
                continue;
            };
            if funcs.contains_key(&target) {
                continue;
            }
            let name = match section.symbols().get(&target) {
                Some(symbol) => symbol.clone(),
                None => match section.symbol_context(target) {
                    Some((symbol_addr, symbol)) => {
                        format!("{symbol}+{:#x}", target - symbol_addr)
                    }
                    None => format!("{target:#x}"),
                },
            };
            funcs.insert(target, name);
        }

        Ok(funcs)
    }

    /// Generate flows for every function found in the section.
    pub fn generate_flows(&self, section: &DisasmSection) -> Result<FlowMap> {
        let funcs = self.find_functions(section)?;
        let mut flows = FlowMap::new();

        for (&entry, name) in &funcs {
            info!(
                function = %name,
                addr = format_args!("{entry:#x}"),
                "creating flow"
            );
            flows.insert(entry, self.create_func_flow(section, entry, name)?);
        }

        Ok(flows)
    }

    fn create_func_flow(&self, section: &DisasmSection, entry: u64, name: &str) -> Result<Flow> {
        let insns = section.instructions();
        let mut flow = Flow::new(name);

        // Phase B: worklist exploration. Edges are recorded when a
        // candidate is enqueued; re-visits only bump the reference count.
        let mut ref_count: BTreeMap<u64, usize> = BTreeMap::new();
        let mut queue: VecDeque<u64> = VecDeque::new();

        queue.push_back(entry);
        flow.mark_post_entry(entry);

        while let Some(candidate) = queue.pop_front() {
            match ref_count.entry(candidate) {
                btree_map::Entry::Occupied(mut seen) => {
                    *seen.get_mut() += 1;
                    continue;
                }
                btree_map::Entry::Vacant(slot) => {
                    slot.insert(1);
                }
            }

            if !insns.contains_key(&candidate) {
                if !self.ignore_errors {
                    return Err(BincfgError::invariant(
                        candidate,
                        "block candidate not in instruction map",
                    ));
                }
                warn!(
                    addr = format_args!("{candidate:#x}"),
                    "block candidate not in instruction map, skipped"
                );
                continue;
            }

            for (&addr, disasm) in insns.range(candidate..) {
                if self.update_worklist(addr, disasm, insns, &mut queue, &mut flow, candidate)? {
                    break;
                }
            }
        }

        self.fix_overlaps(insns, &mut flow)?;
        self.merge_jump_blocks(insns, &mut flow)?;
        self.normalize_call_blocks(insns, &mut flow)?;
        self.symbolize(section.symbols(), &mut flow)?;
        flow.renumber_blocks();

        Ok(flow)
    }

    /// Process one instruction of the current block walk. Returns true
    /// when the walk for this work item is finished (a block has been
    /// added along with its outgoing edges).
    fn update_worklist(
        &self,
        addr: u64,
        disasm: &DisasmInstruction,
        insns: &InsnMap,
        queue: &mut VecDeque<u64>,
        flow: &mut Flow,
        start: u64,
    ) -> Result<bool> {
        let insn = self.instruction(disasm)?;
        let size = insn.size();
        let mut done = false;

        fn push_candidate(queue: &mut VecDeque<u64>, flow: &mut Flow, start: u64, target: u64) {
            queue.push_back(target);
            flow.add_edge(start, target);
        }

        if insn.is_skip() {
            done = true;

            // The instruction following the skip, and the one after the
            // skipped instruction.
            push_candidate(queue, flow, start, addr + size);
            match insns.get(&(addr + size)) {
                Some(skipped) => {
                    let skipped = self.instruction(skipped)?;
                    push_candidate(queue, flow, start, addr + size + skipped.size());
                }
                None => {
                    if !self.ignore_errors {
                        return Err(BincfgError::invariant(
                            addr + size,
                            "skipped instruction not in instruction map",
                        ));
                    }
                    warn!(
                        addr = format_args!("{:#x}", addr + size),
                        "skipped instruction not in instruction map"
                    );
                }
            }
            flow.add_contiguous_block(start, addr, BlockKind::Normal);
        }

        if insn.is_branch() {
            done = true;

            if let Some(target) = self.single_target(&insn, addr)? {
                push_candidate(queue, flow, start, target);
            }
            push_candidate(queue, flow, start, addr + size);
            flow.add_contiguous_block(start, addr, BlockKind::Normal);
        }

        if insn.is_jump() {
            done = true;

            if let Some(target) = self.single_target(&insn, addr)? {
                push_candidate(queue, flow, start, target);
            }
            flow.add_contiguous_block(start, addr, BlockKind::Normal);
        }

        if insn.is_return() {
            done = true;

            flow.add_contiguous_block(start, addr, BlockKind::Normal);
            flow.mark_pre_exit(start);
        }

        if insn.is_call() {
            let targets = insn.targets(addr);
            if targets.len() != 1 {
                if !self.ignore_errors {
                    return Err(BincfgError::invariant(addr, "indirect call not supported"));
                }
                warn!(
                    addr = format_args!("{addr:#x}"),
                    "indirect call treated as fall-through"
                );
            } else if targets[0] != addr + size {
                flow.mark_call_site(addr, targets);
            } else if insn.mnemonic() == "RCALL" {
                // Known compiler shortcut to push a word onto the stack.
                debug!(
                    addr = format_args!("{addr:#x}"),
                    "ignoring rcall .+0 instruction"
                );
            } else {
                warn!(
                    addr = format_args!("{addr:#x}"),
                    "ignoring call instruction targeting its own successor"
                );
            }
        }

        Ok(done)
    }

    /// Resolve the single target a branch or jump promises. In
    /// ignore-errors mode a missing or ambiguous target downgrades to a
    /// warning and the edge is not added.
    fn single_target(&self, insn: &Instruction, addr: u64) -> Result<Option<u64>> {
        let targets = insn.targets(addr);
        if targets.len() == 1 {
            return Ok(Some(targets[0]));
        }
        if !self.ignore_errors {
            return Err(BincfgError::invariant(
                addr,
                "expected exactly one target address",
            ));
        }
        warn!(
            addr = format_args!("{addr:#x}"),
            count = targets.len(),
            "expected exactly one target address, edge dropped"
        );
        Ok(None)
    }

    fn call_target(&self, disasm: &DisasmInstruction, addr: u64) -> Result<Option<u64>> {
        let insn = self.instruction(disasm)?;
        if !insn.is_call() {
            return Ok(None);
        }

        let targets = insn.targets(addr);
        if targets.len() != 1 {
            if !self.ignore_errors {
                return Err(BincfgError::invariant(
                    addr,
                    "call with other than one target address",
                ));
            }
            return Ok(None);
        }

        if targets[0] == addr + insn.size() {
            debug!(
                addr = format_args!("{addr:#x}"),
                "call instruction does not lead to a function call"
            );
            return Ok(None);
        }

        Ok(Some(targets[0]))
    }

    /// Phase C: a block may contain the entry of another block when an
    /// earlier walk extended past a later-discovered leader. A single
    /// ascending pass suffices because each fix only shortens blocks.
    fn fix_overlaps(&self, insns: &InsnMap, flow: &mut Flow) -> Result<()> {
        let entries: Vec<u64> = flow.blocks().keys().copied().collect();

        for entry in entries {
            let block = &flow.blocks()[&entry];
            debug_assert_eq!(
                block.addr_ranges().len(),
                1,
                "blocks are contiguous before overlap fix-up"
            );
            let range = block.addr_ranges()[0];
            if range.low == range.high {
                continue;
            }

            // The smallest entry strictly inside (low, high]; an entry at
            // the address right after `high` abuts cleanly and is fine.
            let overlap = flow
                .blocks()
                .range((
                    std::ops::Bound::Excluded(entry),
                    std::ops::Bound::Included(range.high),
                ))
                .next()
                .map(|(&a, _)| a);
            let Some(overlap) = overlap else {
                continue;
            };

            let Some((_, before)) = insns.range(..overlap).next_back() else {
                if !self.ignore_errors {
                    return Err(BincfgError::invariant(
                        overlap,
                        "no instruction precedes overlapped block entry",
                    ));
                }
                warn!(
                    addr = format_args!("{overlap:#x}"),
                    "no instruction precedes overlapped block entry"
                );
                continue;
            };
            let new_high = overlap - self.instruction(before)?.size();

            let incoming = flow.in_edges(entry).to_vec();
            flow.remove_block(entry, false);
            flow.add_contiguous_block(entry, new_high, BlockKind::Normal);

            for &src in &incoming {
                // Drop a self loop whose back edge now belongs to the
                // overlapped block.
                if src == entry && incoming.contains(&overlap) {
                    debug!(
                        src = format_args!("{src:#x}"),
                        "skipping degenerate self-loop edge"
                    );
                    continue;
                }
                flow.add_edge(src, entry);
            }
            flow.add_edge(entry, overlap);
        }

        Ok(())
    }

    /// Phase D: a block ending in an unconditional jump absorbs its
    /// unique successor when that successor has exactly one incoming
    /// edge. Merge pairs are collected first and applied afterwards so
    /// the block map is not mutated under the collection scan.
    fn merge_jump_blocks(&self, insns: &InsnMap, flow: &mut Flow) -> Result<()> {
        let mut to_merge: Vec<u64> = Vec::new();

        for (&entry, block) in flow.blocks() {
            let outs = flow.out_edges(entry);
            if outs.len() != 1 {
                continue;
            }
            debug_assert_eq!(
                block.addr_ranges().len(),
                1,
                "blocks are contiguous before jump merging"
            );

            let last = block.last_addr();
            let Some(disasm) = insns.get(&last) else {
                if !self.ignore_errors {
                    return Err(BincfgError::invariant(
                        last,
                        "block end not in instruction map",
                    ));
                }
                warn!(
                    addr = format_args!("{last:#x}"),
                    "block end not in instruction map"
                );
                continue;
            };
            if !self.instruction(disasm)?.is_jump() {
                continue;
            }

            let succ = outs[0];
            if succ != entry && flow.in_edges(succ).len() == 1 {
                to_merge.push(succ);
            }
        }

        for merged in to_merge {
            let Some(block) = flow.blocks().get(&merged) else {
                continue;
            };
            let ranges = block.addr_ranges().to_vec();
            // Re-read the head at apply time: an earlier merge in a jump
            // chain may have redirected this block's incoming edge.
            let head = flow.in_edges(merged)[0];
            let outs = flow.out_edges(merged).to_vec();
            let was_pre_exit = flow.is_pre_exit(merged);

            flow.remove_block(merged, true);
            let inserted = flow.insert_ranges(head, &ranges);
            assert!(inserted, "jump-merge head disappeared");

            debug!(
                head = format_args!("{head:#x}"),
                merged = format_args!("{merged:#x}"),
                "merged jump block"
            );

            for dst in outs {
                flow.add_edge(head, dst);
            }
            if was_pre_exit {
                flow.mark_pre_exit(head);
            }
        }

        Ok(())
    }

    /// Phase E: tag blocks containing call sites as Call and split them
    /// so each call site ends a block.
    fn normalize_call_blocks(&self, insns: &InsnMap, flow: &mut Flow) -> Result<()> {
        let mut remaining = flow.call_sites().clone();
        if remaining.is_empty() {
            return Ok(());
        }

        let entries: Vec<u64> = flow.blocks().keys().copied().collect();
        for entry in entries {
            if remaining.is_empty() {
                break;
            }

            let block = &flow.blocks()[&entry];
            let mut sites: Vec<(u64, usize)> = Vec::new();
            for (index, range) in block.addr_ranges().iter().enumerate() {
                sites.extend(remaining.range(range.low..=range.high).map(|&s| (s, index)));
            }
            if sites.is_empty() {
                continue;
            }

            flow.block_mut(entry).unwrap().set_kind(BlockKind::Call);

            // Split from the last call site backwards so earlier splits
            // do not invalidate later boundaries.
            for &(site, range_hint) in sites.iter().rev() {
                let Some(disasm) = insns.get(&site) else {
                    if !self.ignore_errors {
                        return Err(BincfgError::invariant(
                            site,
                            "call site not in instruction map",
                        ));
                    }
                    warn!(
                        addr = format_args!("{site:#x}"),
                        "call site not in instruction map"
                    );
                    continue;
                };
                let insn_size = self.instruction(disasm)?.size();

                if site == flow.blocks()[&entry].last_addr() {
                    continue;
                }

                debug!(
                    block = format_args!("{entry:#x}"),
                    site = format_args!("{site:#x}"),
                    "splitting block after call site"
                );
                let split = flow.split_block(
                    entry,
                    SplitLocation {
                        insn_addr: site,
                        insn_size,
                        range_hint,
                    },
                );
                let Some(new_entry) = split else {
                    if !self.ignore_errors {
                        return Err(BincfgError::invariant(
                            site,
                            "cannot split block at call site",
                        ));
                    }
                    warn!(
                        addr = format_args!("{site:#x}"),
                        "cannot split block at call site"
                    );
                    continue;
                };

                // The peeled tail ends at a later call site, or holds no
                // call at all.
                let tail_has_call = sites.iter().any(|&(s, _)| s > site);
                flow.block_mut(new_entry)
                    .unwrap()
                    .set_kind(if tail_has_call {
                        BlockKind::Call
                    } else {
                        BlockKind::Normal
                    });
            }

            for (site, _) in sites {
                remaining.remove(&site);
            }
        }

        if let Some(&site) = remaining.iter().next() {
            if !self.ignore_errors {
                return Err(BincfgError::invariant(site, "call site outside any block"));
            }
            warn!(
                addr = format_args!("{site:#x}"),
                "call sites outside any block"
            );
        }

        Ok(())
    }

    /// Resolve callee names for every call block: exact symbol match, or
    /// the target address rendered as hex.
    fn symbolize(&self, symbols: &SymbMap, flow: &mut Flow) -> Result<()> {
        let call_targets = flow.call_targets().clone();
        let mut callee_lists: Vec<(u64, Vec<String>)> = Vec::new();

        for (&entry, block) in flow.blocks() {
            if block.kind() != BlockKind::Call {
                continue;
            }

            let mut callees = Vec::new();
            let mut found = false;
            for range in block.addr_ranges() {
                for (&site, targets) in call_targets.range(range.low..=range.high) {
                    found = true;
                    for &target in targets {
                        let callee = match symbols.get(&target) {
                            Some(symbol) => symbol.clone(),
                            None => format!("{target:#x}"),
                        };
                        debug!(
                            block = format_args!("{entry:#x}"),
                            site = format_args!("{site:#x}"),
                            callee = %callee,
                            "symbolized callee"
                        );
                        callees.push(callee);
                    }
                }
            }

            if !found {
                if !self.ignore_errors {
                    return Err(BincfgError::invariant(
                        entry,
                        "call block without call site",
                    ));
                }
                warn!(
                    addr = format_args!("{entry:#x}"),
                    "call block without call site"
                );
            }
            callee_lists.push((entry, callees));
        }

        for (entry, callees) in callee_lists {
            let block = flow.block_mut(entry).unwrap();
            for callee in callees {
                block.add_callee(callee);
            }
        }

        Ok(())
    }
}
