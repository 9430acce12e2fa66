//! Forward traversal of the CFG with per-path abstract state.
//!
//! The iterator visits every reachable block exactly once, in an order where
//! a block's single predecessor, or all forward predecessors of a merge, come
//! first. State is cloned only where control flow duplicates it:
//! - after a block with several successors (`after_split`),
//! - when entering a loop (the state kept for `loop_ends`),
//! - at merges, where the closure builds a fresh state from all inputs.
//!
//! Along single-successor edges the state is moved, not copied.

use rustc_hash::FxHashMap;

use super::arena::BitSet;
use super::cfg::{BlockId, Cfg};
use super::graph::Graph;

/// Hooks called by [`BlockIterator::apply`].
pub trait BlockClosure {
    /// Abstract state flowing along one control-flow path.
    type State: Clone;

    /// Error that aborts the traversal.
    type Error;

    /// Process the scheduled nodes of a block.
    fn process_block(&mut self, block: BlockId, state: &mut Self::State)
        -> Result<(), Self::Error>;

    /// Combine the end states of all predecessors of a merge block, given in
    /// predecessor order.
    fn merge(
        &mut self,
        merge: BlockId,
        states: Vec<Self::State>,
    ) -> Result<Self::State, Self::Error>;

    /// Derive the state entering a loop from the state before it.
    fn loop_begin(
        &mut self,
        header: BlockId,
        state: Self::State,
    ) -> Result<Self::State, Self::Error>;

    /// Reconcile the back-edge states of a loop, in back-edge order, with the
    /// state its header was entered with.
    fn loop_ends(
        &mut self,
        header: BlockId,
        header_state: &Self::State,
        end_states: Vec<Self::State>,
    ) -> Result<(), Self::Error>;

    /// State for one successor of a block with several successors.
    fn after_split(&mut self, _successor: BlockId, state: &Self::State) -> Self::State {
        state.clone()
    }
}

/// Drives a [`BlockClosure`] over a CFG.
pub struct BlockIterator<'a> {
    cfg: &'a Cfg,
    loop_headers: BitSet,
    merges: BitSet,
}

impl<'a> BlockIterator<'a> {
    /// Create an iterator over `cfg`, which must have been built from
    /// `graph`.
    pub fn new(graph: &Graph, cfg: &'a Cfg) -> Self {
        let mut loop_headers = BitSet::with_capacity(cfg.len());
        let mut merges = BitSet::with_capacity(cfg.len());
        for (id, _) in cfg.iter() {
            if cfg.is_loop_header(graph, id) {
                loop_headers.insert(id.as_usize());
            } else if cfg.is_merge(graph, id) {
                merges.insert(id.as_usize());
            }
        }
        BlockIterator {
            cfg,
            loop_headers,
            merges,
        }
    }

    /// Run the traversal from the entry block.
    pub fn apply<C: BlockClosure>(&self, closure: &mut C, initial: C::State) -> Result<(), C::Error> {
        let cfg = self.cfg;
        let mut visited = BitSet::with_capacity(cfg.len());
        let mut pending: FxHashMap<BlockId, Vec<Option<C::State>>> = FxHashMap::default();
        let mut loop_states: FxHashMap<BlockId, C::State> = FxHashMap::default();
        let mut stack = vec![(cfg.entry, initial)];

        while let Some((block, mut state)) = stack.pop() {
            assert!(
                visited.insert(block.as_usize()),
                "block {:?} visited twice",
                block
            );
            closure.process_block(block, &mut state)?;

            let successors = &cfg.block(block).successors;
            if successors.len() > 1 {
                for &successor in successors.iter().rev() {
                    let split = closure.after_split(successor, &state);
                    stack.push((successor, split));
                }
                continue;
            }
            let Some(&successor) = successors.first() else {
                continue;
            };

            let predecessors = &cfg.block(successor).predecessors;
            let Some(index) = predecessors.iter().position(|&p| p == block) else {
                unreachable!("{:?} is not a predecessor of {:?}", block, successor);
            };

            if self.loop_headers.contains(successor.as_usize()) {
                if index == 0 {
                    let entered = closure.loop_begin(successor, state)?;
                    loop_states.insert(successor, entered.clone());
                    stack.push((successor, entered));
                    continue;
                }
                let ends = pending
                    .entry(successor)
                    .or_insert_with(|| vec![None; predecessors.len() - 1]);
                ends[index - 1] = Some(state);
                if ends.iter().all(Option::is_some) {
                    let ends: Vec<C::State> = pending
                        .remove(&successor)
                        .into_iter()
                        .flatten()
                        .flatten()
                        .collect();
                    let Some(header_state) = loop_states.remove(&successor) else {
                        unreachable!("back edge of {:?} before its loop entry", successor);
                    };
                    closure.loop_ends(successor, &header_state, ends)?;
                }
            } else if self.merges.contains(successor.as_usize()) {
                let states = pending
                    .entry(successor)
                    .or_insert_with(|| vec![None; predecessors.len()]);
                states[index] = Some(state);
                if states.iter().all(Option::is_some) {
                    let states: Vec<C::State> = pending
                        .remove(&successor)
                        .into_iter()
                        .flatten()
                        .flatten()
                        .collect();
                    let merged = closure.merge(successor, states)?;
                    stack.push((successor, merged));
                }
            } else {
                stack.push((successor, state));
            }
        }

        debug_assert!(pending.is_empty(), "unfinished merges: {:?}", pending.keys());
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::{ArithmeticBuilder, ControlBuilder, GraphBuilder};
    use crate::ir::types::ValueKind;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Path state that counts how often it is cloned.
    struct Path {
        blocks: Vec<BlockId>,
        clones: Rc<Cell<usize>>,
    }

    impl Clone for Path {
        fn clone(&self) -> Self {
            self.clones.set(self.clones.get() + 1);
            Path {
                blocks: self.blocks.clone(),
                clones: self.clones.clone(),
            }
        }
    }

    #[derive(Default)]
    struct Recorder {
        processed: Vec<BlockId>,
        merges: Vec<(BlockId, Vec<Vec<BlockId>>)>,
        loop_ends: Vec<(BlockId, usize)>,
        fail_at: Option<BlockId>,
    }

    impl BlockClosure for Recorder {
        type State = Path;
        type Error = BlockId;

        fn process_block(&mut self, block: BlockId, state: &mut Path) -> Result<(), BlockId> {
            if self.fail_at == Some(block) {
                return Err(block);
            }
            self.processed.push(block);
            state.blocks.push(block);
            Ok(())
        }

        fn merge(&mut self, merge: BlockId, states: Vec<Path>) -> Result<Path, BlockId> {
            self.merges
                .push((merge, states.iter().map(|s| s.blocks.clone()).collect()));
            let mut states = states;
            states.truncate(1);
            states.pop().ok_or(merge)
        }

        fn loop_begin(&mut self, _header: BlockId, state: Path) -> Result<Path, BlockId> {
            Ok(state)
        }

        fn loop_ends(
            &mut self,
            header: BlockId,
            _header_state: &Path,
            end_states: Vec<Path>,
        ) -> Result<(), BlockId> {
            self.loop_ends.push((header, end_states.len()));
            Ok(())
        }
    }

    fn initial(clones: &Rc<Cell<usize>>) -> Path {
        Path {
            blocks: Vec::new(),
            clones: clones.clone(),
        }
    }

    #[test]
    fn test_diamond_merges_in_predecessor_order() {
        let mut b = GraphBuilder::new(&[ValueKind::Bool]);
        let cond = b.parameter(0);
        let (t, f) = b.branch(cond);
        b.begin(t);
        let e1 = b.end();
        b.begin(f);
        let e2 = b.end();
        b.merge(&[e2, e1]);
        b.return_value(None);
        let g = b.finish();

        let cfg = Cfg::build(&g);
        let clones = Rc::new(Cell::new(0));
        let mut recorder = Recorder::default();
        BlockIterator::new(&g, &cfg)
            .apply(&mut recorder, initial(&clones))
            .unwrap();

        assert_eq!(recorder.processed.len(), 4);
        assert_eq!(clones.get(), 2);
        let (merge, states) = &recorder.merges[0];
        assert_eq!(*recorder.processed.last().unwrap(), *merge);
        let false_block = cfg.block_of(f).unwrap();
        let true_block = cfg.block_of(t).unwrap();
        assert_eq!(states[0].last(), Some(&false_block));
        assert_eq!(states[1].last(), Some(&true_block));
    }

    #[test]
    fn test_loop_ends_called_once_with_all_back_edges() {
        let mut b = GraphBuilder::new(&[ValueKind::Bool, ValueKind::Bool]);
        let c0 = b.parameter(0);
        let c1 = b.parameter(1);
        let header = b.loop_begin();
        let (body, exit) = b.branch(c0);
        b.begin(body);
        let (again, other) = b.branch(c1);
        b.begin(again);
        b.loop_end(header);
        b.begin(other);
        b.loop_end(header);
        b.begin(exit);
        b.loop_exit(header);
        let zero = b.const_int(0);
        b.return_value(Some(zero));
        let g = b.finish();

        let cfg = Cfg::build(&g);
        let clones = Rc::new(Cell::new(0));
        let mut recorder = Recorder::default();
        BlockIterator::new(&g, &cfg)
            .apply(&mut recorder, initial(&clones))
            .unwrap();

        let header_block = cfg.block_of(header).unwrap();
        assert_eq!(recorder.loop_ends, vec![(header_block, 2)]);
        assert_eq!(recorder.processed.len(), cfg.len());
    }

    #[test]
    fn test_straight_line_state_is_not_cloned() {
        let mut b = GraphBuilder::new(&[]);
        let e = b.end();
        b.merge(&[e]);
        b.return_value(None);
        let g = b.finish();

        let cfg = Cfg::build(&g);
        let clones = Rc::new(Cell::new(0));
        let mut recorder = Recorder::default();
        BlockIterator::new(&g, &cfg)
            .apply(&mut recorder, initial(&clones))
            .unwrap();
        assert_eq!(recorder.processed.len(), 2);
        assert_eq!(clones.get(), 0);
    }

    #[test]
    fn test_error_stops_traversal() {
        let mut b = GraphBuilder::new(&[ValueKind::Bool]);
        let cond = b.parameter(0);
        let (t, f) = b.branch(cond);
        b.begin(t);
        b.return_value(None);
        b.begin(f);
        b.return_value(None);
        let g = b.finish();

        let cfg = Cfg::build(&g);
        let failing = cfg.block_of(t).unwrap();
        let clones = Rc::new(Cell::new(0));
        let mut recorder = Recorder {
            fail_at: Some(failing),
            ..Recorder::default()
        };
        let result = BlockIterator::new(&g, &cfg).apply(&mut recorder, initial(&clones));
        assert_eq!(result.err(), Some(failing));
        assert_eq!(recorder.processed, vec![cfg.entry]);
    }
}
