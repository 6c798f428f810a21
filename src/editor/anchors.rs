use std::collections::HashMap;

use super::document::{ordered, DocPosition, Document};

/// Which side of an insertion made exactly at a tracked position the
/// position ends up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bias {
    /// Stay before text inserted at this position.
    Left,
    /// Move past text inserted at this position.
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AnchorId(u64);

/// One primitive document edit, used to map tracked positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Insert { at: DocPosition, len: usize },
    Delete { from: DocPosition, to: DocPosition },
    Split { at: DocPosition },
    InsertBlocks { index: usize, count: usize },
    RemoveBlock { index: usize },
}

impl Step {
    pub(crate) fn map(&self, pos: DocPosition, bias: Bias) -> DocPosition {
        match *self {
            Step::Insert { at, len } => {
                let after = pos.offset > at.offset || (pos.offset == at.offset && bias == Bias::Right);
                if pos.block == at.block && after {
                    DocPosition::new(pos.block, pos.offset + len)
                } else {
                    pos
                }
            }
            Step::Delete { from, to } => {
                let (from, to) = ordered(from, to);
                if pos <= from {
                    pos
                } else if pos <= to {
                    from
                } else if pos.block == to.block {
                    DocPosition::new(from.block, from.offset + (pos.offset - to.offset))
                } else {
                    DocPosition::new(pos.block - (to.block - from.block), pos.offset)
                }
            }
            Step::Split { at } => {
                if pos.block > at.block {
                    DocPosition::new(pos.block + 1, pos.offset)
                } else if pos.block == at.block
                    && (pos.offset > at.offset || (pos.offset == at.offset && bias == Bias::Right))
                {
                    DocPosition::new(pos.block + 1, pos.offset - at.offset)
                } else {
                    pos
                }
            }
            Step::InsertBlocks { index, count } => {
                if pos.block >= index {
                    DocPosition::new(pos.block + count, pos.offset)
                } else {
                    pos
                }
            }
            Step::RemoveBlock { index } => {
                if pos.block > index {
                    DocPosition::new(pos.block - 1, pos.offset)
                } else if pos.block == index {
                    DocPosition::new(index, 0)
                } else {
                    pos
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Tracked {
    pos: DocPosition,
    bias: Bias,
}

/// Positions that survive edits: every step applied to the document is
/// replayed here so an anchor keeps pointing at the same content.
#[derive(Debug, Default)]
pub struct AnchorSet {
    next_id: u64,
    tracked: HashMap<AnchorId, Tracked>,
}

impl AnchorSet {
    pub fn create(&mut self, pos: DocPosition, bias: Bias) -> AnchorId {
        self.next_id += 1;
        let id = AnchorId(self.next_id);
        self.tracked.insert(id, Tracked { pos, bias });
        id
    }

    pub fn get(&self, id: AnchorId) -> Option<DocPosition> {
        self.tracked.get(&id).map(|t| t.pos)
    }

    pub fn remove(&mut self, id: AnchorId) -> Option<DocPosition> {
        self.tracked.remove(&id).map(|t| t.pos)
    }

    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    pub(crate) fn apply(&mut self, step: &Step) {
        for t in self.tracked.values_mut() {
            t.pos = step.map(t.pos, t.bias);
        }
    }

    /// After a wholesale content replacement positions can only be clamped.
    pub(crate) fn clamp_all(&mut self, doc: &Document) {
        for t in self.tracked.values_mut() {
            t.pos = doc.clamp(t.pos);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(block: usize, offset: usize) -> DocPosition {
        DocPosition::new(block, offset)
    }

    #[test]
    fn insert_at_anchor_respects_bias() {
        let step = Step::Insert { at: p(0, 3), len: 2 };
        assert_eq!(step.map(p(0, 3), Bias::Left), p(0, 3));
        assert_eq!(step.map(p(0, 3), Bias::Right), p(0, 5));
        assert_eq!(step.map(p(0, 7), Bias::Left), p(0, 9));
        assert_eq!(step.map(p(1, 7), Bias::Left), p(1, 7));
    }

    #[test]
    fn delete_collapses_inner_positions_and_shifts_later_ones() {
        let step = Step::Delete { from: p(0, 2), to: p(2, 1) };
        assert_eq!(step.map(p(0, 1), Bias::Left), p(0, 1));
        assert_eq!(step.map(p(1, 4), Bias::Left), p(0, 2));
        assert_eq!(step.map(p(2, 5), Bias::Left), p(0, 6));
        assert_eq!(step.map(p(4, 3), Bias::Left), p(2, 3));
    }

    #[test]
    fn split_moves_tail_positions_to_the_new_block() {
        let step = Step::Split { at: p(1, 4) };
        assert_eq!(step.map(p(1, 6), Bias::Left), p(2, 2));
        assert_eq!(step.map(p(1, 4), Bias::Left), p(1, 4));
        assert_eq!(step.map(p(1, 4), Bias::Right), p(2, 0));
        assert_eq!(step.map(p(3, 0), Bias::Left), p(4, 0));
    }

    #[test]
    fn anchors_follow_every_applied_step() {
        let mut set = AnchorSet::default();
        let id = set.create(p(0, 5), Bias::Right);
        set.apply(&Step::Insert { at: p(0, 0), len: 3 });
        set.apply(&Step::InsertBlocks { index: 0, count: 2 });
        assert_eq!(set.get(id), Some(p(2, 8)));
        assert_eq!(set.remove(id), Some(p(2, 8)));
        assert!(set.is_empty());
    }
}
