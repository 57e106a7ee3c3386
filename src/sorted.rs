// 4.0 sorted.rs: positions ordered by nominal collateral ratio, safest at the head, riskiest at the tail.
// the list stores links only. ratios are read through NominalRatio so pending rewards are included.
// 4.1 has the hinted slot search: a valid hint is O(1), a stale one walks locally from the hint.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::math::MathError;
use crate::types::{Amount, OwnerId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SortedListError {
    #[error("sorted list is full ({0} positions)")]
    ListFull(usize),

    #[error("{0} is already in the sorted list")]
    AlreadyInList(OwnerId),

    #[error("{0} is not in the sorted list")]
    NotInList(OwnerId),

    #[error("nominal ratio must be positive")]
    ZeroNicr,

    #[error("no insert position found for nominal ratio {0}")]
    InsertPositionNotFound(Amount),

    #[error("ratio lookup failed: {0}")]
    Ratio(#[from] MathError),
}

/// Source of nominal ratios for list members.
pub trait NominalRatio {
    fn nominal_icr(&self, owner: OwnerId) -> Result<Amount, MathError>;
}

impl NominalRatio for HashMap<OwnerId, Amount> {
    fn nominal_icr(&self, owner: OwnerId) -> Result<Amount, MathError> {
        Ok(self.get(&owner).copied().unwrap_or(0))
    }
}

// prev points toward the head (higher ratio), next toward the tail
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
struct Node {
    prev: Option<OwnerId>,
    next: Option<OwnerId>,
}

/// A slot between two neighbours. `None` on either side means the list end.
pub type InsertPosition = (Option<OwnerId>, Option<OwnerId>);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortedPositions {
    head: Option<OwnerId>,
    tail: Option<OwnerId>,
    nodes: HashMap<OwnerId, Node>,
    max_size: usize,
}

impl SortedPositions {
    pub fn new(max_size: usize) -> Self {
        Self {
            head: None,
            tail: None,
            nodes: HashMap::new(),
            max_size,
        }
    }

    pub fn contains(&self, id: OwnerId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.nodes.len() >= self.max_size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Highest ratio.
    pub fn first(&self) -> Option<OwnerId> {
        self.head
    }

    /// Lowest ratio.
    pub fn last(&self) -> Option<OwnerId> {
        self.tail
    }

    /// Neighbour toward the tail.
    pub fn next(&self, id: OwnerId) -> Option<OwnerId> {
        self.nodes.get(&id).and_then(|n| n.next)
    }

    /// Neighbour toward the head.
    pub fn prev(&self, id: OwnerId) -> Option<OwnerId> {
        self.nodes.get(&id).and_then(|n| n.prev)
    }

    /// Head to tail.
    pub fn iter(&self) -> impl Iterator<Item = OwnerId> + '_ {
        std::iter::successors(self.head, move |id| self.next(*id))
    }

    // 4.1: insert with hints. invalid hints fall back to a local walk.
    pub fn insert<R: NominalRatio + ?Sized>(
        &mut self,
        ratios: &R,
        id: OwnerId,
        nicr: Amount,
        prev_hint: Option<OwnerId>,
        next_hint: Option<OwnerId>,
    ) -> Result<(), SortedListError> {
        if self.is_full() {
            return Err(SortedListError::ListFull(self.max_size));
        }
        if self.contains(id) {
            return Err(SortedListError::AlreadyInList(id));
        }
        if nicr == 0 {
            return Err(SortedListError::ZeroNicr);
        }

        let (prev, next) = if self.valid_insert_position(ratios, nicr, prev_hint, next_hint)? {
            (prev_hint, next_hint)
        } else {
            self.find_insert_position(ratios, nicr, prev_hint, next_hint)?
        };

        self.link(id, prev, next);
        Ok(())
    }

    pub fn remove(&mut self, id: OwnerId) -> Result<(), SortedListError> {
        let node = self.nodes.remove(&id).ok_or(SortedListError::NotInList(id))?;

        match node.prev {
            Some(prev) => {
                if let Some(n) = self.nodes.get_mut(&prev) {
                    n.next = node.next;
                }
            }
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => {
                if let Some(n) = self.nodes.get_mut(&next) {
                    n.prev = node.prev;
                }
            }
            None => self.tail = node.prev,
        }
        Ok(())
    }

    // after an adjustment the ratio changed. same hints semantics as insert.
    pub fn reinsert<R: NominalRatio + ?Sized>(
        &mut self,
        ratios: &R,
        id: OwnerId,
        new_nicr: Amount,
        prev_hint: Option<OwnerId>,
        next_hint: Option<OwnerId>,
    ) -> Result<(), SortedListError> {
        if !self.contains(id) {
            return Err(SortedListError::NotInList(id));
        }
        if new_nicr == 0 {
            return Err(SortedListError::ZeroNicr);
        }
        self.remove(id)?;
        self.insert(ratios, id, new_nicr, prev_hint, next_hint)
    }

    /// True when `nicr` fits exactly between `prev` and `next`.
    pub fn valid_insert_position<R: NominalRatio + ?Sized>(
        &self,
        ratios: &R,
        nicr: Amount,
        prev: Option<OwnerId>,
        next: Option<OwnerId>,
    ) -> Result<bool, SortedListError> {
        match (prev, next) {
            (None, None) => Ok(self.is_empty()),
            (None, Some(n)) => Ok(self.head == Some(n) && nicr >= ratios.nominal_icr(n)?),
            (Some(p), None) => Ok(self.tail == Some(p) && nicr <= ratios.nominal_icr(p)?),
            (Some(p), Some(n)) => Ok(self.next(p) == Some(n)
                && ratios.nominal_icr(p)? >= nicr
                && nicr >= ratios.nominal_icr(n)?),
        }
    }

    // 4.2: exact slot for `nicr` starting from whichever hint still makes sense
    pub fn find_insert_position<R: NominalRatio + ?Sized>(
        &self,
        ratios: &R,
        nicr: Amount,
        prev_hint: Option<OwnerId>,
        next_hint: Option<OwnerId>,
    ) -> Result<InsertPosition, SortedListError> {
        if self.is_empty() {
            return Ok((None, None));
        }

        let mut prev = prev_hint;
        let mut next = next_hint;

        if let Some(p) = prev {
            // stale when gone or when the target ratio is now above it
            if !self.contains(p) || nicr > ratios.nominal_icr(p)? {
                prev = None;
            }
        }
        if let Some(n) = next {
            if !self.contains(n) || nicr < ratios.nominal_icr(n)? {
                next = None;
            }
        }

        let found = match (prev, next) {
            (None, None) => self.descend(ratios, nicr, self.head)?,
            (None, Some(n)) => self.ascend(ratios, nicr, Some(n))?,
            (Some(p), _) => self.descend(ratios, nicr, Some(p))?,
        };

        if found == (None, None) {
            return Err(SortedListError::InsertPositionNotFound(nicr));
        }
        Ok(found)
    }

    // walk toward the tail from `start`
    fn descend<R: NominalRatio + ?Sized>(
        &self,
        ratios: &R,
        nicr: Amount,
        start: Option<OwnerId>,
    ) -> Result<InsertPosition, SortedListError> {
        let Some(start) = start else {
            return Ok((None, None));
        };
        if self.head == Some(start) && nicr >= ratios.nominal_icr(start)? {
            return Ok((None, Some(start)));
        }

        let mut prev = Some(start);
        let mut next = self.next(start);
        while let Some(p) = prev {
            if self.valid_insert_position(ratios, nicr, Some(p), next)? {
                break;
            }
            prev = next;
            next = next.and_then(|n| self.next(n));
        }
        Ok((prev, next))
    }

    // walk toward the head from `start`
    fn ascend<R: NominalRatio + ?Sized>(
        &self,
        ratios: &R,
        nicr: Amount,
        start: Option<OwnerId>,
    ) -> Result<InsertPosition, SortedListError> {
        let Some(start) = start else {
            return Ok((None, None));
        };
        if self.tail == Some(start) && nicr <= ratios.nominal_icr(start)? {
            return Ok((Some(start), None));
        }

        let mut next = Some(start);
        let mut prev = self.prev(start);
        while let Some(n) = next {
            if self.valid_insert_position(ratios, nicr, prev, Some(n))? {
                break;
            }
            next = prev;
            prev = prev.and_then(|p| self.prev(p));
        }
        Ok((prev, next))
    }

    fn link(&mut self, id: OwnerId, prev: Option<OwnerId>, next: Option<OwnerId>) {
        self.nodes.insert(id, Node { prev, next });

        match prev {
            Some(p) => {
                if let Some(n) = self.nodes.get_mut(&p) {
                    n.next = Some(id);
                }
            }
            None => self.head = Some(id),
        }
        match next {
            Some(nx) => {
                if let Some(n) = self.nodes.get_mut(&nx) {
                    n.prev = Some(id);
                }
            }
            None => self.tail = Some(id),
        }
    }
}
