//! Token budget allocation
//!
//! Fills a fixed budget from most to least important piece:
//! - Primary: the requested artifact, included whole or truncated to fit
//! - Secondary: offered in discovery order, skipped when too expensive,
//!   stopped once the remainder drops under [`SECONDARY_FLOOR`]
//! - Tertiary: same rule with [`TERTIARY_FLOOR`], charged a flat
//!   [`SIGNATURE_COST`] each
//!
//! Spend never exceeds the budget.
//!
//! Greedy skipping is not monotone in the budget. Within one tier it is when
//! costs ascend; with descending costs `[600, 10, 10]` a budget of 599 takes
//! both 10s while a budget of 1000 takes the 600 and then stops under the
//! floor. Across tiers, one more admitted type can crowd out signatures.

use super::QueryEnvelope;
use crate::tokens::{estimate_tokens, truncate_to_tokens};

/// Remaining budget under which secondary pieces are no longer offered
pub const SECONDARY_FLOOR: usize = 500;

/// Remaining budget under which tertiary pieces are no longer offered
pub const TERTIARY_FLOOR: usize = 100;

/// Flat charge for a tertiary piece (a signature lookup)
pub const SIGNATURE_COST: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Primary,
    Secondary,
    Tertiary,
}

impl Tier {
    fn floor(self) -> usize {
        match self {
            Tier::Primary => 0,
            Tier::Secondary => SECONDARY_FLOOR,
            Tier::Tertiary => TERTIARY_FLOOR,
        }
    }
}

/// Answer to an offered candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Offer {
    /// Included; its cost has been spent
    Take,
    /// Does not fit; later, cheaper candidates may still fit
    Skip,
    /// Remaining budget is under the tier's floor; offer no more of this tier
    Stop,
}

/// Running budget for one query
#[derive(Debug, Clone)]
pub struct BudgetAllocator {
    budget: usize,
    spent: usize,
    truncated: bool,
    hint: Option<String>,
}

impl BudgetAllocator {
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            spent: 0,
            truncated: false,
            hint: None,
        }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn spent(&self) -> usize {
        self.spent
    }

    pub fn remaining(&self) -> usize {
        self.budget - self.spent
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Spend on the primary artifact.
    ///
    /// Returns the text whole if its cost fits the remaining budget, otherwise
    /// the longest prefix that does; in that case the result is flagged
    /// truncated and `hint` (given the budget) explains how to get the rest.
    pub fn take_primary<'t>(&mut self, text: &'t str, hint: impl FnOnce(usize) -> String) -> &'t str {
        let cost = estimate_tokens(text);
        if cost <= self.remaining() {
            self.spent += cost;
            return text;
        }

        let cut = truncate_to_tokens(text, self.remaining());
        self.spent += estimate_tokens(cut);
        self.truncated = true;
        self.hint = Some(hint(self.budget));
        cut
    }

    /// Offer a secondary or tertiary candidate of the given cost.
    fn offer(&mut self, tier: Tier, cost: usize) -> Offer {
        if self.remaining() < tier.floor() {
            return Offer::Stop;
        }
        if cost > self.remaining() {
            return Offer::Skip;
        }
        self.spent += cost;
        Offer::Take
    }

    /// Spend `cost` if it fits, with no floor. Used for independent
    /// items sharing one budget.
    pub fn try_spend(&mut self, cost: usize) -> bool {
        if cost > self.remaining() {
            return false;
        }
        self.spent += cost;
        true
    }

    /// Offer `candidates` of one tier in order.
    ///
    /// `resolve` turns a candidate into its cost and payload, or `None` when it
    /// does not apply. It is only called while the remainder is at or above the
    /// tier's floor, so lookups stop as soon as the tier can take nothing more.
    pub fn fill_tier<C, T, E>(
        &mut self,
        tier: Tier,
        candidates: impl IntoIterator<Item = C>,
        mut resolve: impl FnMut(C) -> std::result::Result<Option<(usize, T)>, E>,
    ) -> std::result::Result<Vec<T>, E> {
        let mut taken = Vec::new();
        for candidate in candidates {
            if self.remaining() < tier.floor() {
                break;
            }
            let Some((cost, item)) = resolve(candidate)? else {
                continue;
            };
            match self.offer(tier, cost) {
                Offer::Take => taken.push(item),
                Offer::Skip => {}
                Offer::Stop => break,
            }
        }
        Ok(taken)
    }

    /// Mark the result incomplete without a primary truncation.
    pub fn mark_truncated(&mut self, hint: String) {
        self.truncated = true;
        self.hint.get_or_insert(hint);
    }

    /// Wrap `data` with the spent counter, truncation flag and hint.
    pub fn finish<T>(self, data: T) -> QueryEnvelope<T> {
        QueryEnvelope::new(data, self.spent, self.truncated, self.hint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    /// Outcome of one allocation: indices taken per tier, spend, truncation
    #[derive(Debug, PartialEq, Eq)]
    struct Filled {
        types: Vec<usize>,
        signatures: usize,
        spent: usize,
        truncated: bool,
    }

    fn fill(budget: usize, primary: usize, types: &[usize], signatures: usize) -> Filled {
        let text = "x".repeat(primary * 4);
        let mut allocator = BudgetAllocator::new(budget);
        allocator.take_primary(&text, |b| format!("cut at {}", b));

        let types = allocator
            .fill_tier(Tier::Secondary, types.iter().enumerate(), |(idx, cost)| {
                Ok::<_, Infallible>(Some((*cost, idx)))
            })
            .unwrap();
        let signatures = allocator
            .fill_tier(Tier::Tertiary, 0..signatures, |idx| {
                Ok::<_, Infallible>(Some((SIGNATURE_COST, idx)))
            })
            .unwrap()
            .len();

        Filled {
            types,
            signatures,
            spent: allocator.spent(),
            truncated: allocator.is_truncated(),
        }
    }

    #[test]
    fn test_primary_exactly_at_budget_is_not_truncated() {
        let text = "x".repeat(400);
        let mut allocator = BudgetAllocator::new(100);
        let taken = allocator.take_primary(&text, |b| format!("cut at {}", b));
        assert_eq!(taken.len(), 400);
        assert!(!allocator.is_truncated());
        assert_eq!(allocator.spent(), 100);
    }

    #[test]
    fn test_primary_over_budget_is_truncated_with_hint() {
        let text = "x".repeat(401);
        let mut allocator = BudgetAllocator::new(100);
        let taken = allocator.take_primary(&text, |b| format!("cut at {}", b));
        assert_eq!(taken.len(), 400);
        assert_eq!(allocator.spent(), 100);

        let envelope = allocator.finish(());
        assert!(envelope.meta.truncated);
        assert_eq!(envelope.meta.hint.as_deref(), Some("cut at 100"));
    }

    #[test]
    fn test_greedy_skip_keeps_discovery_order() {
        // 200 primary, then 150 fits, 900 does not, 100 still fits
        let result = fill(1000, 200, &[150, 900, 100], 0);
        assert_eq!(result.types, vec![0, 2]);
        assert_eq!(result.spent, 450);
        assert!(!result.truncated);
    }

    #[test]
    fn test_secondary_stops_under_floor() {
        // 480 left after primary and first candidate: 480 < 500, stop
        let result = fill(1000, 400, &[120, 10], 0);
        assert_eq!(result.types, vec![0]);
        assert_eq!(result.spent, 520);
    }

    #[test]
    fn test_tertiary_is_flat_cost_with_its_own_floor() {
        // 350 -> 250 -> 150 -> 50, then 50 < 100 stops
        let result = fill(450, 100, &[], 4);
        assert_eq!(result.signatures, 3);
        assert_eq!(result.spent, 400);
    }

    #[test]
    fn test_resolve_is_not_called_under_the_floor() {
        let mut allocator = BudgetAllocator::new(450);
        let mut looked_up = 0;
        let taken = allocator
            .fill_tier(Tier::Secondary, [10, 10], |cost| {
                looked_up += 1;
                Ok::<_, Infallible>(Some((cost, cost)))
            })
            .unwrap();
        assert!(taken.is_empty());
        assert_eq!(looked_up, 0);
    }

    #[test]
    fn test_unresolved_candidates_cost_nothing() {
        let mut allocator = BudgetAllocator::new(1000);
        let taken = allocator
            .fill_tier(Tier::Secondary, [Some(100), None, Some(200)], |c| {
                Ok::<_, Infallible>(c.map(|cost| (cost, cost)))
            })
            .unwrap();
        assert_eq!(taken, vec![100, 200]);
        assert_eq!(allocator.spent(), 300);
    }

    #[test]
    fn test_resolve_error_stops_the_tier() {
        let mut allocator = BudgetAllocator::new(1000);
        let result = allocator.fill_tier(Tier::Secondary, [1, 2], |c| {
            if c == 2 { Err("lookup failed") } else { Ok(Some((10, c))) }
        });
        assert_eq!(result, Err("lookup failed"));
    }

    #[test]
    fn test_never_exceeds_budget() {
        let types: Vec<usize> = (1..30).map(|i| i * 37 % 700).collect();
        for budget in (0..3000).step_by(17) {
            for primary in [0, 50, 499, 1200, 5000] {
                let result = fill(budget, primary, &types, 12);
                assert!(result.spent <= budget, "budget {} primary {}", budget, primary);
            }
        }
    }

    fn assert_monotone(types: &[usize], signatures: usize) {
        let mut previous: Option<Filled> = None;
        for budget in 0..4000 {
            let result = fill(budget, 250, types, signatures);
            if let Some(prev) = &previous {
                assert!(result.types.len() >= prev.types.len(), "budget {}", budget);
                assert!(result.signatures >= prev.signatures, "budget {}", budget);
                assert!(!result.truncated || prev.truncated, "budget {}", budget);
            }
            previous = Some(result);
        }
    }

    #[test]
    fn test_monotone_in_budget_within_one_tier() {
        assert_monotone(&[10, 40, 90, 150, 300, 700], 0);
        assert_monotone(&[], 8);
    }

    #[test]
    fn test_descending_costs_are_not_monotone() {
        let small = fill(599, 0, &[600, 10, 10], 0);
        let large = fill(1000, 0, &[600, 10, 10], 0);
        assert_eq!(small.types, vec![1, 2]);
        assert_eq!(large.types, vec![0]);
    }

    #[test]
    fn test_extra_secondary_can_displace_signatures() {
        // a larger budget admits the 300-token type, which leaves room for fewer signatures
        let smaller = fill(1039, 250, &[10, 40, 90, 150, 300], 5);
        let larger = fill(1040, 250, &[10, 40, 90, 150, 300], 5);
        assert_eq!((smaller.types, smaller.signatures), (vec![0, 1, 2, 3], 4));
        assert_eq!((larger.types, larger.signatures), (vec![0, 1, 2, 3, 4], 2));
        assert!(larger.spent <= 1040);
    }

    #[test]
    fn test_try_spend_has_no_floor() {
        let mut allocator = BudgetAllocator::new(10);
        assert!(allocator.try_spend(7));
        assert!(!allocator.try_spend(4));
        assert!(allocator.try_spend(3));
        assert_eq!(allocator.remaining(), 0);
    }
}
