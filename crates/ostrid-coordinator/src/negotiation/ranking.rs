//! Winner selection strategies

use std::cmp::Ordering;

use ostrid_common::TaskIntent;

use super::bids::RecordedBid;

/// Picks exactly one bid out of a non-empty book
pub trait RankingStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn select<'a>(&self, intent: &TaskIntent, bids: &'a [RecordedBid]) -> Option<&'a RecordedBid>;
}

/// Earlier receipt first, then bidder id
fn receipt_order(a: &RecordedBid, b: &RecordedBid) -> Ordering {
    a.sequence
        .cmp(&b.sequence)
        .then_with(|| a.bid.bidder_id().cmp(b.bid.bidder_id()))
}

/// Highest score wins; ties go to the earlier receipt, then the lower bidder id
fn best_by<'a>(
    bids: &'a [RecordedBid],
    score: impl Fn(&RecordedBid) -> f64,
) -> Option<&'a RecordedBid> {
    bids.iter().max_by(|a, b| {
        score(a)
            .total_cmp(&score(b))
            .then_with(|| receipt_order(b, a))
    })
}

/// Default auction policy: maximise quality per unit of price
#[derive(Debug, Default, Clone, Copy)]
pub struct QualityPerPrice;

impl RankingStrategy for QualityPerPrice {
    fn name(&self) -> &'static str {
        "quality_per_price"
    }

    fn select<'a>(&self, _intent: &TaskIntent, bids: &'a [RecordedBid]) -> Option<&'a RecordedBid> {
        best_by(bids, |b| b.bid.value_ratio())
    }
}

/// SOLVER policy: the first valid bid received
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstValidBid;

impl RankingStrategy for FirstValidBid {
    fn name(&self) -> &'static str {
        "first_valid_bid"
    }

    fn select<'a>(&self, _intent: &TaskIntent, bids: &'a [RecordedBid]) -> Option<&'a RecordedBid> {
        bids.iter().min_by(|a, b| receipt_order(a, b))
    }
}

/// Scores bids with the intent's own utility weights.
///
/// Uses the `quality`, `price` and `time` dimensions; price is normalised by
/// the escrow budget and time by the slowest bid in the book. Other
/// dimensions are ignored.
#[derive(Debug, Default, Clone, Copy)]
pub struct UtilityWeighted;

impl RankingStrategy for UtilityWeighted {
    fn name(&self) -> &'static str {
        "utility_weighted"
    }

    fn select<'a>(&self, intent: &TaskIntent, bids: &'a [RecordedBid]) -> Option<&'a RecordedBid> {
        let weight = |dim: &str| intent.utility_weights.get(dim).copied().unwrap_or(0.0);
        let (w_quality, w_price, w_time) = (weight("quality"), weight("price"), weight("time"));

        let budget = intent.escrow_amount.max(1) as f64;
        let slowest = bids
            .iter()
            .map(|b| b.bid.terms.estimated_time_secs)
            .max()
            .unwrap_or(0)
            .max(1) as f64;

        best_by(bids, |b| {
            let terms = &b.bid.terms;
            w_quality * terms.quality
                - w_price * (terms.price as f64 / budget)
                - w_time * (terms.estimated_time_secs as f64 / slowest)
        })
    }
}
