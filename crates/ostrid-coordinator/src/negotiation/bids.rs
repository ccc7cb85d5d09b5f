//! Per-job bid book
//!
//! One entry per bidder. Receipt order is a per-book sequence number, which
//! is what ranking tie-breaks on; wall-clock receipt time is kept for audit.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use ostrid_common::Bid;

/// Outcome of recording a bid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BidAck {
    /// First bid from this bidder
    Recorded,
    /// Same terms and signature as the bid already held; nothing changed
    Duplicate,
    /// The bidder's earlier bid was superseded
    Replaced,
}

impl BidAck {
    pub fn as_str(&self) -> &'static str {
        match self {
            BidAck::Recorded => "recorded",
            BidAck::Duplicate => "duplicate",
            BidAck::Replaced => "replaced",
        }
    }
}

/// A bid with its receipt order
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedBid {
    pub bid: Bid,
    pub sequence: u64,
    pub received_at: DateTime<Utc>,
}

/// The book is full and the bidder is new
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookFull {
    pub capacity: usize,
}

/// Bids for one job, keyed by bidder
#[derive(Debug, Clone)]
pub struct BidBook {
    entries: BTreeMap<String, RecordedBid>,
    next_sequence: u64,
    capacity: usize,
}

impl BidBook {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            next_sequence: 0,
            capacity,
        }
    }

    pub fn insert(&mut self, bid: Bid, now: DateTime<Utc>) -> Result<BidAck, BookFull> {
        let bidder = bid.bidder_id().to_string();

        let ack = match self.entries.get(&bidder) {
            Some(existing) if existing.bid == bid => return Ok(BidAck::Duplicate),
            Some(_) => BidAck::Replaced,
            None if self.entries.len() >= self.capacity => {
                return Err(BookFull {
                    capacity: self.capacity,
                })
            }
            None => BidAck::Recorded,
        };

        self.next_sequence += 1;
        self.entries.insert(
            bidder,
            RecordedBid {
                bid,
                sequence: self.next_sequence,
                received_at: now,
            },
        );
        Ok(ack)
    }

    /// Recorded bids in receipt order
    pub fn entries(&self) -> Vec<RecordedBid> {
        let mut entries: Vec<RecordedBid> = self.entries.values().cloned().collect();
        entries.sort_by_key(|e| e.sequence);
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use ostrid_common::crypto::did::did_for_signing_key;
    use ostrid_common::{BidTerms, JobId};
    use rand::rngs::OsRng;

    fn bid(key: &SigningKey, price: u64) -> Bid {
        Bid::sign(
            BidTerms {
                job_id: JobId::from("J1"),
                bidder_id: did_for_signing_key(key),
                price,
                quality: 0.5,
                estimated_time_secs: 10,
            },
            key,
        )
        .unwrap()
    }

    #[test]
    fn test_duplicate_keeps_order() {
        let a = SigningKey::generate(&mut OsRng);
        let b = SigningKey::generate(&mut OsRng);
        let mut book = BidBook::new(8);

        assert_eq!(book.insert(bid(&a, 10), Utc::now()), Ok(BidAck::Recorded));
        assert_eq!(book.insert(bid(&b, 20), Utc::now()), Ok(BidAck::Recorded));
        assert_eq!(book.insert(bid(&a, 10), Utc::now()), Ok(BidAck::Duplicate));

        let entries = book.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].bid.terms.price, 10);
        assert_eq!(entries[0].sequence, 1);
    }

    #[test]
    fn test_resubmission_replaces() {
        let a = SigningKey::generate(&mut OsRng);
        let b = SigningKey::generate(&mut OsRng);
        let mut book = BidBook::new(8);

        book.insert(bid(&a, 10), Utc::now()).unwrap();
        book.insert(bid(&b, 20), Utc::now()).unwrap();
        assert_eq!(book.insert(bid(&a, 8), Utc::now()), Ok(BidAck::Replaced));

        let entries = book.entries();
        assert_eq!(entries.len(), 2);
        // the revision counts as received last
        assert_eq!(entries[1].bid.terms.price, 8);
    }

    #[test]
    fn test_capacity_applies_to_new_bidders_only() {
        let a = SigningKey::generate(&mut OsRng);
        let b = SigningKey::generate(&mut OsRng);
        let mut book = BidBook::new(1);

        book.insert(bid(&a, 10), Utc::now()).unwrap();
        assert_eq!(
            book.insert(bid(&b, 20), Utc::now()),
            Err(BookFull { capacity: 1 })
        );
        assert_eq!(book.insert(bid(&a, 9), Utc::now()), Ok(BidAck::Replaced));
    }
}
