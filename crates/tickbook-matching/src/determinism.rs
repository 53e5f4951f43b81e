//! Hashes for cross-replica consistency checks.
//!
//! Every replica applying the same command stream must reach the same book.
//! [`compute_state_hash`] summarises the price levels of a book;
//! [`compute_trade_root`] summarises the trades one command produced. Both
//! are domain-separated SHA-256 with fixed-width big-endian integers.

use sha2::{Digest, Sha256};
use tickbook_types::{Side, Trade, constants};

use crate::side::BookSide;

/// Hash every level's price and volume, buy side then sell side, each in
/// storage order (best level last).
#[must_use]
pub fn compute_state_hash(buy: &BookSide, sell: &BookSide) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(constants::STATE_HASH_DOMAIN);
    for side in [buy, sell] {
        hasher.update((side.level_count() as u64).to_be_bytes());
        for level in side.levels() {
            hasher.update(level.price.to_be_bytes());
            hasher.update(level.volume().to_be_bytes());
        }
    }
    hasher.finalize().into()
}

/// Hash a sequence of trades. Order matters.
#[must_use]
pub fn compute_trade_root(trades: &[Trade]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"tickbook:trade_root:v1:");
    hasher.update((trades.len() as u64).to_be_bytes());

    for trade in trades {
        hasher.update(trade.id.0.as_bytes());
        hasher.update(trade.batch_id.to_be_bytes());
        for id in [trade.buy_order.as_str(), trade.sell_order.as_str()] {
            hasher.update((id.len() as u64).to_be_bytes());
            hasher.update(id.as_bytes());
        }
        hasher.update(trade.price.to_be_bytes());
        hasher.update(trade.size.to_be_bytes());
        hasher.update([match trade.aggressor {
            None => 0u8,
            Some(Side::Buy) => 1,
            Some(Side::Sell) => 2,
        }]);
        hasher.update(trade.timestamp.as_nanos().to_be_bytes());
    }

    hasher.finalize().into()
}

#[must_use]
pub fn verify_trade_root(trades: &[Trade], expected_root: &[u8; 32]) -> bool {
    compute_trade_root(trades) == *expected_root
}

#[cfg(test)]
mod tests {
    use tickbook_types::*;

    use super::*;

    fn make_trade(aggressor: &str, fill_seq: u64) -> Trade {
        Trade {
            id: TradeId::deterministic(&OrderId::new(aggressor), 0, fill_seq),
            market_id: MarketId::new("M"),
            price: 100,
            size: 1,
            buyer: PartyId::new("b"),
            seller: PartyId::new("s"),
            buy_order: OrderId::new(aggressor),
            sell_order: OrderId::new("passive"),
            aggressor: Some(Side::Buy),
            batch_id: 0,
            timestamp: Timestamp(1),
        }
    }

    fn side_with(side: Side, levels: &[(u64, u64)]) -> BookSide {
        let mut book = BookSide::new(side);
        for (i, (price, size)) in levels.iter().enumerate() {
            book.add_order(Order::fixture(&format!("o{i}"), "p", side, *price, *size));
        }
        book
    }

    #[test]
    fn state_hash_depends_on_volume_and_side() {
        let empty = BookSide::new(Side::Sell);
        let a = compute_state_hash(&side_with(Side::Buy, &[(100, 5)]), &empty);
        let b = compute_state_hash(&side_with(Side::Buy, &[(100, 6)]), &empty);
        let c = compute_state_hash(&BookSide::new(Side::Buy), &side_with(Side::Sell, &[(100, 5)]));
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn state_hash_ignores_order_split_within_level() {
        let empty = BookSide::new(Side::Sell);
        let one = compute_state_hash(&side_with(Side::Buy, &[(100, 5)]), &empty);
        let two = compute_state_hash(&side_with(Side::Buy, &[(100, 2), (100, 3)]), &empty);
        assert_eq!(one, two);
    }

    #[test]
    fn trade_order_matters() {
        let t1 = make_trade("x", 0);
        let t2 = make_trade("x", 1);
        assert_ne!(
            compute_trade_root(&[t1.clone(), t2.clone()]),
            compute_trade_root(&[t2, t1])
        );
    }

    #[test]
    fn verify_root() {
        let trades = vec![make_trade("x", 0), make_trade("y", 0)];
        let root = compute_trade_root(&trades);
        assert!(verify_trade_root(&trades, &root));
        assert!(!verify_trade_root(&trades, &[0xAB; 32]));
    }
}
