use serde::{Deserialize, Serialize};

/// Internal buy/sell discriminant. Translated to `"B"`/`"A"` and the wire's
/// boolean `b` field only at the exchange boundary (see `exchange.rs`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Maps the exchange's `"B"`/`"A"` order-side letter.
    pub fn from_exchange_letter(letter: &str) -> Option<Side> {
        match letter {
            "B" => Some(Side::Buy),
            "A" => Some(Side::Sell),
            _ => None,
        }
    }

    pub fn is_buy(self) -> bool {
        matches!(self, Side::Buy)
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opposite_round_trips() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
    }

    #[test]
    fn exchange_letter_mapping() {
        assert_eq!(Side::from_exchange_letter("B"), Some(Side::Buy));
        assert_eq!(Side::from_exchange_letter("A"), Some(Side::Sell));
        assert_eq!(Side::from_exchange_letter("X"), None);
    }
}
