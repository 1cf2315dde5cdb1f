//! Requested-block sentinels and the batch comparator.
//!
//! Block references travel as signed integers: non-negative values are
//! concrete heights, negative values are sentinels (`latest`, `pending`,
//! `safe`, `finalized`, `earliest`, not-applicable). The sentinel domain is
//! non-numeric, so ordering two requested blocks goes through an explicit
//! freshness rank rather than integer comparison.

use thiserror::Error;

/// Wire encoding of the sentinels.
pub const LATEST_BLOCK: i64 = -1;
pub const EARLIEST_BLOCK: i64 = -2;
pub const PENDING_BLOCK: i64 = -3;
pub const SAFE_BLOCK: i64 = -4;
pub const FINALIZED_BLOCK: i64 = -5;
pub const NOT_APPLICABLE: i64 = -6;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BlockParseError {
    #[error("invalid block literal: {0}")]
    InvalidLiteral(String),
    #[error("invalid hex block number: {0}")]
    InvalidHex(String),
    #[error("invalid block number: {0}")]
    InvalidNumber(String),
}

/// A requested block: a concrete height or one of the sentinel tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestedBlock {
    NotApplicable,
    Latest,
    Pending,
    Safe,
    Finalized,
    Earliest,
    Number(u64),
}

impl RequestedBlock {
    /// Decodes the wire encoding. Unknown negative values collapse to
    /// `NotApplicable`.
    pub fn from_raw(raw: i64) -> Self {
        match raw {
            LATEST_BLOCK => Self::Latest,
            EARLIEST_BLOCK => Self::Earliest,
            PENDING_BLOCK => Self::Pending,
            SAFE_BLOCK => Self::Safe,
            FINALIZED_BLOCK => Self::Finalized,
            n if n >= 0 => Self::Number(n as u64),
            _ => Self::NotApplicable,
        }
    }

    pub fn to_raw(self) -> i64 {
        match self {
            Self::Latest => LATEST_BLOCK,
            Self::Earliest => EARLIEST_BLOCK,
            Self::Pending => PENDING_BLOCK,
            Self::Safe => SAFE_BLOCK,
            Self::Finalized => FINALIZED_BLOCK,
            Self::NotApplicable => NOT_APPLICABLE,
            Self::Number(n) => n as i64,
        }
    }

    /// Freshness rank implementing the total order
    /// `NotApplicable > Latest > Pending > Safe > Finalized > Number(desc) >
    /// Earliest`. The first component is the tier, the second orders concrete
    /// heights within their tier.
    fn freshness_rank(self) -> (u8, u64) {
        match self {
            Self::Earliest => (0, 0),
            Self::Number(n) => (1, n),
            Self::Finalized => (2, 0),
            Self::Safe => (3, 0),
            Self::Pending => (4, 0),
            Self::Latest => (5, 0),
            Self::NotApplicable => (6, 0),
        }
    }
}

impl Ord for RequestedBlock {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.freshness_rank().cmp(&other.freshness_rank())
    }
}

impl PartialOrd for RequestedBlock {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Combines two requested blocks of a batch into the (most advanced, most
/// behind) pair under the freshness order. Associative and commutative, so a
/// batch of any size reduces left-to-right.
pub fn compare_requested_block_in_batch(first: i64, second: i64) -> (i64, i64) {
    let a = RequestedBlock::from_raw(first);
    let b = RequestedBlock::from_raw(second);
    if a >= b {
        (first, second)
    } else {
        (second, first)
    }
}

/// Parses a block parameter: the sentinel literals, `0x`-prefixed hex, or a
/// decimal height.
pub fn parse_block_parameter(input: &str) -> Result<i64, BlockParseError> {
    match input {
        "latest" => Ok(LATEST_BLOCK),
        "earliest" => Ok(EARLIEST_BLOCK),
        "pending" => Ok(PENDING_BLOCK),
        "safe" => Ok(SAFE_BLOCK),
        "finalized" => Ok(FINALIZED_BLOCK),
        "" => Err(BlockParseError::InvalidLiteral(input.to_string())),
        s => {
            if let Some(hex) = s.strip_prefix("0x") {
                u64::from_str_radix(hex, 16)
                    .map(|n| n as i64)
                    .map_err(|_| BlockParseError::InvalidHex(s.to_string()))
            } else {
                s.parse::<u64>()
                    .map(|n| n as i64)
                    .map_err(|_| BlockParseError::InvalidNumber(s.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_literals() {
        assert_eq!(parse_block_parameter("latest").unwrap(), LATEST_BLOCK);
        assert_eq!(parse_block_parameter("pending").unwrap(), PENDING_BLOCK);
        assert_eq!(parse_block_parameter("safe").unwrap(), SAFE_BLOCK);
        assert_eq!(parse_block_parameter("finalized").unwrap(), FINALIZED_BLOCK);
        assert_eq!(parse_block_parameter("earliest").unwrap(), EARLIEST_BLOCK);
    }

    #[test]
    fn parse_numbers() {
        assert_eq!(parse_block_parameter("0x10").unwrap(), 16);
        assert_eq!(parse_block_parameter("0x0").unwrap(), 0);
        assert_eq!(parse_block_parameter("100").unwrap(), 100);
        assert!(parse_block_parameter("0xzz").is_err());
        assert!(parse_block_parameter("-5").is_err());
        assert!(parse_block_parameter("").is_err());
    }

    #[test]
    fn sentinel_round_trip() {
        for raw in [LATEST_BLOCK, EARLIEST_BLOCK, PENDING_BLOCK, SAFE_BLOCK, FINALIZED_BLOCK, NOT_APPLICABLE, 0, 42]
        {
            assert_eq!(RequestedBlock::from_raw(raw).to_raw(), raw);
        }
    }

    #[test]
    fn freshness_hierarchy() {
        use RequestedBlock::*;
        let descending = [NotApplicable, Latest, Pending, Safe, Finalized, Number(100), Number(5), Earliest];
        for pair in descending.windows(2) {
            assert!(pair[0] > pair[1], "{:?} should outrank {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn batch_combination() {
        // Scenario: [eth_getBlockByNumber(0x10), eth_getBlockByNumber("latest")]
        assert_eq!(compare_requested_block_in_batch(16, LATEST_BLOCK), (LATEST_BLOCK, 16));
        assert_eq!(compare_requested_block_in_batch(LATEST_BLOCK, 16), (LATEST_BLOCK, 16));
        assert_eq!(compare_requested_block_in_batch(EARLIEST_BLOCK, 5), (5, EARLIEST_BLOCK));
        assert_eq!(
            compare_requested_block_in_batch(NOT_APPLICABLE, LATEST_BLOCK),
            (NOT_APPLICABLE, LATEST_BLOCK)
        );
        assert_eq!(compare_requested_block_in_batch(PENDING_BLOCK, SAFE_BLOCK), (PENDING_BLOCK, SAFE_BLOCK));
        assert_eq!(compare_requested_block_in_batch(200, 100), (200, 100));
    }

    #[test]
    fn batch_reduction_is_order_independent() {
        // Reducing any permutation left-to-right must land on the same
        // (max, min) pair.
        let blocks = [16, LATEST_BLOCK, EARLIEST_BLOCK, 300, FINALIZED_BLOCK];
        let reduce = |order: &[i64]| {
            let mut latest = order[0];
            let mut earliest = order[0];
            for &b in &order[1..] {
                let (l, _) = compare_requested_block_in_batch(latest, b);
                let (_, e) = compare_requested_block_in_batch(earliest, b);
                latest = l;
                earliest = e;
            }
            (latest, earliest)
        };
        let expected = (LATEST_BLOCK, EARLIEST_BLOCK);
        assert_eq!(reduce(&blocks), expected);
        let mut reversed = blocks;
        reversed.reverse();
        assert_eq!(reduce(&reversed), expected);
        let shuffled = [300, FINALIZED_BLOCK, 16, EARLIEST_BLOCK, LATEST_BLOCK];
        assert_eq!(reduce(&shuffled), expected);
    }
}
