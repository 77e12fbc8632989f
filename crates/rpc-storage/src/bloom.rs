//! Bloom pre-filtering for log queries.
//!
//! A [`BloomFilter`] is an AND of clauses, each clause an OR of candidates,
//! each candidate the three bit positions a value sets in a 2048-bit logs
//! bloom. The first clause constrains the emitting address and the rest the
//! topic positions, in order. Positions without candidates match anything and
//! contribute no clause.

use alloy::{
    primitives::{Address, B256, Bloom, keccak256},
    rpc::types::Filter,
};
use rayon::prelude::*;
use std::{num::NonZeroUsize, sync::LazyLock};

/// The three bit positions a value sets in a logs bloom.
pub type BloomIndexes = [u16; 3];

const BLOOM_BITS_MASK: usize = 0x7ff;

/// Clause count above which matching is split across the rayon pool.
static PARALLELISM: LazyLock<usize> =
    LazyLock::new(|| std::thread::available_parallelism().map_or(1, NonZeroUsize::get));

/// Compute the bloom bit positions of a value.
///
/// Each position is read from a two-byte big-endian segment of the value's
/// keccak256 hash, masked to `[0, 2047]`.
pub fn bloom_indexes(data: &[u8]) -> BloomIndexes {
    let hash = keccak256(data);
    let mut idxs = [0u16; 3];
    for (i, idx) in idxs.iter_mut().enumerate() {
        let hi = hash[2 * i] as usize;
        let lo = hash[2 * i + 1] as usize;
        *idx = (((hi << 8) | lo) & BLOOM_BITS_MASK) as u16;
    }
    idxs
}

fn contains_indexes(bloom: &Bloom, idxs: &BloomIndexes) -> bool {
    let data = bloom.data();
    idxs.iter().all(|&bit| {
        let bit = bit as usize;
        data[255 - bit / 8] & (1 << (bit % 8)) != 0
    })
}

fn clause_matches(bloom: &Bloom, clause: &[BloomIndexes]) -> bool {
    clause.iter().any(|idxs| contains_indexes(bloom, idxs))
}

/// A compound bloom filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BloomFilter {
    clauses: Vec<Vec<BloomIndexes>>,
}

impl BloomFilter {
    /// Build a filter from an address clause and per-position topic clauses.
    pub fn new<'a, A, T>(addresses: A, topics: T) -> Self
    where
        A: IntoIterator<Item = &'a Address>,
        T: IntoIterator,
        T::Item: IntoIterator<Item = &'a B256>,
    {
        let mut clauses = Vec::new();
        let address_clause: Vec<_> =
            addresses.into_iter().map(|a| bloom_indexes(a.as_slice())).collect();
        if !address_clause.is_empty() {
            clauses.push(address_clause);
        }
        for position in topics {
            let clause: Vec<_> =
                position.into_iter().map(|t| bloom_indexes(t.as_slice())).collect();
            if !clause.is_empty() {
                clauses.push(clause);
            }
        }
        Self { clauses }
    }

    /// Build the filter for a log query.
    pub fn from_filter(filter: &Filter) -> Self {
        Self::new(filter.address.iter(), filter.topics.iter().map(|t| t.iter()))
    }

    /// True if the filter has no clauses and matches every bloom.
    pub const fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Number of clauses.
    pub const fn len(&self) -> usize {
        self.clauses.len()
    }

    /// True if every clause has a candidate whose bits are all set.
    ///
    /// Filters with more clauses than the available parallelism are split
    /// into contiguous chunks evaluated on the rayon pool. Evaluation stops
    /// as soon as any clause fails.
    pub fn matches(&self, bloom: &Bloom) -> bool {
        self.matches_with_parallelism(bloom, *PARALLELISM)
    }

    fn matches_with_parallelism(&self, bloom: &Bloom, parallelism: usize) -> bool {
        let parallelism = parallelism.max(1);
        if self.clauses.len() <= parallelism {
            return self.clauses.iter().all(|clause| clause_matches(bloom, clause));
        }
        let chunk_size = self.clauses.len().div_ceil(parallelism);
        self.clauses
            .par_chunks(chunk_size)
            .all(|chunk| chunk.iter().all(|clause| clause_matches(bloom, clause)))
    }
}

/// Encode address and topic candidates into a [`BloomFilter`].
pub fn encode_filters(addresses: &[Address], topics: &[Vec<B256>]) -> BloomFilter {
    BloomFilter::new(addresses, topics)
}

/// True if the bloom may contain a log satisfying the filter.
pub fn match_filters(bloom: &Bloom, filter: &BloomFilter) -> bool {
    filter.matches(bloom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{BloomInput, Log, LogData, address};
    use proptest::prelude::*;

    const A: Address = address!("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
    const T: B256 = B256::repeat_byte(0xcc);

    fn bloom_of(address: Address, topics: Vec<B256>) -> Bloom {
        let mut bloom = Bloom::default();
        bloom.accrue_log(&Log { address, data: LogData::new_unchecked(topics, Default::default()) });
        bloom
    }

    #[test]
    fn indexes_agree_with_alloy() {
        let mut bloom = Bloom::default();
        bloom.accrue(BloomInput::Raw(A.as_slice()));
        assert!(contains_indexes(&bloom, &bloom_indexes(A.as_slice())));
        assert!(bloom_indexes(A.as_slice()).iter().all(|&i| i < 2048));
    }

    #[test]
    fn membership() {
        let bloom = bloom_of(A, vec![T]);
        assert!(match_filters(&bloom, &encode_filters(&[A], &[])));
        assert!(match_filters(&bloom, &encode_filters(&[], &[vec![T]])));
        assert!(match_filters(&bloom, &encode_filters(&[A], &[vec![T]])));

        let other = Address::repeat_byte(0x11);
        assert!(!match_filters(&bloom, &encode_filters(&[other], &[])));
        assert!(!match_filters(&bloom, &encode_filters(&[], &[vec![B256::repeat_byte(0x22)]])));
    }

    #[test]
    fn empty_positions_are_wildcards() {
        let bloom = bloom_of(A, vec![T]);
        let filter = encode_filters(&[], &[vec![], vec![T], vec![]]);
        assert_eq!(filter.len(), 1);
        assert!(match_filters(&bloom, &filter));
        assert!(encode_filters(&[], &[vec![], vec![]]).is_empty());
        assert!(match_filters(&Bloom::default(), &BloomFilter::default()));
    }

    #[test]
    fn or_within_and_across() {
        let bloom = bloom_of(A, vec![T]);
        let other = Address::repeat_byte(0x11);
        assert!(match_filters(&bloom, &encode_filters(&[other, A], &[])));
        assert!(!match_filters(&bloom, &encode_filters(&[A], &[vec![B256::repeat_byte(0x22)]])));
    }

    #[test]
    fn from_rpc_filter() {
        let bloom = bloom_of(A, vec![T]);
        let filter = Filter::new().address(A).event_signature(T);
        assert!(BloomFilter::from_filter(&filter).matches(&bloom));
        let filter = Filter::new().address(Address::repeat_byte(0x11));
        assert!(!BloomFilter::from_filter(&filter).matches(&bloom));
    }

    #[test]
    fn wide_filter_matches_at_host_parallelism() {
        let bloom = bloom_of(A, vec![T]);
        let width = *PARALLELISM * 2 + 1;
        let topics: Vec<Vec<B256>> = (0..width).map(|_| vec![T]).collect();
        let filter = encode_filters(&[A], &topics);
        assert_eq!(filter.len(), width + 1);
        assert!(filter.matches(&bloom));

        let mut topics = topics;
        topics[width - 1] = vec![B256::repeat_byte(0x22)];
        assert!(!encode_filters(&[A], &topics).matches(&bloom));
    }

    proptest! {
        #[test]
        fn inserted_values_match(addr in any::<[u8; 20]>(), topic in any::<[u8; 32]>()) {
            let addr = Address::from(addr);
            let topic = B256::from(topic);
            let bloom = bloom_of(addr, vec![topic]);
            prop_assert!(match_filters(&bloom, &encode_filters(&[addr], &[])));
            prop_assert!(match_filters(&bloom, &encode_filters(&[], &[vec![topic]])));
            prop_assert!(match_filters(&bloom, &encode_filters(&[addr], &[vec![topic]])));
        }

        #[test]
        fn partitioning_is_deterministic(
            seeds in proptest::collection::vec(any::<[u8; 32]>(), 1..24),
            present in proptest::collection::vec(any::<bool>(), 24),
        ) {
            let mut bloom = Bloom::default();
            let topics: Vec<Vec<B256>> = seeds
                .iter()
                .zip(&present)
                .map(|(seed, &inserted)| {
                    let topic = B256::from(*seed);
                    if inserted {
                        bloom.accrue(BloomInput::Raw(topic.as_slice()));
                    }
                    vec![topic]
                })
                .collect();
            let filter = encode_filters(&[], &topics);
            let sequential = filter.matches_with_parallelism(&bloom, usize::MAX);
            for parallelism in [1, 2, 3, 7] {
                prop_assert_eq!(filter.matches_with_parallelism(&bloom, parallelism), sequential);
            }
        }
    }
}
