use vbft_consensus_core::Signature;
use vbft_consensus_core::block::BlockHash;
use vbft_consensus_core::peer::PeerIdx;

use super::{TallyOutcome, VoteSet, VoteTally};

#[test]
fn vote_set_sanity() {
    let mut set = VoteSet::default();

    assert!(set.insert(PeerIdx::from(3u16)));
    assert!(!set.insert(PeerIdx::from(3u16)));
    assert!(set.contains(PeerIdx::from(3u16)));
    assert!(!set.contains(PeerIdx::from(4u16)));
    assert!(!set.contains(PeerIdx::from(2u16)));
    set.insert(PeerIdx::from(100u16));
    assert!(set.contains(PeerIdx::from(100u16)));
    assert_eq!(set.len(), 2);

    assert_eq!(
        set.iter().collect::<Vec<_>>(),
        vec![PeerIdx::from(3u16), PeerIdx::from(100u16)]
    );

    assert!(set.remove(PeerIdx::from(3u16)));
    assert_eq!(set.len(), 1);
    assert!(!set.is_empty());
}

#[test]
fn tally_counts_first_vote_only() {
    let a = BlockHash::from_bytes([1; 32]);
    let b = BlockHash::from_bytes([2; 32]);
    let mut tally = VoteTally::default();

    for i in 0u16..2 {
        assert_eq!(
            tally.insert(PeerIdx::from(i), a, Signature::ZERO),
            TallyOutcome::Inserted
        );
    }
    assert_eq!(
        tally.insert(PeerIdx::from(1u16), a, Signature::ZERO),
        TallyOutcome::Duplicate
    );
    assert_eq!(
        tally.insert(PeerIdx::from(1u16), b, Signature::ZERO),
        TallyOutcome::Conflicting { existing: a }
    );
    assert_eq!(
        tally.insert(PeerIdx::from(2u16), b, Signature::ZERO),
        TallyOutcome::Inserted
    );

    assert_eq!(tally.count_for(a), 2);
    assert_eq!(tally.count_for(b), 1);
    assert_eq!(tally.len(), 3);
    assert_eq!(tally.quorum_block(3), None);
    assert_eq!(tally.quorum_block(2), Some(a));

    let sigs = tally.signatures_for(a);
    assert_eq!(
        sigs.iter().map(|s| s.peer_idx).collect::<Vec<_>>(),
        vec![PeerIdx::from(0u16), PeerIdx::from(1u16)]
    );
}
