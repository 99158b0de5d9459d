use assert_matches::assert_matches;
use bincode::{Decode, Encode};

use super::{
    Hashable, InvalidNotarizationError, Signable, SignatureEntry, Signed, verify_notarization,
};
use crate::peer::{PeerIdx, PeerSeckey};

#[derive(Encode, Decode, Clone, Debug, PartialEq, Eq)]
struct Ping(u64);

impl Hashable for Ping {}
impl Signable for Ping {
    const TAG: [u8; 4] = *b"ping";
}

#[test]
fn signed_verifies_only_with_signer_key() {
    let seckey = PeerSeckey::generate();
    let other = PeerSeckey::generate();

    let signed = Signed::new_sign(Ping(3), seckey);

    signed
        .verify_sig_peer_pubkey(seckey.pubkey())
        .expect("valid signature");
    assert!(signed.verify_sig_peer_pubkey(other.pubkey()).is_err());

    let tampered = Signed::new(Ping(4), signed.sig);
    assert!(tampered.verify_sig_peer_pubkey(seckey.pubkey()).is_err());
}

#[test]
fn notarization_requires_threshold_of_distinct_valid_signers() {
    let seckeys: Vec<_> = (0..4).map(|_| PeerSeckey::generate()).collect();
    let pubkey_of = |idx: PeerIdx| seckeys.get(idx.as_usize()).map(|s| s.pubkey());
    let msg = Ping(7);

    let entry = |i: u16| SignatureEntry::new(PeerIdx::from(i), msg.sign_with(seckeys[usize::from(i)]));

    verify_notarization(&msg, &[entry(0), entry(1), entry(3)], 3, pubkey_of)
        .expect("quorum of valid signatures");

    assert_matches!(
        verify_notarization(&msg, &[entry(0), entry(1)], 3, pubkey_of),
        Err(InvalidNotarizationError::NotEnoughSignatures { has: 2, threshold: 3 })
    );

    assert_matches!(
        verify_notarization(&msg, &[entry(0), entry(1), entry(1)], 3, pubkey_of),
        Err(InvalidNotarizationError::DuplicateSigner { .. })
    );

    let mut forged = entry(2);
    forged.sig = msg.sign_with(seckeys[0]);
    assert_matches!(
        verify_notarization(&msg, &[entry(0), entry(1), forged], 3, pubkey_of),
        Err(InvalidNotarizationError::InvalidPeerSignature { peer_idx }) if peer_idx == PeerIdx::from(2)
    );
}
