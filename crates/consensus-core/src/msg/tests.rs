use super::{
    BlockSignatures, ConsensusMessage, EndorseVote, HeartbeatBody, MsgKind, PeerStatus, VoteMsg,
};
use crate::block::BlockHash;
use crate::height::{Height, View};
use crate::peer::{PeerIdx, PeerSeckey};
use crate::signed::{Signable as _, SignatureEntry, Signed};

fn block_signatures_msg() -> ConsensusMessage {
    let sigs = BlockSignatures {
        height: Height::from(3),
        view: View::from(1),
        block_hash: BlockHash::from_bytes([0xab; 32]),
        sigs: vec![],
    };
    let vote = sigs.commit_vote();

    ConsensusMessage::BlockSignatures(BlockSignatures {
        sigs: (0u16..3)
            .map(|i| SignatureEntry::new(PeerIdx::from(i), vote.sign_with(PeerSeckey::generate())))
            .collect(),
        ..sigs
    })
}

fn endorsement_msg() -> ConsensusMessage {
    let seckey = PeerSeckey::generate();
    ConsensusMessage::BlockEndorsement(VoteMsg {
        voter: PeerIdx::from(2),
        vote: Signed::new_sign(
            EndorseVote {
                height: Height::from(7),
                view: View::from(2),
                block_hash: BlockHash::from_bytes([1; 32]),
            },
            seckey,
        ),
    })
}

#[test]
fn block_signatures_round_trip_is_byte_identical() {
    let msg = block_signatures_msg();
    let bytes = msg.to_bytes();

    // kind + view + height + hash + count + 3 * (sig len + sig + idx)
    assert_eq!(bytes.len(), 1 + 4 + 8 + 32 + 1 + 3 * (1 + 64 + 2));
    assert_eq!(bytes[0], MsgKind::BlockSignatures as u8);
    assert_eq!(&bytes[1..5], &[0, 0, 0, 1]);
    assert_eq!(&bytes[5..13], &[0, 0, 0, 0, 0, 0, 0, 3]);

    let decoded = ConsensusMessage::from_bytes(&bytes).expect("valid message");
    assert_eq!(decoded, msg);
    assert_eq!(decoded.to_bytes(), bytes);
}

#[test]
fn decode_rejects_truncated_input() {
    let bytes = block_signatures_msg().to_bytes();

    for len in [0, 1, 5, 13, bytes.len() - 1] {
        assert!(ConsensusMessage::from_bytes(&bytes[..len]).is_err(), "{len}");
    }
}

#[test]
fn decode_rejects_trailing_bytes() {
    let mut bytes = endorsement_msg().to_bytes();
    bytes.push(0);

    assert!(ConsensusMessage::from_bytes(&bytes).is_err());
}

#[test]
fn decode_rejects_unknown_kind() {
    let mut bytes = endorsement_msg().to_bytes();
    bytes[0] = 0x7f;

    assert!(ConsensusMessage::from_bytes(&bytes).is_err());
}

#[test]
fn decode_rejects_header_view_mismatch() {
    let msg = endorsement_msg();
    let mut bytes = msg.to_bytes();
    assert_eq!(msg.view(), View::from(2));

    bytes[4] = 3;
    assert!(ConsensusMessage::from_bytes(&bytes).is_err());
}

#[test]
fn decode_rejects_bad_signature_length() {
    let mut bytes = block_signatures_msg().to_bytes();
    let first_sig_len = 1 + 4 + 8 + 32 + 1;
    assert_eq!(bytes[first_sig_len], 64);

    bytes[first_sig_len] = 63;
    assert!(ConsensusMessage::from_bytes(&bytes).is_err());
}

#[test]
fn decode_rejects_non_canonical_count() {
    let bytes = block_signatures_msg().to_bytes();
    let count = 1 + 4 + 8 + 32;
    assert_eq!(bytes[count], 3);

    // The same count, as an over-long varint
    let mut irregular = bytes[..count].to_vec();
    irregular.extend_from_slice(&[251, 0, 3]);
    irregular.extend_from_slice(&bytes[count + 1..]);

    assert!(ConsensusMessage::from_bytes(&irregular).is_err());
}

#[test]
fn viewless_messages_use_zero_view() {
    let seckey = PeerSeckey::generate();
    let msg = ConsensusMessage::PeerHeartbeat(Signed::new_sign(
        HeartbeatBody {
            sender: PeerIdx::from(1),
            status: PeerStatus {
                committed_height: Height::from(10),
                ..PeerStatus::default()
            },
        },
        seckey,
    ));

    let bytes = msg.to_bytes();
    assert_eq!(&bytes[1..5], &[0, 0, 0, 0]);
    assert_eq!(msg.height(), None);
    assert_eq!(ConsensusMessage::from_bytes(&bytes).expect("valid"), msg);

    let ConsensusMessage::PeerHeartbeat(decoded) = ConsensusMessage::from_bytes(&bytes).expect("valid")
    else {
        panic!("wrong kind");
    };
    decoded
        .verify_sig_peer_pubkey(seckey.pubkey())
        .expect("valid signature");
}
