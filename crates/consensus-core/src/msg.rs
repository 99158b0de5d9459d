//! Consensus wire messages
//!
//! Every message is `[u8 kind][fixed u32 view]` followed by the
//! kind-specific body. Decoding is fail-closed: unknown kinds, truncated or
//! trailing data, a view in the body disagreeing with the header, and any
//! non-canonical encoding are all rejected.

use bincode::de::Decoder;
use bincode::enc::Encoder;
use bincode::error::{DecodeError, EncodeError};
use bincode::{Decode, Encode};
use snafu::{ResultExt as _, Snafu};
use vbft_util_bincode::decode_canonical;

use crate::bincode::STD_BINCODE_CONFIG;
use crate::block::{Block, BlockHash};
use crate::chain_config::ChainConfigHash;
use crate::height::{Height, View};
use crate::peer::PeerIdx;
use crate::signed::{Hashable, Signable, SignatureEntry, Signed};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgKind {
    BlockProposal = 0x01,
    BlockEndorsement = 0x02,
    BlockCommit = 0x03,
    BlockSignatures = 0x04,
    ChangeView = 0x05,
    PeerHandshake = 0x10,
    PeerHeartbeat = 0x11,
    BlockFetch = 0x20,
    BlockFetchResponse = 0x21,
}

impl TryFrom<u8> for MsgKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x01 => Self::BlockProposal,
            0x02 => Self::BlockEndorsement,
            0x03 => Self::BlockCommit,
            0x04 => Self::BlockSignatures,
            0x05 => Self::ChangeView,
            0x10 => Self::PeerHandshake,
            0x11 => Self::PeerHeartbeat,
            0x20 => Self::BlockFetch,
            0x21 => Self::BlockFetchResponse,
            other => return Err(other),
        })
    }
}

/// A block proposal by the leader of `view`
#[derive(Debug, Encode, Decode, Clone, PartialEq, Eq)]
pub struct ProposalBody {
    pub height: Height,
    pub view: View,
    /// Random, makes two otherwise identical proposals distinct messages
    pub nonce: u64,
    pub proposer: PeerIdx,
    pub block: Block,
}

impl Hashable for ProposalBody {}
impl Signable for ProposalBody {
    const TAG: [u8; 4] = *b"prop";
}

#[derive(Debug, Encode, Decode, Clone, Copy, PartialEq, Eq)]
pub struct EndorseVote {
    pub height: Height,
    pub view: View,
    pub block_hash: BlockHash,
}

impl Hashable for EndorseVote {}
impl Signable for EndorseVote {
    const TAG: [u8; 4] = *b"endo";
}

#[derive(Debug, Encode, Decode, Clone, Copy, PartialEq, Eq)]
pub struct CommitVote {
    pub height: Height,
    pub view: View,
    pub block_hash: BlockHash,
}

impl Hashable for CommitVote {}
impl Signable for CommitVote {
    const TAG: [u8; 4] = *b"cmit";
}

/// A vote, along with the index of the voter who signed it
#[derive(Debug, Encode, Decode, Clone, PartialEq, Eq)]
pub struct VoteMsg<T> {
    pub voter: PeerIdx,
    pub vote: Signed<T>,
}

/// Aggregated commit signatures over `CommitVote { height, view, block_hash }`
///
/// `view` travels in the message header only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSignatures {
    pub height: Height,
    pub view: View,
    pub block_hash: BlockHash,
    pub sigs: Vec<SignatureEntry>,
}

impl BlockSignatures {
    pub fn commit_vote(&self) -> CommitVote {
        CommitVote {
            height: self.height,
            view: self.view,
            block_hash: self.block_hash,
        }
    }
}

/// A block some committer locked on, carried along view changes
///
/// `sigs` is the endorse quorum over `EndorseVote { height, view, block_hash }`
/// the lock was taken on, so a lock can't be claimed for an arbitrary view.
#[derive(Debug, Encode, Decode, Clone, PartialEq, Eq)]
pub struct LockedBlock {
    pub view: View,
    pub block: Block,
    pub sigs: Vec<SignatureEntry>,
}

impl LockedBlock {
    pub fn endorse_vote(&self) -> EndorseVote {
        EndorseVote {
            height: self.block.height(),
            view: self.view,
            block_hash: self.block.hash(),
        }
    }
}

#[derive(Debug, Encode, Decode, Clone, PartialEq, Eq)]
pub struct ChangeViewBody {
    pub height: Height,
    /// View the sender is leaving
    pub view: View,
    pub new_view: View,
    pub sender: PeerIdx,
    pub locked: Option<LockedBlock>,
}

impl Hashable for ChangeViewBody {}
impl Signable for ChangeViewBody {
    const TAG: [u8; 4] = *b"chvw";
}

/// What a peer advertises about its own chain
#[derive(Debug, Encode, Decode, Clone, Copy, PartialEq, Eq, Default)]
pub struct PeerStatus {
    pub committed_height: Height,
    pub committed_hash: BlockHash,
    pub committed_leader: PeerIdx,
    pub view_at_commit: View,
}

#[derive(Debug, Encode, Decode, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeBody {
    pub sender: PeerIdx,
    pub status: PeerStatus,
    pub chain_config_hash: ChainConfigHash,
}

impl Hashable for HandshakeBody {}
impl Signable for HandshakeBody {
    const TAG: [u8; 4] = *b"hnds";
}

#[derive(Debug, Encode, Decode, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatBody {
    pub sender: PeerIdx,
    pub status: PeerStatus,
}

impl Hashable for HeartbeatBody {}
impl Signable for HeartbeatBody {
    const TAG: [u8; 4] = *b"hrtb";
}

#[derive(Debug, Encode, Decode, Clone, Copy, PartialEq, Eq)]
pub struct BlockFetchRequest {
    pub height: Height,
}

/// A block along with the commit signatures that sealed it
#[derive(Debug, Encode, Decode, Clone, PartialEq, Eq)]
pub struct SealedBlock {
    pub block: Block,
    pub view: View,
    pub sigs: Vec<SignatureEntry>,
}

impl SealedBlock {
    pub fn height(&self) -> Height {
        self.block.height()
    }

    pub fn commit_vote(&self) -> CommitVote {
        CommitVote {
            height: self.block.height(),
            view: self.view,
            block_hash: self.block.hash(),
        }
    }

    pub fn to_block_signatures(&self) -> BlockSignatures {
        BlockSignatures {
            height: self.block.height(),
            view: self.view,
            block_hash: self.block.hash(),
            sigs: self.sigs.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsensusMessage {
    BlockProposal(Signed<ProposalBody>),
    BlockEndorsement(VoteMsg<EndorseVote>),
    BlockCommit(VoteMsg<CommitVote>),
    BlockSignatures(BlockSignatures),
    ChangeView(Signed<ChangeViewBody>),
    PeerHandshake(Signed<HandshakeBody>),
    PeerHeartbeat(Signed<HeartbeatBody>),
    BlockFetch(BlockFetchRequest),
    BlockFetchResponse(SealedBlock),
}

#[derive(Debug, Snafu)]
#[snafu(display("Invalid consensus message"))]
pub struct MsgDecodeError {
    source: DecodeError,
}

pub type MsgDecodeResult<T> = Result<T, MsgDecodeError>;

impl ConsensusMessage {
    pub fn kind(&self) -> MsgKind {
        match self {
            ConsensusMessage::BlockProposal(_) => MsgKind::BlockProposal,
            ConsensusMessage::BlockEndorsement(_) => MsgKind::BlockEndorsement,
            ConsensusMessage::BlockCommit(_) => MsgKind::BlockCommit,
            ConsensusMessage::BlockSignatures(_) => MsgKind::BlockSignatures,
            ConsensusMessage::ChangeView(_) => MsgKind::ChangeView,
            ConsensusMessage::PeerHandshake(_) => MsgKind::PeerHandshake,
            ConsensusMessage::PeerHeartbeat(_) => MsgKind::PeerHeartbeat,
            ConsensusMessage::BlockFetch(_) => MsgKind::BlockFetch,
            ConsensusMessage::BlockFetchResponse(_) => MsgKind::BlockFetchResponse,
        }
    }

    /// The view in the message header
    ///
    /// Messages not bound to any view use `0`.
    pub fn view(&self) -> View {
        match self {
            ConsensusMessage::BlockProposal(p) => p.view,
            ConsensusMessage::BlockEndorsement(v) => v.vote.view,
            ConsensusMessage::BlockCommit(v) => v.vote.view,
            ConsensusMessage::BlockSignatures(s) => s.view,
            ConsensusMessage::ChangeView(c) => c.view,
            ConsensusMessage::BlockFetchResponse(s) => s.view,
            ConsensusMessage::PeerHandshake(_)
            | ConsensusMessage::PeerHeartbeat(_)
            | ConsensusMessage::BlockFetch(_) => View::ZERO,
        }
    }

    /// Height of the consensus instance this message belongs to, if any
    pub fn height(&self) -> Option<Height> {
        Some(match self {
            ConsensusMessage::BlockProposal(p) => p.height,
            ConsensusMessage::BlockEndorsement(v) => v.vote.height,
            ConsensusMessage::BlockCommit(v) => v.vote.height,
            ConsensusMessage::BlockSignatures(s) => s.height,
            ConsensusMessage::ChangeView(c) => c.height,
            ConsensusMessage::PeerHandshake(_)
            | ConsensusMessage::PeerHeartbeat(_)
            | ConsensusMessage::BlockFetch(_)
            | ConsensusMessage::BlockFetchResponse(_) => return None,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::encode_to_vec(self, STD_BINCODE_CONFIG).expect("Can't fail")
    }

    pub fn from_bytes(bytes: &[u8]) -> MsgDecodeResult<Self> {
        decode_canonical(bytes, STD_BINCODE_CONFIG).context(MsgDecodeSnafu)
    }
}

impl Encode for ConsensusMessage {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        (self.kind() as u8).encode(encoder)?;
        self.view().encode(encoder)?;

        match self {
            ConsensusMessage::BlockProposal(m) => m.encode(encoder),
            ConsensusMessage::BlockEndorsement(m) => m.encode(encoder),
            ConsensusMessage::BlockCommit(m) => m.encode(encoder),
            ConsensusMessage::BlockSignatures(m) => {
                m.height.encode(encoder)?;
                m.block_hash.encode(encoder)?;
                m.sigs.encode(encoder)
            }
            ConsensusMessage::ChangeView(m) => m.encode(encoder),
            ConsensusMessage::PeerHandshake(m) => m.encode(encoder),
            ConsensusMessage::PeerHeartbeat(m) => m.encode(encoder),
            ConsensusMessage::BlockFetch(m) => m.encode(encoder),
            ConsensusMessage::BlockFetchResponse(m) => m.encode(encoder),
        }
    }
}

impl<Context> Decode<Context> for ConsensusMessage {
    fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
        let kind = MsgKind::try_from(u8::decode(decoder)?)
            .map_err(|_| DecodeError::Other("unknown message kind"))?;
        let view = View::decode(decoder)?;

        let msg = match kind {
            MsgKind::BlockProposal => Self::BlockProposal(Decode::decode(decoder)?),
            MsgKind::BlockEndorsement => Self::BlockEndorsement(Decode::decode(decoder)?),
            MsgKind::BlockCommit => Self::BlockCommit(Decode::decode(decoder)?),
            MsgKind::BlockSignatures => Self::BlockSignatures(BlockSignatures {
                height: Decode::decode(decoder)?,
                view,
                block_hash: Decode::decode(decoder)?,
                sigs: Decode::decode(decoder)?,
            }),
            MsgKind::ChangeView => Self::ChangeView(Decode::decode(decoder)?),
            MsgKind::PeerHandshake => Self::PeerHandshake(Decode::decode(decoder)?),
            MsgKind::PeerHeartbeat => Self::PeerHeartbeat(Decode::decode(decoder)?),
            MsgKind::BlockFetch => Self::BlockFetch(Decode::decode(decoder)?),
            MsgKind::BlockFetchResponse => Self::BlockFetchResponse(Decode::decode(decoder)?),
        };

        if msg.view() != view {
            return Err(DecodeError::Other("header view mismatch"));
        }

        Ok(msg)
    }
}

#[cfg(test)]
mod tests;
