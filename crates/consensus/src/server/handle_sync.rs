//! Heartbeats, handshakes and catching up with peers ahead of us

use snafu::{ResultExt as _, ensure};
use tracing::{debug, info};
use vbft_consensus_core::height::Height;
use vbft_consensus_core::msg::{
    BlockFetchRequest, BlockSignatures, CommitVote, ConsensusMessage, HandshakeBody,
    HeartbeatBody, SealedBlock,
};
use vbft_consensus_core::peer::{PeerIdx, PeerPubkey};
use vbft_consensus_core::signed::{Signable, SignatureEntry, Signed, verify_notarization};

use super::{
    ChainStoreSnafu, ConsensusResult, InvalidBlockSnafu, InvalidNotarizationSnafu, LOG_TARGET,
    Phase, ProcessMessageResult, Server, WrongHeightSnafu,
};
use crate::event_timer::TimerKind;

impl Server {
    /// Check `sigs` are a quorum of commits of the current height's voters
    fn verify_commit_sigs(&self, vote: &CommitVote, sigs: &[SignatureEntry]) -> ProcessMessageResult<()> {
        self.verify_voter_quorum(vote, sigs)
    }

    /// Check `sigs` are valid signatures of `vote` by a quorum of the current
    /// height's voters
    pub(crate) fn verify_voter_quorum<T>(&self, vote: &T, sigs: &[SignatureEntry]) -> ProcessMessageResult<()>
    where
        T: Signable,
    {
        let participants = &self.round.participants;
        verify_notarization(vote, sigs, participants.quorum(), |peer_idx| {
            if participants.is_voter(peer_idx) {
                self.chain_config.get_peer(peer_idx)
            } else {
                None
            }
        })
        .context(InvalidNotarizationSnafu)
    }

    pub(crate) async fn handle_block_signatures(
        &mut self,
        from: PeerIdx,
        sigs: BlockSignatures,
    ) -> ProcessMessageResult<()> {
        let Some(block) = self.round.block_for(sigs.block_hash).cloned() else {
            debug!(target: LOG_TARGET, %from, height = %sigs.height, "Sealed block we don't have");
            self.request_block(from, sigs.height)?;
            return Ok(());
        };

        self.verify_commit_sigs(&sigs.commit_vote(), &sigs.sigs)?;

        self.seal(SealedBlock {
            block,
            view: sigs.view,
            sigs: sigs.sigs,
        })
        .await?;
        Ok(())
    }

    pub(crate) fn request_block(&self, from: PeerIdx, height: Height) -> ProcessMessageResult<()> {
        let pubkey = self.peer_pubkey(from)?;
        self.network
            .send(pubkey, ConsensusMessage::BlockFetch(BlockFetchRequest { height }));
        Ok(())
    }

    pub(crate) fn handle_block_fetch(
        &self,
        from: PeerIdx,
        req: BlockFetchRequest,
    ) -> ProcessMessageResult<()> {
        let pubkey = self.peer_pubkey(from)?;
        let Some(sealed) = self.block_pool.get_sealed_block(req.height) else {
            debug!(target: LOG_TARGET, %from, height = %req.height, "No sealed block to serve");
            return Ok(());
        };
        self.network
            .send(pubkey, ConsensusMessage::BlockFetchResponse(sealed));
        Ok(())
    }

    pub(crate) async fn handle_block_fetch_response(
        &mut self,
        from: PeerIdx,
        sealed: SealedBlock,
    ) -> ProcessMessageResult<()> {
        let height = self.round.height;
        let received = sealed.height();

        if received < height || self.round.phase == Phase::Sealed {
            return Ok(());
        }
        ensure!(
            received == height,
            WrongHeightSnafu {
                expected: height,
                received,
            }
        );

        self.validate_block(&sealed.block, sealed.view)
            .context(InvalidBlockSnafu)?;
        self.verify_commit_sigs(&sealed.commit_vote(), &sealed.sigs)?;

        debug!(target: LOG_TARGET, %from, %height, "Catching up with fetched block");
        self.seal(sealed).await?;
        self.request_catch_up();
        Ok(())
    }

    /// Ask the peer furthest ahead of us for the next block
    fn request_catch_up(&self) {
        let chained = self.block_pool.chain_store().chained_block_num();
        if let Some(peer) = self.peer_pool.best_peer_ahead_of(chained) {
            let height = chained.next_expect();
            debug!(
                target: LOG_TARGET,
                peer = %peer.idx,
                %height,
                peer_height = %peer.status.committed_height,
                "Fetching block from peer ahead of us"
            );
            self.network
                .send(peer.pubkey, ConsensusMessage::BlockFetch(BlockFetchRequest { height }));
        }
    }

    pub(crate) async fn on_heartbeat_tick(&mut self) -> ConsensusResult<()> {
        self.arm(TimerKind::PeerHeartbeat);

        if let Some(our_idx) = self.our_idx {
            let heartbeat = Signed::new_sign(
                HeartbeatBody {
                    sender: our_idx,
                    status: self.committed_status,
                },
                self.seckey,
            );
            self.network
                .broadcast(ConsensusMessage::PeerHeartbeat(heartbeat));
        }

        if let Some(sealed) = self.pending_seal.take() {
            debug!(target: LOG_TARGET, height = %sealed.height(), "Retrying sealed block");
            return self.seal(sealed).await;
        }

        if self.round.phase == Phase::Sealed {
            let height = self.round.height.next_expect();
            debug!(target: LOG_TARGET, %height, "Retrying entering height");
            return self.enter_height(height).await;
        }

        let chain_store = self.block_pool.chain_store().clone();
        if chain_store
            .reload_from_ledger()
            .await
            .context(ChainStoreSnafu)?
        {
            let height = chain_store.chained_block_num();
            info!(target: LOG_TARGET, %height, "Ledger moved ahead, restarting height");
            self.committed_status = Self::load_committed_status(&self.block_pool).await?;
            return self.enter_height(height.next_expect()).await;
        }

        self.request_catch_up();
        Ok(())
    }

    pub(crate) fn send_handshake(&self, to: PeerPubkey) {
        let Some(our_idx) = self.our_idx else {
            return;
        };
        let handshake = Signed::new_sign(
            HandshakeBody {
                sender: our_idx,
                status: self.committed_status,
                chain_config_hash: self.chain_config.hash(),
            },
            self.seckey,
        );
        self.network
            .send(to, ConsensusMessage::PeerHandshake(handshake));
    }
}
