use std::collections::BTreeMap;
use std::time::Duration;

use crate::event_timer::TimerKind;

/// Tunables of a consensus node
///
/// All timeouts are upper bounds on how long a node waits before giving up
/// on a view. View `v` scales the protocol timeouts by `2^min(v, max_view_backoff_exp)`.
#[derive(Debug, Clone, bon::Builder)]
pub struct ConsensusConfig {
    /// Delay between entering a height and the leader proposing
    #[builder(default = Duration::from_millis(200))]
    pub block_interval: Duration,
    #[builder(default = Duration::from_secs(2))]
    pub propose_timeout: Duration,
    #[builder(default = Duration::from_secs(2))]
    pub endorse_timeout: Duration,
    #[builder(default = Duration::from_secs(2))]
    pub commit_timeout: Duration,
    #[builder(default = Duration::from_secs(2))]
    pub change_view_timeout: Duration,
    #[builder(default = Duration::from_millis(500))]
    pub heartbeat_interval: Duration,
    #[builder(default = 5)]
    pub max_view_backoff_exp: u32,
    #[builder(default = 1000)]
    pub max_block_txs: usize,
    /// Number of most recent sealed blocks kept around to answer fetches
    #[builder(default = 64)]
    pub block_pool_capacity: usize,
    #[builder(default = 1024)]
    pub event_queue_capacity: usize,
    /// Max number of messages for the next height buffered until we get there
    #[builder(default = 256)]
    pub future_buffer_limit: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ConsensusConfig {
    pub fn timer_delays(&self) -> BTreeMap<TimerKind, Duration> {
        BTreeMap::from([
            (TimerKind::Round, self.block_interval),
            (TimerKind::ProposeBlock, self.propose_timeout),
            (TimerKind::EndorseBlock, self.endorse_timeout),
            (TimerKind::CommitBlock, self.commit_timeout),
            (TimerKind::ChangeView, self.change_view_timeout),
            (TimerKind::PeerHeartbeat, self.heartbeat_interval),
        ])
    }
}
