// SPDX-License-Identifier: MIT

//! VBFT consensus
//!
//! A single worker ([`server::Server`]) drives the agreement on one block
//! height at a time: a VRF-selected leader proposes, voters endorse and
//! commit, and a quorum of commit signatures seals the block into the
//! [`chain_store::ChainStore`]. Network transport and the transaction pool
//! are provided by the caller through the [`network`] traits.
pub mod block_pool;
pub mod chain_store;
pub mod config;
pub mod event;
pub mod event_timer;
pub mod network;
pub mod peer_pool;
pub mod server;
pub mod vote_set;

#[cfg(test)]
mod test_utils;
