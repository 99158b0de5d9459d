use vbft_consensus_core::block::{ChainBlock, CrossChainMsg};
use vbft_consensus_core::exec::StateRoot;
use vbft_consensus_core::height::Height;
use vbft_util_db::def_table;

def_table! {
    /// Height of the last submitted block (singleton)
    ledger_height: () => Height
}

def_table! {
    ledger_blocks: Height => ChainBlock
}

def_table! {
    /// State root after executing the block at given height
    ledger_state_roots: Height => StateRoot
}

def_table! {
    ledger_cross_roots: Height => StateRoot
}

def_table! {
    ledger_cross_msgs: Height => CrossChainMsg
}

def_table! {
    /// Current state, as built from all the submitted write sets
    ledger_state: Vec<u8> => Vec<u8>
}
