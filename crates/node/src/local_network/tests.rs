use std::time::Duration;

use n0_future::task::AbortOnDropHandle;
use vbft_consensus_core::chain_config::ChainConfig;
use vbft_consensus_core::peer::PeerSeckey;
use vbft_consensus_core::peer_set::PeerSet;
use vbft_util_error::BoxedErrorResult;

use super::LocalNetwork;
use crate::{Node, NodeHandle};

async fn start_nodes(
    network: &LocalNetwork,
    config: &ChainConfig,
    seckeys: &[PeerSeckey],
) -> BoxedErrorResult<(Vec<NodeHandle>, Vec<AbortOnDropHandle<()>>)> {
    let mut handles = vec![];
    let mut tasks = vec![];
    for seckey in seckeys {
        let node = Node::builder()
            .seckey(*seckey)
            .chain_config(config.clone())
            .network(network)
            .build()
            .await?;
        handles.push(node.handle());
        tasks.push(AbortOnDropHandle::new(tokio::spawn(async move {
            let _ = node.run().await;
        })));
    }
    Ok((handles, tasks))
}

async fn wait_for(mut cond: impl FnMut() -> bool) -> BoxedErrorResult<()> {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await?;
    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn members_handshake_on_connect() -> BoxedErrorResult<()> {
    let seckeys: Vec<_> = (0..4).map(|_| PeerSeckey::generate()).collect();
    let config = ChainConfig::new(PeerSet::from(
        seckeys.iter().map(|k| k.pubkey()).collect::<Vec<_>>(),
    ));
    let network = LocalNetwork::new();

    // Only two of four are up, not enough to make progress
    let (handles, _tasks) = start_nodes(&network, &config, &seckeys[..2]).await?;
    assert_eq!(network.num_members(), 2);

    wait_for(|| handles.iter().all(|h| h.status().active_peers == 1)).await?;

    network.disconnect(seckeys[1].pubkey());
    assert_eq!(network.num_members(), 1);
    wait_for(|| handles[0].status().active_peers == 0).await?;

    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn silenced_member_is_unreachable() -> BoxedErrorResult<()> {
    let seckeys: Vec<_> = (0..4).map(|_| PeerSeckey::generate()).collect();
    let config = ChainConfig::new(PeerSet::from(
        seckeys.iter().map(|k| k.pubkey()).collect::<Vec<_>>(),
    ));
    let network = LocalNetwork::new();
    network.set_silenced(seckeys[2].pubkey(), true);

    let (handles, mut tasks) = start_nodes(&network, &config, &seckeys[..3]).await?;

    wait_for(|| handles[0].status().active_peers == 1 && handles[1].status().active_peers == 1)
        .await?;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(handles[2].status().active_peers, 0);
    assert_eq!(handles[0].status().active_peers, 1);

    // Heartbeats alone don't establish a connection, restart it
    drop(tasks.pop());
    network.set_silenced(seckeys[2].pubkey(), false);
    network.disconnect(seckeys[2].pubkey());
    let node = Node::builder()
        .seckey(seckeys[2])
        .chain_config(config.clone())
        .network(&network)
        .build()
        .await?;
    let rejoined = node.handle();
    let _task = AbortOnDropHandle::new(tokio::spawn(async move {
        let _ = node.run().await;
    }));

    wait_for(|| rejoined.status().active_peers == 2).await?;

    Ok(())
}
