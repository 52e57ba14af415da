//! End-to-end tests: real nodes talking over loopback TCP.

use gossip_chain::core::{Block, Blockchain};
use gossip_chain::network::{Message, Node, NodeConfig};
use gossip_chain::storage::ChainStore;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const HOST: &str = "127.0.0.1";

fn free_port() -> u16 {
    std::net::TcpListener::bind((HOST, 0))
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn config(dir: &Path, port: u16, seeds: Vec<String>) -> NodeConfig {
    NodeConfig {
        host: HOST.to_string(),
        port,
        seed_peers: seeds,
        data_path: dir.join(format!("chain-{}.json", port)),
        difficulty: 1,
        ..Default::default()
    }
}

fn chain_of(len: u64) -> Blockchain {
    let mut blockchain = Blockchain::with_difficulty(1);
    for i in 1..len {
        blockchain.add_block(Block::unlinked(i, "2024-02-18", format!("block {}", i)));
    }
    blockchain
}

fn spawn_node(config: NodeConfig) -> Arc<Node> {
    let node = Arc::new(Node::new(config).unwrap());
    let runner = node.clone();
    tokio::spawn(async move {
        runner.start().await.unwrap();
    });
    node
}

async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_new_node_adopts_longer_seed_chain() {
    let dir = tempfile::tempdir().unwrap();
    let (port_a, port_b) = (free_port(), free_port());

    let config_a = config(dir.path(), port_a, vec![]);
    ChainStore::new(&config_a.data_path)
        .save(&chain_of(3))
        .unwrap();
    let node_a = spawn_node(config_a);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let config_b = config(dir.path(), port_b, vec![format!("{}:{}", HOST, port_a)]);
    let data_path_b = config_b.data_path.clone();
    let node_b = spawn_node(config_b);

    let b = node_b.clone();
    assert!(eventually(|| {
        let b = b.clone();
        async move { b.status().await.height == 3 }
    })
    .await);

    // Both ends registered each other under their listening identities
    let a = node_a.clone();
    assert!(eventually(|| {
        let a = a.clone();
        async move { a.status().await.peers == vec![format!("{}:{}", HOST, port_b)] }
    })
    .await);
    assert_eq!(
        node_b.status().await.peers,
        vec![format!("{}:{}", HOST, port_a)]
    );

    // Adoption was persisted
    let persisted = ChainStore::new(&data_path_b).load(1).unwrap().unwrap();
    assert_eq!(persisted.blocks, chain_of(3).blocks);

    node_a.shutdown().await.unwrap();
    node_b.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_mined_block_reaches_peer() {
    let dir = tempfile::tempdir().unwrap();
    let (port_a, port_b) = (free_port(), free_port());

    let node_a = spawn_node(config(dir.path(), port_a, vec![]));
    tokio::time::sleep(Duration::from_millis(100)).await;
    let node_b = spawn_node(config(
        dir.path(),
        port_b,
        vec![format!("{}:{}", HOST, port_a)],
    ));

    let a = node_a.clone();
    assert!(eventually(|| {
        let a = a.clone();
        async move { a.status().await.peers.len() == 1 }
    })
    .await);

    let block = node_a.mine_block("{\"amount\":4}").await.unwrap();
    assert_eq!(block.index, 1);

    let b = node_b.clone();
    assert!(eventually(|| {
        let b = b.clone();
        async move { b.status().await.height == 2 }
    })
    .await);
    assert_eq!(
        node_b.chain_sync.chain_snapshot().await,
        node_a.chain_sync.chain_snapshot().await
    );

    node_a.shutdown().await.unwrap();
    node_b.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_node_never_dials_itself() {
    let dir = tempfile::tempdir().unwrap();
    let port = free_port();
    let own_id = format!("{}:{}", HOST, port);

    let node = spawn_node(config(dir.path(), port, vec![own_id.clone()]));
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(node.status().await.peers.is_empty());
    assert!(!node.peer_manager.contains(&own_id).await);

    node.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_raw_socket_protocol() {
    let dir = tempfile::tempdir().unwrap();
    let port = free_port();
    let node = spawn_node(config(dir.path(), port, vec![]));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stream = TcpStream::connect((HOST, port)).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    // Bootstrap sequence from the node
    let first = lines.next_line().await.unwrap().unwrap();
    let second = lines.next_line().await.unwrap().unwrap();
    assert_eq!(Message::decode(&first).unwrap(), Message::BlockchainRequest);
    assert!(matches!(
        Message::decode(&second).unwrap(),
        Message::PeersRequest(addr) if addr.port == port
    ));

    // A malformed line is dropped; the two requests after it in the same
    // write are answered in order
    write_half
        .write_all(
            b"{oops\n{\"type\":\"blockchain_request\",\"data\":null}\n\
              {\"type\":\"peers_request\",\"data\":{\"host\":\"127.0.0.1\",\"port\":1}}\n",
        )
        .await
        .unwrap();

    let reply = lines.next_line().await.unwrap().unwrap();
    match Message::decode(&reply).unwrap() {
        Message::BlockchainResponse(blocks) => assert_eq!(blocks, vec![Blockchain::genesis()]),
        other => panic!("unexpected {}", other.type_name()),
    }

    let reply = lines.next_line().await.unwrap().unwrap();
    assert_eq!(
        Message::decode(&reply).unwrap(),
        Message::PeersResponse(vec!["127.0.0.1:1".to_string()])
    );

    drop(write_half);
    drop(lines);
    assert!(eventually(|| {
        let node = node.clone();
        async move { node.status().await.peers.is_empty() }
    })
    .await);

    node.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_non_reading_peer_does_not_stall_node() {
    let dir = tempfile::tempdir().unwrap();
    let port = free_port();
    let node = spawn_node(config(dir.path(), port, vec![]));
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Floods requests and never reads a single reply
    let flooder = TcpStream::connect((HOST, port)).await.unwrap();
    let flood = tokio::spawn(async move {
        let (_read_half, mut write_half) = flooder.into_split();
        let chunk = b"{\"type\":\"blockchain_request\",\"data\":null}\n".repeat(20_000);
        for _ in 0..20 {
            if write_half.write_all(&chunk).await.is_err() {
                break;
            }
        }
        tokio::time::sleep(Duration::from_secs(10)).await;
    });
    tokio::time::sleep(Duration::from_millis(500)).await;

    let stream = TcpStream::connect((HOST, port)).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    // Skip the bootstrap frames
    lines.next_line().await.unwrap().unwrap();
    lines.next_line().await.unwrap().unwrap();

    write_half
        .write_all(b"{\"type\":\"blockchain_request\",\"data\":null}\n")
        .await
        .unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
        .await
        .expect("node stalled behind a non-reading peer")
        .unwrap()
        .unwrap();
    assert!(matches!(
        Message::decode(&reply).unwrap(),
        Message::BlockchainResponse(_)
    ));

    flood.abort();
    node.shutdown().await.unwrap();
}
