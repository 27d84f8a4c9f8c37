//! A full transfer over real UDP sockets on loopback.

use std::sync::Arc;
use std::time::Duration;

use udp_sr_core::{ReceiverEngine, SenderEngine, TransferConfig, UdpTransport};

#[tokio::test]
async fn file_crosses_loopback_intact() {
    let config = TransferConfig {
        linger_ms: 100,
        ..TransferConfig::default()
    };
    let data: Vec<u8> = (0..12_345u32).map(|i| (i % 251) as u8).collect();

    let server = UdpTransport::bind("127.0.0.1:0").await.expect("bind server socket");
    let server_addr = server.local_addr().unwrap();
    let receiver = ReceiverEngine::new(Arc::new(server), config.clone()).unwrap();
    let receiving = tokio::spawn(async move {
        let mut sink = Vec::new();
        receiver.run(&mut sink).await.map(|report| (sink, report))
    });

    let client = UdpTransport::bind("127.0.0.1:0").await.expect("bind client socket");
    let sender = SenderEngine::new(Arc::new(client), server_addr, config).unwrap();
    let sent = tokio::time::timeout(Duration::from_secs(10), sender.run(&mut &data[..], data.len() as u64))
        .await
        .expect("sender timed out")
        .expect("sender failed");

    let (sink, received) = tokio::time::timeout(Duration::from_secs(10), receiving)
        .await
        .expect("receiver timed out")
        .expect("receiver task panicked")
        .expect("receiver failed");

    assert_eq!(sink, data);
    assert_eq!(sent.bytes, data.len() as u64);
    assert_eq!(received.bytes, data.len() as u64);
    assert_eq!(sent.rounds, received.rounds);
}
