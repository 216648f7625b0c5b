//! Engine against a simulated Network A radio on a local TCP socket
//!
//! Exercises the real adapter, framing and codec underneath the engine,
//! rather than the mock adapter.

use std::time::Duration;

use bytes::Bytes;
use meshgate_core::{LinkConfig, MeshgateConfigBuilder, NetworkSource};
use meshgate_engine::{register_builtin_handlers, AdapterSlot, Engine, HandlerRegistry, Mode};
use meshgate_transport::codec::meshtastic::{
    decode_record, encode_config_complete, encode_my_info, encode_packet, KIND_PACKET,
    KIND_WANT_CONFIG,
};
use meshgate_transport::{build_adapter, FrameFormat, MeshtasticPort, MeshtasticRecord};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

const RADIO_NODE: u32 = 0xCAFE_0001;
const PEER: u32 = 0x0000_5678;

async fn read_host_frame(socket: &mut TcpStream) -> Vec<u8> {
    let mut header = [0u8; 4];
    socket.read_exact(&mut header).await.unwrap();
    assert_eq!(&header[..2], &[0x94, 0xC3]);
    let len = u16::from_be_bytes([header[2], header[3]]) as usize;
    let mut payload = vec![0u8; len];
    socket.read_exact(&mut payload).await.unwrap();
    payload
}

async fn write_radio_frame(socket: &mut TcpStream, payload: &[u8]) {
    let frame = FrameFormat::Meshtastic.encode(payload).unwrap();
    socket.write_all(&frame).await.unwrap();
}

fn text(from: u32, to: u32, packet_id: u32, text: &str) -> MeshtasticRecord {
    MeshtasticRecord {
        from,
        to,
        packet_id,
        channel: 0,
        port_num: MeshtasticPort::TextMessage.into(),
        payload: Bytes::copy_from_slice(text.as_bytes()),
        hop_limit: 3,
        want_ack: true,
        direct: false,
        rx_snr: Some(6.5),
        rx_rssi: Some(-90),
    }
}

#[tokio::test]
async fn test_direct_ping_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (reply_tx, reply_rx) = oneshot::channel();
    let radio = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let want = read_host_frame(&mut socket).await;
        assert_eq!(want[0], KIND_WANT_CONFIG);
        let id = u32::from_be_bytes([want[1], want[2], want[3], want[4]]);

        write_radio_frame(&mut socket, &encode_my_info(RADIO_NODE)).await;
        write_radio_frame(&mut socket, &encode_config_complete(id)).await;

        // Our own direct to ourselves must never be answered
        write_radio_frame(&mut socket, &encode_packet(&text(RADIO_NODE, RADIO_NODE, 1, "/ping"))).await;
        write_radio_frame(&mut socket, &encode_packet(&text(PEER, RADIO_NODE, 2, "/ping"))).await;

        let reply = read_host_frame(&mut socket).await;
        assert_eq!(reply[0], KIND_PACKET);
        let _ = reply_tx.send(decode_record(&reply[1..]).unwrap());

        // Hold the link until the engine hangs up
        let mut rest = Vec::new();
        let _ = tokio::time::timeout(Duration::from_secs(5), socket.read_to_end(&mut rest)).await;
    });

    let config = MeshgateConfigBuilder::new()
        .link(
            NetworkSource::NetworkA,
            LinkConfig::Tcp {
                host: addr.ip().to_string(),
                port: addr.port(),
            },
        )
        .shutdown_grace(Duration::from_secs(2))
        .build();

    let slot_a = AdapterSlot::from_build(
        config.network_a.enabled,
        build_adapter(NetworkSource::NetworkA, &config.network_a),
    );
    let mut registry = HandlerRegistry::new();
    register_builtin_handlers(&mut registry);

    let engine = Engine::start(config, slot_a, AdapterSlot::Disabled, registry)
        .await
        .unwrap();
    assert_eq!(engine.mode(), Mode::SingleActive(NetworkSource::NetworkA));
    assert_eq!(
        engine.diagnostics().adapters[0].node_id.as_deref(),
        Some("!cafe0001")
    );

    let reply = tokio::time::timeout(Duration::from_secs(5), reply_rx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply.from, RADIO_NODE);
    assert_eq!(reply.to, PEER);
    assert_eq!(reply.payload.as_ref(), b"pong");

    let report = engine.diagnostics();
    assert_eq!(report.pipeline.self_direct_dropped, 1);
    assert_eq!(report.router.dispatched, 1);

    engine.shutdown().await.unwrap();
    radio.await.unwrap();
}
