//! End-to-end enumeration against a scripted fake device: a UDP responder
//! that speaks just enough of the routing-control protocol to exercise
//! name, counts, tx and rx queries.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use tokio::net::UdpSocket;

use netaudio_core::consts::SERVICE_ARC;
use netaudio_core::{Device, ServiceEndpoint};

const PAGE_HEADER: usize = 12;

fn finish(mut frame: Vec<u8>) -> Vec<u8> {
    let len = frame.len() as u16;
    frame[2..4].copy_from_slice(&len.to_be_bytes());
    frame
}

fn response_header(request: &[u8]) -> Vec<u8> {
    // mirror sequence and command ids, length patched in later
    vec![
        0x27,
        request[1],
        0x00,
        0x00,
        request[4],
        request[5],
        request[6],
        request[7],
    ]
}

fn name_response(request: &[u8]) -> Vec<u8> {
    let mut frame = response_header(request);
    frame.extend_from_slice(&[0x00, 0x00]);
    frame.extend_from_slice(b"studio-bridge");
    frame.push(0x00);
    finish(frame)
}

fn counts_response(request: &[u8]) -> Vec<u8> {
    let mut frame = response_header(request);
    frame.extend_from_slice(&[0x00, 0x00, 0x00, 0x01, 0x00, 0x02, 0x00, 0x02]);
    finish(frame)
}

fn friendly_names_response(request: &[u8]) -> Vec<u8> {
    let mut frame = response_header(request);
    frame.extend_from_slice(&[0x00, 0x00, 0x00, 0x02]); // page header tail
    let label_at = (PAGE_HEADER + 2 * 6) as u16;

    // channel 1 carries a friendly name, channel 2 does not
    frame.extend_from_slice(&0u16.to_be_bytes());
    frame.extend_from_slice(&1u16.to_be_bytes());
    frame.extend_from_slice(&label_at.to_be_bytes());
    frame.extend_from_slice(&1u16.to_be_bytes());
    frame.extend_from_slice(&2u16.to_be_bytes());
    frame.extend_from_slice(&0u16.to_be_bytes());
    frame.extend_from_slice(b"Main L\0");
    finish(frame)
}

fn tx_response(request: &[u8]) -> Vec<u8> {
    let mut frame = response_header(request);
    frame.extend_from_slice(&[0x00, 0x00, 0x00, 0x02]);

    let labels_at = PAGE_HEADER + 2 * 8;
    let out1_at = labels_at as u16;
    let out2_at = out1_at + 6;
    // both records share one group word, which points at the rate block
    let group = (labels_at + 12) as u16;

    for (number, name_at) in [(1u16, out1_at), (2u16, out2_at)] {
        frame.extend_from_slice(&number.to_be_bytes());
        frame.extend_from_slice(&0u16.to_be_bytes());
        frame.extend_from_slice(&group.to_be_bytes());
        frame.extend_from_slice(&name_at.to_be_bytes());
    }
    frame.extend_from_slice(b"out-1\0");
    frame.extend_from_slice(b"out-2\0");
    frame.push(0x00);
    frame.extend_from_slice(&[0x00, 0xbb, 0x80]); // 48 kHz
    finish(frame)
}

fn rx_response(request: &[u8]) -> Vec<u8> {
    let mut frame = response_header(request);
    frame.extend_from_slice(&[0x00, 0x00, 0x00, 0x02]);

    let labels_at = PAGE_HEADER + 2 * 20;
    let in1_at = labels_at as u16;
    let in2_at = in1_at + 5;
    let out1_at = in2_at + 5;
    let self_at = out1_at + 6;
    let rate_hint = self_at + 1; // the dot label's NUL; rate follows it

    // channel 1: subscribed to out-1 on this device (the "." literal)
    frame.extend_from_slice(&1u16.to_be_bytes());
    frame.extend_from_slice(&0u16.to_be_bytes());
    frame.extend_from_slice(&rate_hint.to_be_bytes());
    frame.extend_from_slice(&out1_at.to_be_bytes());
    frame.extend_from_slice(&self_at.to_be_bytes());
    frame.extend_from_slice(&in1_at.to_be_bytes());
    frame.extend_from_slice(&0x0101u16.to_be_bytes());
    frame.extend_from_slice(&0x0004u16.to_be_bytes());
    frame.extend_from_slice(&[0x00; 4]);

    // channel 2: nothing subscribed
    frame.extend_from_slice(&2u16.to_be_bytes());
    frame.extend_from_slice(&0u16.to_be_bytes());
    frame.extend_from_slice(&0u16.to_be_bytes());
    frame.extend_from_slice(&0u16.to_be_bytes());
    frame.extend_from_slice(&0u16.to_be_bytes());
    frame.extend_from_slice(&in2_at.to_be_bytes());
    frame.extend_from_slice(&0u16.to_be_bytes());
    frame.extend_from_slice(&0u16.to_be_bytes());
    frame.extend_from_slice(&[0x00; 4]);

    frame.extend_from_slice(b"in-1\0");
    frame.extend_from_slice(b"in-2\0");
    frame.extend_from_slice(b"out-1\0");
    frame.extend_from_slice(b".\0");
    frame.extend_from_slice(&[0x00, 0xbb, 0x80]);
    finish(frame)
}

/// Answers routing-control queries like a two-by-two channel device named
/// "studio-bridge" whose first rx channel loops back to its own "out-1".
async fn spawn_fake_device() -> u16 {
    let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let port = socket.local_addr().unwrap().port();

    tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        while let Ok((len, src)) = socket.recv_from(&mut buf).await {
            let request = &buf[..len];
            if len < 8 || request[0] != 0x27 {
                continue;
            }

            let command = u16::from_be_bytes([request[6], request[7]]);
            let response = match command {
                0x1002 => name_response(request),
                0x1000 => counts_response(request),
                0x2010 => friendly_names_response(request),
                0x2000 => tx_response(request),
                0x3000 => rx_response(request),
                _ => continue,
            };
            let _ = socket.send_to(&response, src).await;
        }
    });

    port
}

fn fake_device(arc_port: u16) -> Device {
    let mut device = Device::new("studio-bridge.local.");
    device.attach_service(ServiceEndpoint {
        name: "studio-bridge._netaudio-arc._udp.local.".into(),
        service_type: SERVICE_ARC.into(),
        ipv4: Ipv4Addr::LOCALHOST,
        port: arc_port,
        properties: HashMap::new(),
    });
    device
}

#[tokio::test]
async fn full_enumeration_fills_the_model() {
    let port = spawn_fake_device().await;
    let mut device = fake_device(port);

    device.get_controls().await.unwrap();

    assert_eq!(device.name, "studio-bridge");
    assert_eq!((device.tx_count, device.rx_count), (2, 2));
    assert_eq!((device.tx_count_raw, device.rx_count_raw), (2, 2));
    assert!(device.error.is_none());

    assert_eq!(device.tx_channels.len(), 2);
    assert_eq!(device.tx_channels[&1].name, "out-1");
    assert_eq!(device.tx_channels[&1].friendly_name.as_deref(), Some("Main L"));
    assert_eq!(device.tx_channels[&2].friendly_name, None);
    assert_eq!(device.sample_rate, Some(48_000));

    assert_eq!(device.rx_channels.len(), 2);
    assert_eq!(device.rx_channels[&1].name, "in-1");
    assert_eq!(device.rx_channels[&1].status_code, Some(0x0101));
}

#[tokio::test]
async fn self_subscriptions_unfold_to_the_device_name() {
    let port = spawn_fake_device().await;
    let mut device = fake_device(port);

    device.get_controls().await.unwrap();

    assert_eq!(device.subscriptions.len(), 1);
    let sub = &device.subscriptions[0];
    assert_eq!(sub.rx_channel_name, "in-1");
    assert_eq!(sub.tx_channel_name, "out-1");
    assert_eq!(sub.tx_device_name, "studio-bridge", "the '.' literal means self");
    assert_eq!(sub.status_code, 4);
}

#[tokio::test]
async fn repeated_enumeration_is_idempotent() {
    let port = spawn_fake_device().await;
    let mut device = fake_device(port);

    device.get_controls().await.unwrap();
    let rx_first = device.rx_channels.clone();
    let tx_first = device.tx_channels.clone();
    let subs_first = device.subscriptions.clone();

    device.get_controls().await.unwrap();
    assert_eq!(device.rx_channels, rx_first);
    assert_eq!(device.tx_channels, tx_first);
    assert_eq!(device.subscriptions, subs_first);

    // a forced re-read converges to the same routing view
    device.invalidate_routing();
    device.get_controls().await.unwrap();
    assert_eq!(device.rx_channels, rx_first);
    assert_eq!(device.subscriptions, subs_first);
}

#[tokio::test]
async fn missing_service_is_recorded_not_fatal() {
    let mut device = Device::new("ghost.local.");
    device.set_ipv4(Ipv4Addr::LOCALHOST);

    device.get_controls().await.unwrap();

    assert!(device.error.is_some());
    assert!(device.name.is_empty());
    assert!(device.rx_channels.is_empty());
}

#[tokio::test]
async fn silent_device_leaves_partial_state() {
    // a responder that only ever answers the name query
    let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let port = socket.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        while let Ok((len, src)) = socket.recv_from(&mut buf).await {
            let request = &buf[..len];
            if len >= 8 && u16::from_be_bytes([request[6], request[7]]) == 0x1002 {
                let _ = socket.send_to(&name_response(request), src).await;
            }
        }
    });

    let mut device = fake_device(port);
    device.get_controls().await.unwrap();

    assert_eq!(device.name, "studio-bridge");
    assert_eq!(device.rx_count, 0, "counts query timed out");
    assert!(device.rx_channels.is_empty());
}

#[tokio::test]
async fn subscription_mutation_round_trips() {
    // acks routing mutations by echoing the header back
    let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let port = socket.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        while let Ok((len, src)) = socket.recv_from(&mut buf).await {
            let request = &buf[..len];
            let command = u16::from_be_bytes([request[6], request[7]]);
            if command == 0x3010 || command == 0x3014 {
                let _ = socket.send_to(&finish(response_header(request)), src).await;
            }
        }
    });

    let mut device = fake_device(port);
    let ack = device
        .add_subscription(1, "mic-mix-high", "lx-dante")
        .await
        .unwrap();
    assert_eq!(ack[6..8], [0x30, 0x10]);

    let ack = device.remove_subscription(1).await.unwrap();
    assert_eq!(ack[6..8], [0x30, 0x14]);
}

#[tokio::test]
async fn unacknowledged_mutation_is_a_timeout() {
    let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let port = socket.local_addr().unwrap().port();

    let mut device = fake_device(port);
    let err = device.remove_subscription(1).await.unwrap_err();
    assert!(matches!(err, netaudio_core::NetaudioError::Timeout(_)));
    drop(socket);
}
