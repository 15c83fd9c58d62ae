// DNS probe: hand-built A query for example.com over UDP, timed from send to
// a validated response (matching transaction id, clean RCODE).

use std::time::{Duration, Instant};

use tokio::net::UdpSocket;

use super::ProbeError;

const QUERY_NAME: &[u8] = &[
    7, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 3, b'c', b'o', b'm', 0,
];

pub(super) async fn run(address: &str, timeout: Duration) -> Result<f64, ProbeError> {
    let target = if address.contains(':') {
        address.to_string()
    } else {
        format!("{}:53", address)
    };

    let tx_id: u16 = rand::random();
    let packet = build_query(tx_id);

    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .map_err(|e| ProbeError::Transport(format!("bind: {e}")))?;
    socket
        .connect(&target)
        .await
        .map_err(|e| ProbeError::Transport(format!("connect {target}: {e}")))?;

    let start = Instant::now();
    socket
        .send(&packet)
        .await
        .map_err(|e| ProbeError::Transport(format!("send: {e}")))?;

    // 512 bytes is the classic UDP DNS ceiling.
    let mut response = [0u8; 512];
    let n = tokio::time::timeout(timeout, socket.recv(&mut response))
        .await
        .map_err(|_| ProbeError::Timeout(timeout))?
        .map_err(|e| ProbeError::Transport(format!("recv: {e}")))?;

    let elapsed = start.elapsed().as_nanos() as f64;

    if n < 12 {
        return Err(ProbeError::Transport(format!(
            "response too short: {n} bytes"
        )));
    }
    let resp_tx_id = u16::from_be_bytes([response[0], response[1]]);
    if resp_tx_id != tx_id {
        return Err(ProbeError::Transport(format!(
            "transaction id mismatch: got {resp_tx_id}, expected {tx_id}"
        )));
    }
    let rcode = response[3] & 0x0f;
    if rcode != 0 {
        return Err(ProbeError::Transport(format!("server returned RCODE {rcode}")));
    }

    Ok(elapsed)
}

fn build_query(tx_id: u16) -> Vec<u8> {
    let mut packet = Vec::with_capacity(12 + QUERY_NAME.len() + 4);
    packet.extend_from_slice(&tx_id.to_be_bytes());
    packet.extend_from_slice(&0x0100u16.to_be_bytes()); // recursion desired
    packet.extend_from_slice(&1u16.to_be_bytes()); // one question
    packet.extend_from_slice(&0u16.to_be_bytes());
    packet.extend_from_slice(&0u16.to_be_bytes());
    packet.extend_from_slice(&0u16.to_be_bytes());
    packet.extend_from_slice(QUERY_NAME);
    packet.extend_from_slice(&1u16.to_be_bytes()); // QTYPE A
    packet.extend_from_slice(&1u16.to_be_bytes()); // QCLASS IN
    packet
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_packet_has_header_and_question() {
        let packet = build_query(0xabcd);
        assert_eq!(packet.len(), 12 + QUERY_NAME.len() + 4);
        assert_eq!(&packet[0..2], &[0xab, 0xcd]);
        assert_eq!(&packet[2..4], &[0x01, 0x00]);
        assert_eq!(&packet[4..6], &[0x00, 0x01]);
        // Question ends with type A, class IN.
        assert_eq!(&packet[packet.len() - 4..], &[0, 1, 0, 1]);
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        // TEST-NET-1: no DNS server will answer.
        let result = run("192.0.2.1", Duration::from_millis(100)).await;
        match result {
            Err(ProbeError::Timeout(_)) | Err(ProbeError::Transport(_)) => {}
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
