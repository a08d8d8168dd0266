//! ---
//! apex_section: "06-simulation"
//! apex_subsection: "module"
//! apex_type: "source"
//! apex_scope: "code"
//! apex_description: "UDP emitter for generated telemetry."
//! apex_version: "v0.1.0"
//! apex_owner: "tbd"
//! ---
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, Result};
use apex_codec::{encode, TelemetryReading};
use tokio::net::UdpSocket;
use tracing::{debug, info};

use crate::generator::HeadToHead;

/// Sends encoded telemetry packets to a fixed target.
#[derive(Debug)]
pub struct UdpEmitter {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpEmitter {
    /// Bind an ephemeral local socket of the same address family as `target`.
    pub async fn connect(target: SocketAddr) -> Result<Self> {
        let local: SocketAddr = if target.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local)
            .await
            .with_context(|| format!("binding emitter socket for {target}"))?;
        Ok(Self { socket, target })
    }

    /// Destination of every packet.
    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Encode and send one reading.
    pub async fn send(&self, reading: &TelemetryReading) -> Result<()> {
        let packet = encode(reading);
        self.socket
            .send_to(&packet, self.target)
            .await
            .with_context(|| format!("sending {} to {}", reading.vehicle_id, self.target))?;
        Ok(())
    }

    /// Replay `ticks` generator ticks. With `pace` set, sleeps between ticks to approximate
    /// real time; without it, sends as fast as the socket accepts. Returns packets sent.
    pub async fn replay(
        &self,
        generator: &mut HeadToHead,
        ticks: u64,
        pace: Option<Duration>,
    ) -> Result<u64> {
        let mut sent = 0u64;
        for _ in 0..ticks {
            for reading in generator.next_tick() {
                self.send(&reading).await?;
                sent += 1;
            }
            if let Some(pace) = pace {
                tokio::time::sleep(pace).await;
            }
            if generator.torque_anomaly_active() {
                debug!(elapsed = generator.elapsed(), "torque anomaly active");
            }
        }
        info!(target = %self.target, sent, "replay finished");
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use apex_codec::decode;

    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn replay_sends_two_packets_per_tick() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let emitter = UdpEmitter::connect(receiver.local_addr().unwrap())
            .await
            .unwrap();
        let mut generator = HeadToHead::starting_now(11).unwrap();

        let sent = emitter.replay(&mut generator, 3, None).await.unwrap();
        assert_eq!(sent, 6);

        let mut buf = [0u8; 64];
        let mut ids = Vec::new();
        for _ in 0..6 {
            let (len, _) = tokio::time::timeout(Duration::from_secs(2), receiver.recv_from(&mut buf))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(len, apex_codec::PACKET_LEN);
            ids.push(decode(&buf[..len]).unwrap().vehicle_id.to_string());
        }
        assert_eq!(ids.iter().filter(|id| id.as_str() == "CAR_1").count(), 3);
        assert_eq!(ids.iter().filter(|id| id.as_str() == "CAR_81").count(), 3);
    }
}
