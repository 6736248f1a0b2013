//! The discovery codec seam.
//!
//! The engine never touches packet bytes directly: it asks a `Discovery`
//! implementation to encode requests, decode announcements and run the
//! unicast handshake. `WireDiscovery` is the reference implementation
//! over the format in `wire`.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::net::TcpStream;

use crate::registrar::RegistrarHandle;
use crate::wire::{
    self, Locator, MulticastAnnouncement, MulticastRequest, PacketKind, ServiceId, UnicastBody,
    UnicastRequestBody, WireError, PROTOCOL_VERSION,
};

/// Concrete parameters derived from configuration, consulted on every
/// encode, decode and handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraints {
    /// Preferred protocol version.
    pub protocol_version: u8,
    /// Upper bound on a multicast datagram.
    pub max_packet_size: usize,
    /// Multicast time-to-live.
    pub multicast_ttl: u32,
    /// Bound on connect and on each unicast read.
    pub unicast_timeout: Duration,
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            max_packet_size: wire::DEFAULT_MAX_PACKET_SIZE,
            multicast_ttl: 15,
            unicast_timeout: Duration::from_secs(60),
        }
    }
}

/// Result of a successful unicast handshake.
#[derive(Clone)]
pub struct UnicastResponse {
    pub service_id: ServiceId,
    pub locator: Locator,
    pub groups: Vec<String>,
    pub handle: Arc<dyn RegistrarHandle>,
}

impl std::fmt::Debug for UnicastResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnicastResponse")
            .field("service_id", &self.service_id)
            .field("locator", &self.locator)
            .field("groups", &self.groups)
            .finish_non_exhaustive()
    }
}

/// Encoding and handshake operations the discovery engine consumes.
pub trait Discovery: Send + Sync {
    /// Pick the protocol version to speak under these constraints.
    fn choose_protocol_version(&self, constraints: &Constraints) -> Result<u8, WireError>;

    /// Encode a multicast request into one or more datagrams.
    fn encode_request(
        &self,
        request: &MulticastRequest,
        constraints: &Constraints,
    ) -> Result<Vec<Vec<u8>>, WireError>;

    /// Decode one received announcement datagram.
    fn decode_announcement(
        &self,
        packet: &[u8],
        constraints: &Constraints,
    ) -> Result<MulticastAnnouncement, WireError>;

    /// Run the discovering side of the unicast handshake over a connected stream.
    fn unicast_discovery<'a>(
        &'a self,
        stream: &'a mut TcpStream,
        constraints: &'a Constraints,
    ) -> BoxFuture<'a, Result<UnicastResponse, WireError>>;
}

/// Reference codec over the Lookout wire format.
#[derive(Debug, Clone, Default)]
pub struct WireDiscovery;

impl WireDiscovery {
    pub fn new() -> Self {
        Self
    }
}

impl Discovery for WireDiscovery {
    fn choose_protocol_version(&self, constraints: &Constraints) -> Result<u8, WireError> {
        match constraints.protocol_version {
            PROTOCOL_VERSION => Ok(PROTOCOL_VERSION),
            other => Err(WireError::UnsupportedProtocol(other)),
        }
    }

    fn encode_request(
        &self,
        request: &MulticastRequest,
        constraints: &Constraints,
    ) -> Result<Vec<Vec<u8>>, WireError> {
        let protocol = self.choose_protocol_version(constraints)?;
        wire::encode_request_packets(request, protocol, constraints.max_packet_size)
    }

    fn decode_announcement(
        &self,
        packet: &[u8],
        constraints: &Constraints,
    ) -> Result<MulticastAnnouncement, WireError> {
        let expected = self.choose_protocol_version(constraints)?;
        let (protocol, ann) = wire::decode_packet(packet, PacketKind::MulticastAnnouncement)?;
        if protocol != expected {
            return Err(WireError::UnsupportedProtocol(protocol));
        }
        Ok(ann)
    }

    fn unicast_discovery<'a>(
        &'a self,
        stream: &'a mut TcpStream,
        constraints: &'a Constraints,
    ) -> BoxFuture<'a, Result<UnicastResponse, WireError>> {
        Box::pin(async move {
            let protocol = self.choose_protocol_version(constraints)?;
            let body = exchange(stream, protocol, constraints.unicast_timeout).await?;
            let handle = Arc::new(UnicastHandle {
                locator: body.locator.clone(),
                constraints: constraints.clone(),
            });
            Ok(UnicastResponse {
                service_id: body.service_id,
                locator: body.locator,
                groups: body.groups,
                handle,
            })
        })
    }
}

/// Send the unicast request and read the response, bounded by `timeout`.
async fn exchange(
    stream: &mut TcpStream,
    protocol: u8,
    timeout: Duration,
) -> Result<UnicastBody, WireError> {
    let io = async {
        wire::write_frame(
            stream,
            PacketKind::UnicastRequest,
            protocol,
            &UnicastRequestBody::default(),
        )
        .await?;
        let (got, body): (u8, UnicastBody) =
            wire::read_frame(stream, PacketKind::UnicastResponse).await?;
        if got != protocol {
            return Err(WireError::UnsupportedProtocol(got));
        }
        Ok(body)
    };
    tokio::time::timeout(timeout, io)
        .await
        .map_err(|_| WireError::Timeout(timeout))?
}

/// Connect to `locator` within `timeout`, trying every resolved address.
pub async fn connect(locator: &Locator, timeout: Duration) -> Result<TcpStream, WireError> {
    let fut = TcpStream::connect((locator.host.as_str(), locator.port));
    let stream = tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| WireError::Timeout(timeout))??;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Remote handle returned by `WireDiscovery`.
///
/// Each call opens a fresh connection and re-runs the unicast exchange;
/// the registry's answer carries its current member groups.
#[derive(Debug, Clone)]
pub struct UnicastHandle {
    locator: Locator,
    constraints: Constraints,
}

impl UnicastHandle {
    pub fn new(locator: Locator, constraints: Constraints) -> Self {
        Self {
            locator,
            constraints,
        }
    }
}

impl RegistrarHandle for UnicastHandle {
    fn member_groups(&self) -> BoxFuture<'_, Result<Vec<String>, WireError>> {
        Box::pin(async move {
            let mut stream = connect(&self.locator, self.constraints.unicast_timeout).await?;
            let body = exchange(
                &mut stream,
                self.constraints.protocol_version,
                self.constraints.unicast_timeout,
            )
            .await?;
            Ok(body.groups)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn body(port: u16, groups: &[&str]) -> UnicastBody {
        UnicastBody {
            service_id: ServiceId([9u8; 16]),
            locator: Locator::new("127.0.0.1", port),
            groups: groups.iter().map(|g| g.to_string()).collect(),
        }
    }

    #[test]
    fn unsupported_protocol_is_rejected() {
        let codec = WireDiscovery::new();
        let constraints = Constraints {
            protocol_version: 1,
            ..Constraints::default()
        };
        assert!(matches!(
            codec.choose_protocol_version(&constraints),
            Err(WireError::UnsupportedProtocol(1))
        ));
    }

    #[test]
    fn decode_announcement_checks_protocol() {
        let codec = WireDiscovery::new();
        let ann = MulticastAnnouncement {
            service_id: ServiceId([1u8; 16]),
            locator: Locator::new("10.1.1.1", 4160),
            groups: vec!["public".into()],
            sequence: Some(3),
        };
        let good = wire::encode_announcement(&ann, PROTOCOL_VERSION).unwrap();
        let old = wire::encode_announcement(&ann, 1).unwrap();

        let constraints = Constraints::default();
        assert_eq!(codec.decode_announcement(&good, &constraints).unwrap(), ann);
        assert!(matches!(
            codec.decode_announcement(&old, &constraints),
            Err(WireError::UnsupportedProtocol(1))
        ));
    }

    #[tokio::test]
    async fn handshake_and_member_groups_against_live_registry() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        // Registry answers two exchanges: discovery, then a member_groups call.
        tokio::spawn(async move {
            for groups in [&["a", "b"][..], &["c"][..]] {
                let (mut s, _) = listener.accept().await.unwrap();
                wire::serve_unicast(&mut s, &body(port, groups)).await.unwrap();
            }
        });

        let codec = WireDiscovery::new();
        let constraints = Constraints {
            unicast_timeout: Duration::from_secs(5),
            ..Constraints::default()
        };
        let mut stream = connect(&Locator::new("127.0.0.1", port), constraints.unicast_timeout)
            .await
            .unwrap();
        let resp = codec.unicast_discovery(&mut stream, &constraints).await.unwrap();
        assert_eq!(resp.service_id, ServiceId([9u8; 16]));
        assert_eq!(resp.groups, vec!["a".to_string(), "b".to_string()]);

        let groups = resp.handle.member_groups().await.unwrap();
        assert_eq!(groups, vec!["c".to_string()]);
    }

    #[tokio::test]
    async fn silent_registry_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _hold = tokio::spawn(async move {
            let (s, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(s);
        });

        let handle = UnicastHandle::new(
            Locator::new("127.0.0.1", port),
            Constraints {
                unicast_timeout: Duration::from_millis(100),
                ..Constraints::default()
            },
        );
        assert!(matches!(
            handle.member_groups().await,
            Err(WireError::Timeout(_))
        ));
    }
}
