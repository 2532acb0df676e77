// =============================================================================
// QMesh Distributed QPU - Classical Channel
// =============================================================================
// Table of Contents:
//   1. InboundEvent - Reader-thread events
//   2. ClassicalChannel - Peer-addressed transport
//   3. Connection management
//   4. Send / receive
// =============================================================================
// Purpose: Reliable, ordered, peer-addressed transport between QPU processes.
//          Inbound connections announce their identity in the first frame;
//          reader threads queue (peer, payload) events onto one crossbeam
//          channel. A receive is peer-selective: frames from other peers are
//          buffered FIFO and stay available for their own receives, while the
//          caller blocks until a frame from the requested peer arrives.
// =============================================================================

use crate::error::ChannelError;
use crate::framing::{read_frame, write_frame};
use crate::registry::{DeploymentMode, DiscoveryRegistry, PeerRecord};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::{TcpListener, TcpStream};
use std::time::Duration;

// =============================================================================
// 1. InboundEvent - Reader-thread events
// =============================================================================

#[derive(Debug)]
enum InboundEvent {
    Frame { peer: String, payload: Vec<u8> },
    PeerClosed { peer: String },
}

// =============================================================================
// 2. ClassicalChannel - Peer-addressed transport
// =============================================================================

pub struct ClassicalChannel {
    local_identifier: String,
    local_endpoint: String,
    registry: DiscoveryRegistry,
    inbound_receiver: Receiver<InboundEvent>,
    pending_frames: Mutex<HashMap<String, VecDeque<Vec<u8>>>>,
    closed_peers: Mutex<HashSet<String>>,
    outbound_connections: Mutex<HashMap<String, TcpStream>>,
    receive_timeout: Option<Duration>,
}

impl ClassicalChannel {
    pub fn bind(
        local_identifier: impl Into<String>,
        registry: DiscoveryRegistry,
    ) -> Result<Self, ChannelError> {
        let local_identifier = local_identifier.into();
        let listener = TcpListener::bind(("127.0.0.1", 0))?;
        let local_endpoint = listener.local_addr()?.to_string();

        let (inbound_sender, inbound_receiver) = unbounded();
        spawn_acceptor(listener, inbound_sender);

        tracing::debug!(
            identifier = %local_identifier,
            endpoint = %local_endpoint,
            "classical channel bound"
        );

        Ok(Self {
            local_identifier,
            local_endpoint,
            registry,
            inbound_receiver,
            pending_frames: Mutex::new(HashMap::new()),
            closed_peers: Mutex::new(HashSet::new()),
            outbound_connections: Mutex::new(HashMap::new()),
            receive_timeout: None,
        })
    }

    // Global bound on every blocking receive; expiry surfaces as Timeout.
    pub fn with_receive_timeout(mut self, bound: Duration) -> Self {
        self.receive_timeout = Some(bound);
        self
    }

    pub fn local_identifier(&self) -> &str {
        &self.local_identifier
    }

    pub fn local_endpoint(&self) -> &str {
        &self.local_endpoint
    }

    // =========================================================================
    // 3. Connection management
    // =========================================================================

    // Advertises this channel's endpoint under its identifier.
    pub fn publish(&self, mode: DeploymentMode) -> Result<(), ChannelError> {
        let record = PeerRecord::new(self.local_endpoint.clone(), mode);
        self.registry.publish(&self.local_identifier, &record)?;
        Ok(())
    }

    // Resolves the peer through the registry once and connects; repeat calls
    // are no-ops.
    pub fn connect(&self, peer: &str) -> Result<(), ChannelError> {
        let mut connections = self.outbound_connections.lock();
        if connections.contains_key(peer) {
            return Ok(());
        }

        let record = self
            .registry
            .lookup(peer)?
            .ok_or_else(|| ChannelError::PeerNotRegistered {
                peer: peer.to_string(),
            })?;

        let mut stream = TcpStream::connect(&record.endpoint)?;
        stream.set_nodelay(true)?;
        // Identity frame: tells the remote acceptor who this connection is.
        write_frame(&mut stream, self.local_identifier.as_bytes())?;
        connections.insert(peer.to_string(), stream);

        tracing::debug!(peer, endpoint = %record.endpoint, "connected to peer");
        Ok(())
    }

    // =========================================================================
    // 4. Send / receive
    // =========================================================================

    pub fn send_info(&self, payload: &[u8], peer: &str) -> Result<(), ChannelError> {
        let mut connections = self.outbound_connections.lock();
        let stream = connections
            .get_mut(peer)
            .ok_or_else(|| ChannelError::NotConnected {
                peer: peer.to_string(),
            })?;
        write_frame(stream, payload).map_err(|error| ChannelError::SendFailed {
            peer: peer.to_string(),
            reason: error.to_string(),
        })
    }

    pub fn recv_info(&self, origin: &str) -> Result<Vec<u8>, ChannelError> {
        if let Some(payload) = self.pop_pending(origin) {
            return Ok(payload);
        }

        loop {
            if self.closed_peers.lock().contains(origin) {
                return Err(ChannelError::Closed {
                    peer: origin.to_string(),
                });
            }

            let event = match self.receive_timeout {
                Some(bound) => match self.inbound_receiver.recv_timeout(bound) {
                    Ok(event) => event,
                    Err(RecvTimeoutError::Timeout) => {
                        return Err(ChannelError::Timeout {
                            peer: origin.to_string(),
                        })
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        return Err(ChannelError::Closed {
                            peer: origin.to_string(),
                        })
                    }
                },
                None => self
                    .inbound_receiver
                    .recv()
                    .map_err(|_| ChannelError::Closed {
                        peer: origin.to_string(),
                    })?,
            };

            match event {
                InboundEvent::Frame { peer, payload } => {
                    if peer == origin {
                        return Ok(payload);
                    }
                    self.pending_frames
                        .lock()
                        .entry(peer)
                        .or_default()
                        .push_back(payload);
                }
                InboundEvent::PeerClosed { peer } => {
                    self.closed_peers.lock().insert(peer.clone());
                    if peer == origin {
                        return Err(ChannelError::Closed { peer });
                    }
                }
            }
        }
    }

    pub fn send_measure(&self, measurement: u8, peer: &str) -> Result<(), ChannelError> {
        let payload: &[u8] = if measurement == 1 { b"1" } else { b"0" };
        self.send_info(payload, peer)
    }

    pub fn recv_measure(&self, origin: &str) -> Result<u8, ChannelError> {
        let payload = self.recv_info(origin)?;
        match payload.as_slice() {
            b"0" => Ok(0),
            b"1" => Ok(1),
            _ => Err(ChannelError::MalformedMeasurement {
                peer: origin.to_string(),
            }),
        }
    }

    fn pop_pending(&self, origin: &str) -> Option<Vec<u8>> {
        self.pending_frames
            .lock()
            .get_mut(origin)
            .and_then(|queue| queue.pop_front())
    }
}

fn spawn_acceptor(listener: TcpListener, inbound_sender: Sender<InboundEvent>) {
    std::thread::spawn(move || {
        for connection in listener.incoming() {
            match connection {
                Ok(stream) => {
                    let sender = inbound_sender.clone();
                    std::thread::spawn(move || run_reader(stream, sender));
                }
                Err(error) => {
                    tracing::warn!(%error, "acceptor failed; stopping");
                    break;
                }
            }
        }
    });
}

fn run_reader(mut stream: TcpStream, inbound_sender: Sender<InboundEvent>) {
    let peer = match read_frame(&mut stream) {
        Ok(identity) => String::from_utf8_lossy(&identity).into_owned(),
        Err(error) => {
            tracing::warn!(%error, "connection dropped before identifying itself");
            return;
        }
    };

    loop {
        match read_frame(&mut stream) {
            Ok(payload) => {
                if inbound_sender
                    .send(InboundEvent::Frame {
                        peer: peer.clone(),
                        payload,
                    })
                    .is_err()
                {
                    return;
                }
            }
            Err(_) => {
                let _ = inbound_sender.send(InboundEvent::PeerClosed { peer });
                return;
            }
        }
    }
}
