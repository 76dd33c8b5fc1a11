use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{anyhow, Context};
use bytes::{Bytes, BytesMut};
use tokio::net::UdpSocket;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::id::MemberId;

/// A datagram handed to a node. `sender` is the transport-level source, the reply-to of a PING.
#[derive(PartialEq, Debug, Clone)]
pub struct InboundMessage {
    pub content: Bytes,
    pub sender: MemberId,
}

#[derive(PartialEq, Debug, Clone)]
pub struct OutboundMessage {
    pub content: Bytes,
    pub target: MemberId,
}

/// Fire-and-forget, unreliable delivery. An `Ok` only means the message left this node.
pub trait NetworkClient: Sync + Send {
    fn send(&self, message: OutboundMessage) -> anyhow::Result<()>;
}

/// Delivers straight into the inbound channel of each member.
pub struct InMemoryNetworkClient {
    channel_map: HashMap<MemberId, Sender<InboundMessage>>,
    my_id: MemberId,
}

impl InMemoryNetworkClient {
    pub fn new(channel_map: HashMap<MemberId, Sender<InboundMessage>>, my_id: MemberId) -> InMemoryNetworkClient {
        return InMemoryNetworkClient { channel_map, my_id };
    }
}

impl NetworkClient for InMemoryNetworkClient {
    fn send(&self, message: OutboundMessage) -> anyhow::Result<()> {
        let channel = self
            .channel_map
            .get(&message.target)
            .with_context(|| format!("no channel for {}", message.target))?;
        channel
            .send(InboundMessage { content: message.content, sender: self.my_id })
            .map_err(|_| anyhow!("{} is no longer receiving", message.target))?;
        return Ok(());
    }
}

/// Keeps everything sent, for inspection.
#[derive(Debug, Default, Clone)]
pub struct RecordingNetworkClient {
    sent: Arc<Mutex<Vec<OutboundMessage>>>,
}

impl RecordingNetworkClient {
    pub fn new() -> RecordingNetworkClient {
        return RecordingNetworkClient::default();
    }

    /// Drains everything sent so far.
    pub fn take(&self) -> Vec<OutboundMessage> {
        return std::mem::take(&mut *self.sent.lock().unwrap_or_else(PoisonError::into_inner));
    }
}

impl NetworkClient for RecordingNetworkClient {
    fn send(&self, message: OutboundMessage) -> anyhow::Result<()> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).push(message);
        return Ok(());
    }
}

/// Sends over UDP; the target identity is the destination address.
pub struct UdpNetworkClient {
    socket: Arc<UdpSocket>,
    runtime: Handle,
}

impl UdpNetworkClient {
    pub fn new(socket: Arc<UdpSocket>, runtime: Handle) -> UdpNetworkClient {
        return UdpNetworkClient { socket, runtime };
    }
}

impl NetworkClient for UdpNetworkClient {
    fn send(&self, message: OutboundMessage) -> anyhow::Result<()> {
        let socket = self.socket.clone();
        self.runtime.spawn(async move {
            if let Err(err) = send_message(socket, message.content, message.target.socket_addr()).await {
                log::warn!("Wasn't able to send to {}: {:?}", message.target, err);
            }
        });
        return Ok(());
    }
}

/// Forwards every datagram received on `socket` to `sender` until cancelled.
pub async fn start_udp_server(cancellation_token: CancellationToken,
                              socket: Arc<UdpSocket>,
                              sender: Sender<InboundMessage>) -> anyhow::Result<()> {
    let result = tokio::spawn(async move {
        tokio::select! {
                _ = cancellation_token.cancelled() => {
                    Ok(())
                }
                result = process_incoming_request(socket, sender) => {
                    result
                }
            }
    }).await?;
    return result;
}

async fn process_incoming_request(socket: Arc<UdpSocket>, sender: Sender<InboundMessage>) -> anyhow::Result<()> {
    log::debug!("Start udp worker on {:?}", socket.local_addr());
    loop {
        let mut bytes_mut: BytesMut = BytesMut::with_capacity(64 * 1024);
        let (len, socket_address) = socket.recv_buf_from(&mut bytes_mut).await?;
        log::trace!("Receive msg with len {} from {}", len, socket_address);
        let message = InboundMessage { content: bytes_mut.split_to(len).freeze(), sender: MemberId::from(socket_address) };
        sender.send(message).context("inbound queue closed")?;
    }
}

async fn send_message(socket: Arc<UdpSocket>, bytes: Bytes, socket_addr: SocketAddr) -> anyhow::Result<()> {
    let sent = socket.send_to(bytes.as_ref(), socket_addr).await?;
    if sent != bytes.len() {
        log::warn!("Partial send: {} of {} bytes to {}", sent, bytes.len(), socket_addr);
    }
    return Ok(());
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn in_memory_client_tags_messages_with_sender() {
        let (a, b) = (MemberId::new(1, 1), MemberId::new(2, 2));
        let (sender, receiver) = mpsc::channel();
        let client = InMemoryNetworkClient::new(HashMap::from([(b, sender)]), a);
        //when
        client.send(OutboundMessage { content: Bytes::from("ping"), target: b }).unwrap();
        //then
        assert_eq!(InboundMessage { content: Bytes::from("ping"), sender: a }, receiver.recv().unwrap());
        assert!(client.send(OutboundMessage { content: Bytes::new(), target: MemberId::new(3, 3) }).is_err());
    }

    #[test]
    fn should_received_and_send_messages() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .thread_name("udp_test_thread")
            .enable_all()
            .build()
            .expect("Failed to create udp_test_thread runtime");
        let server_socket = Arc::new(runtime.block_on(async {
            return UdpSocket::bind("127.0.0.1:0").await.unwrap();
        }));
        let server_address = server_socket.local_addr().unwrap();
        let (sender, receiver) = mpsc::channel();
        let cancellation_token = CancellationToken::new();
        let server_token = cancellation_token.clone();
        runtime.spawn(async move { start_udp_server(server_token, server_socket, sender).await.unwrap() });

        let client_socket = Arc::new(runtime.block_on(async {
            return UdpSocket::bind("127.0.0.1:0").await.unwrap();
        }));
        let client_address = client_socket.local_addr().unwrap();
        let client = UdpNetworkClient::new(client_socket, runtime.handle().clone());
        client.send(OutboundMessage { content: Bytes::from("test"), target: MemberId::from(server_address) }).unwrap();

        let result = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        let expected = InboundMessage { content: Bytes::from("test"), sender: MemberId::from(client_address) };
        assert_eq!(expected, result);
        cancellation_token.cancel();
    }
}
