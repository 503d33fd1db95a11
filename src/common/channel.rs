//! Inter-process control channel
//!
//! Coordinator and workers exchange [`ControlMessage`]s as newline-delimited
//! JSON over a pipe pair (the worker's stdin and stdout). Sending is
//! fire-and-forget: messages are queued and a writer task drains the queue
//! into the pipe, so a sender never waits on the peer.

use crate::common::{Error, Record, Result};
use serde::{Deserialize, Serialize};
use std::io;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Messages exchanged between the coordinator and its workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Worker → coordinator: the worker's full record set after a local write
    ChangeNotification { records: Vec<Record> },

    /// Coordinator → worker: authoritative record set, replaces the worker's copy
    SyncSnapshot { seq: u64, records: Vec<Record> },

    /// Worker → coordinator: the worker's listener is bound
    Ready { port: u16 },
}

impl ControlMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::ChangeNotification { .. } => "change_notification",
            ControlMessage::SyncSnapshot { .. } => "sync_snapshot",
            ControlMessage::Ready { .. } => "ready",
        }
    }
}

/// Sending half of a channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ChannelSender {
    tx: mpsc::UnboundedSender<ControlMessage>,
}

impl ChannelSender {
    /// Queue a message for the peer. Fails only once the writer has stopped.
    pub fn send(&self, msg: ControlMessage) -> Result<()> {
        let kind = msg.kind();
        self.tx
            .send(msg)
            .map_err(|_| Error::ChannelSend(format!("{} dropped, peer gone", kind)))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Start a writer task that serializes queued messages onto `writer`.
///
/// The task ends when every sender is dropped or the pipe breaks.
pub fn spawn_writer<W>(writer: W) -> (ChannelSender, JoinHandle<()>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<ControlMessage>();
    let handle = tokio::spawn(async move {
        let mut writer = writer;
        while let Some(msg) = rx.recv().await {
            if let Err(e) = write_message(&mut writer, &msg).await {
                tracing::warn!("Control channel write failed: {}", e);
                break;
            }
        }
    });
    (ChannelSender { tx }, handle)
}

async fn write_message<W>(writer: &mut W, msg: &ControlMessage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(msg)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Receiving half of a channel.
pub struct ChannelReceiver<R> {
    lines: Lines<BufReader<R>>,
}

impl<R> ChannelReceiver<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
        }
    }

    /// Next message, or `None` once the peer closes the pipe.
    ///
    /// Lines that don't decode are logged and skipped, including lines that
    /// aren't UTF-8. Only real read failures are returned as errors.
    pub async fn recv(&mut self) -> Result<Option<ControlMessage>> {
        loop {
            let line = match self.lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return Ok(None),
                // The offending line has already been consumed.
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    tracing::warn!("Skipping non UTF-8 control message: {}", e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(msg) => return Ok(Some(msg)),
                Err(e) => tracing::warn!("Skipping undecodable control message: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn record(name: &str) -> Record {
        Record {
            id: Uuid::new_v4(),
            username: name.to_string(),
            age: 30,
            hobbies: vec!["reading".to_string()],
        }
    }

    #[tokio::test]
    async fn test_messages_cross_pipe_in_order() {
        let (near, far) = tokio::io::duplex(64);
        let (sender, _writer) = spawn_writer(near);
        let mut receiver = ChannelReceiver::new(far);

        let records = vec![record("John"), record("Jane")];
        sender
            .send(ControlMessage::ChangeNotification {
                records: records.clone(),
            })
            .unwrap();
        sender.send(ControlMessage::Ready { port: 4001 }).unwrap();

        assert_eq!(
            receiver.recv().await.unwrap(),
            Some(ControlMessage::ChangeNotification { records })
        );
        assert_eq!(
            receiver.recv().await.unwrap(),
            Some(ControlMessage::Ready { port: 4001 })
        );

        drop(sender);
        assert_eq!(receiver.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_garbage_lines_are_skipped() {
        let input = b"not json\n\n{\"type\":\"sync_snapshot\",\"seq\":3,\"records\":[]}\n";
        let mut receiver = ChannelReceiver::new(&input[..]);
        assert_eq!(
            receiver.recv().await.unwrap(),
            Some(ControlMessage::SyncSnapshot {
                seq: 3,
                records: vec![]
            })
        );
        assert_eq!(receiver.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_non_utf8_lines_are_skipped() {
        let input = b"\xff\xfe garbage\n{\"type\":\"ready\",\"port\":9}\n\xc3\n";
        let mut receiver = ChannelReceiver::new(&input[..]);
        assert_eq!(
            receiver.recv().await.unwrap(),
            Some(ControlMessage::Ready { port: 9 })
        );
        assert_eq!(receiver.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_non_utf8_line_does_not_end_pipe() {
        let (mut near, far) = tokio::io::duplex(256);
        let mut receiver = ChannelReceiver::new(far);

        near.write_all(b"\xff\xff\xff\n").await.unwrap();
        near.write_all(b"{\"type\":\"change_notification\",\"records\":[]}\n")
            .await
            .unwrap();
        drop(near);

        assert_eq!(
            receiver.recv().await.unwrap(),
            Some(ControlMessage::ChangeNotification { records: vec![] })
        );
        assert_eq!(receiver.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_send_after_peer_gone() {
        let (near, far) = tokio::io::duplex(64);
        let (sender, writer) = spawn_writer(near);
        drop(far);

        // First write hits the broken pipe and stops the writer.
        let _ = sender.send(ControlMessage::Ready { port: 1 });
        writer.await.unwrap();

        assert!(sender.is_closed());
        assert!(matches!(
            sender.send(ControlMessage::Ready { port: 1 }),
            Err(Error::ChannelSend(_))
        ));
    }

    #[test]
    fn test_wire_format() {
        let line = serde_json::to_string(&ControlMessage::SyncSnapshot {
            seq: 7,
            records: vec![],
        })
        .unwrap();
        assert_eq!(line, r#"{"type":"sync_snapshot","seq":7,"records":[]}"#);
    }
}
