//! Unix-socket transport to the presentation layer: one JSON message per line.

use anyhow::{Context, Result, bail};
use log::{debug, info, warn};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

use crate::history::HistoryEntry;
use crate::message::{InboundMessage, OutboundMessage};

const MAX_FRAME_LEN: usize = 64 * 1024;
const CLIENT_TIMEOUT: Duration = Duration::from_secs(2);
const BROADCAST_DEPTH: usize = 64;

pub struct IpcServer {
    listener: UnixListener,
    path: PathBuf,
}

impl IpcServer {
    pub fn bind(path: &Path) -> Result<Self> {
        let _ = std::fs::remove_file(path);
        let listener = UnixListener::bind(path)
            .with_context(|| format!("Failed to bind {}", path.display()))?;

        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;

        info!("listening on {}", path.display());
        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    /// Accept clients until the outbound channel closes. Every client gets the
    /// latest history on connect and each outbound message after that.
    pub async fn serve(
        self,
        inbound: mpsc::Sender<InboundMessage>,
        mut outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    ) -> Result<()> {
        let (frames, _) = broadcast::channel::<Arc<str>>(BROADCAST_DEPTH);
        let latest_history: Arc<RwLock<Option<Arc<str>>>> = Arc::new(RwLock::new(None));

        loop {
            tokio::select! {
                msg = outbound.recv() => {
                    let Some(msg) = msg else { break };
                    let frame: Arc<str> = match serde_json::to_string(&msg) {
                        Ok(json) => json.into(),
                        Err(e) => {
                            warn!("failed to encode {:?}: {}", msg, e);
                            continue;
                        }
                    };
                    if matches!(msg, OutboundMessage::RefreshHistory(_)) {
                        *latest_history.write() = Some(frame.clone());
                    }
                    // no receivers is fine
                    let _ = frames.send(frame);
                }

                accepted = self.listener.accept() => {
                    let (stream, _addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!("accept failed: {}", e);
                            continue;
                        }
                    };

                    #[cfg(target_os = "linux")]
                    {
                        match stream.peer_cred() {
                            Ok(cred) => {
                                let current_uid = unsafe { libc::getuid() };
                                if cred.uid() != current_uid {
                                    warn!("rejected client with uid {}", cred.uid());
                                    continue;
                                }
                            }
                            Err(_) => continue,
                        }
                    }

                    let updates = frames.subscribe();
                    let latest = latest_history.read().clone();
                    tokio::spawn(handle_client(stream, inbound.clone(), updates, latest));
                }
            }
        }

        Ok(())
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

enum Frame {
    Line,
    TooLong,
    Closed,
}

/// Read up to the next newline into `buf`, never holding more than
/// `MAX_FRAME_LEN + 1` bytes. Partial reads stay in `buf` if cancelled.
async fn read_frame<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> std::io::Result<Frame> {
    let budget = (MAX_FRAME_LEN + 1).saturating_sub(buf.len()) as u64;
    let n = (&mut *reader).take(budget).read_until(b'\n', buf).await?;
    if buf.last() == Some(&b'\n') {
        Ok(Frame::Line)
    } else if buf.len() > MAX_FRAME_LEN {
        Ok(Frame::TooLong)
    } else if n == 0 && buf.is_empty() {
        Ok(Frame::Closed)
    } else {
        // final line without a newline before EOF
        Ok(Frame::Line)
    }
}

async fn handle_client(
    stream: UnixStream,
    inbound: mpsc::Sender<InboundMessage>,
    mut updates: broadcast::Receiver<Arc<str>>,
    latest: Option<Arc<str>>,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut buf = Vec::new();

    if let Some(frame) = latest {
        if write_frame(&mut write_half, &frame).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            frame = read_frame(&mut reader, &mut buf) => match frame {
                Ok(Frame::Line) => {
                    let parsed = std::str::from_utf8(&buf)
                        .ok()
                        .map(str::trim)
                        .filter(|line| !line.is_empty())
                        .map(serde_json::from_str::<InboundMessage>);
                    buf.clear();
                    match parsed {
                        Some(Ok(msg)) => {
                            if inbound.send(msg).await.is_err() {
                                return;
                            }
                        }
                        Some(Err(e)) => debug!("ignoring malformed message: {}", e),
                        None => {}
                    }
                }
                Ok(Frame::TooLong) => {
                    warn!("dropping client: frame over {} bytes", MAX_FRAME_LEN);
                    return;
                }
                Ok(Frame::Closed) | Err(_) => return,
            },

            update = updates.recv() => match update {
                Ok(frame) => {
                    if write_frame(&mut write_half, &frame).await.is_err() {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("client lagging, skipped {} messages", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return,
            },
        }
    }
}

async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, frame: &str) -> std::io::Result<()> {
    writer.write_all(frame.as_bytes()).await?;
    writer.write_all(b"\n").await
}

async fn connect(path: &Path) -> Result<UnixStream> {
    timeout(CLIENT_TIMEOUT, UnixStream::connect(path))
        .await
        .context("Connection timeout")?
        .context("Failed to connect to daemon")
}

pub async fn send_message(path: &Path, msg: &InboundMessage) -> Result<()> {
    let mut stream = connect(path).await?;
    let json = serde_json::to_string(msg)?;
    write_frame(&mut stream, &json).await?;
    stream.shutdown().await?;
    Ok(())
}

pub async fn fetch_history(path: &Path) -> Result<Vec<HistoryEntry>> {
    let stream = connect(path).await?;
    timeout(CLIENT_TIMEOUT, read_history(stream))
        .await
        .context("Timed out waiting for history")?
}

async fn read_history(stream: UnixStream) -> Result<Vec<HistoryEntry>> {
    let mut lines = BufReader::new(stream).lines();
    while let Some(line) = lines.next_line().await? {
        if let Ok(OutboundMessage::RefreshHistory(entries)) =
            serde_json::from_str::<OutboundMessage>(&line)
        {
            return Ok(entries);
        }
    }
    bail!("daemon closed the connection")
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Running {
        _dir: tempfile::TempDir,
        path: PathBuf,
        inbound: mpsc::Receiver<InboundMessage>,
        outbound: mpsc::UnboundedSender<OutboundMessage>,
    }

    fn start() -> Running {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.sock");
        let server = IpcServer::bind(&path).unwrap();
        let (in_tx, inbound) = mpsc::channel(8);
        let (outbound, out_rx) = mpsc::unbounded_channel();
        tokio::spawn(server.serve(in_tx, out_rx));
        Running {
            _dir: dir,
            path,
            inbound,
            outbound,
        }
    }

    #[tokio::test]
    async fn socket_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let running = start();
        let mode = std::fs::metadata(&running.path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[tokio::test]
    async fn client_messages_reach_the_controller() {
        let mut running = start();
        send_message(&running.path, &InboundMessage::PinEntry(2))
            .await
            .unwrap();
        send_message(&running.path, &InboundMessage::ClearHistory)
            .await
            .unwrap();

        let first = timeout(CLIENT_TIMEOUT, running.inbound.recv()).await.unwrap();
        let second = timeout(CLIENT_TIMEOUT, running.inbound.recv()).await.unwrap();
        let mut got = vec![first.unwrap(), second.unwrap()];
        got.sort_by_key(|m| matches!(m, InboundMessage::ClearHistory));
        assert_eq!(
            got,
            vec![InboundMessage::PinEntry(2), InboundMessage::ClearHistory]
        );
    }

    #[tokio::test]
    async fn new_clients_get_the_latest_history() {
        let running = start();
        running
            .outbound
            .send(OutboundMessage::RefreshHistory(vec![HistoryEntry::text("old")]))
            .unwrap();
        running
            .outbound
            .send(OutboundMessage::UpdateActiveContent(0))
            .unwrap();
        running
            .outbound
            .send(OutboundMessage::RefreshHistory(vec![
                HistoryEntry::text("new"),
                HistoryEntry::text("old"),
            ]))
            .unwrap();
        // let the server drain the queue
        tokio::time::sleep(Duration::from_millis(50)).await;

        let entries = fetch_history(&running.path).await.unwrap();
        let texts: Vec<_> = entries.iter().filter_map(|e| e.text.clone()).collect();
        assert_eq!(texts, vec!["new", "old"]);
    }

    #[tokio::test]
    async fn malformed_lines_are_ignored() {
        let mut running = start();
        let mut stream = UnixStream::connect(&running.path).await.unwrap();
        stream.write_all(b"not json\n").await.unwrap();
        stream
            .write_all(b"{\"channel\":\"window-move\"}\n")
            .await
            .unwrap();
        stream.shutdown().await.unwrap();

        let msg = timeout(CLIENT_TIMEOUT, running.inbound.recv()).await.unwrap();
        assert_eq!(msg, Some(InboundMessage::WindowMove));
    }

    #[tokio::test]
    async fn oversized_frame_drops_the_client() {
        let running = start();
        let stream = UnixStream::connect(&running.path).await.unwrap();
        let (mut read_half, mut write_half) = stream.into_split();

        tokio::spawn(async move {
            let chunk = vec![b'a'; 64 * 1024];
            for _ in 0..128 {
                if write_half.write_all(&chunk).await.is_err() {
                    break;
                }
            }
        });

        let mut byte = [0u8; 1];
        let read = timeout(CLIENT_TIMEOUT, read_half.read(&mut byte))
            .await
            .expect("server kept the connection open");
        assert!(matches!(read, Ok(0) | Err(_)));
    }

    #[tokio::test]
    async fn frame_split_across_writes_is_reassembled() {
        let mut running = start();
        let mut stream = UnixStream::connect(&running.path).await.unwrap();
        stream.write_all(b"{\"channel\":\"pin-").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        stream
            .write_all(b"entry\",\"payload\":4}\n")
            .await
            .unwrap();

        let msg = timeout(CLIENT_TIMEOUT, running.inbound.recv()).await.unwrap();
        assert_eq!(msg, Some(InboundMessage::PinEntry(4)));
    }

    #[tokio::test]
    async fn no_daemon_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.sock");
        assert!(send_message(&missing, &InboundMessage::WindowMoved).await.is_err());
    }
}
