//! Test doubles: an in-memory stream that records writes, and a minimal LG
//! server that speaks the wire protocol over loopback TCP.

use crate::protocol::{Command, FrameHeader, HEADER_SIZE};
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

#[derive(Debug, Default)]
struct TranscriptInner {
    writes: Vec<Vec<u8>>,
    reads: usize,
    closed: bool,
}

/// Shared view of everything a [`MockStream`] observed.
#[derive(Debug, Clone, Default)]
pub struct Transcript(Arc<Mutex<TranscriptInner>>);

impl Transcript {
    /// Every write call, in order, with its exact buffer.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.0.lock().unwrap().writes.clone()
    }

    pub fn bytes_written(&self) -> usize {
        self.0.lock().unwrap().writes.iter().map(Vec::len).sum()
    }

    /// Number of read polls issued against the stream.
    pub fn reads(&self) -> usize {
        self.0.lock().unwrap().reads
    }

    pub fn closed(&self) -> bool {
        self.0.lock().unwrap().closed
    }
}

/// In-memory stream. Reads yield the configured ack byte once, then EOF.
pub struct MockStream {
    ack: Option<u8>,
    read_error: Option<io::ErrorKind>,
    /// Writes past this count fail with `BrokenPipe`.
    write_limit: Option<usize>,
    transcript: Transcript,
}

impl MockStream {
    pub fn new(ack: Option<u8>) -> (Self, Transcript) {
        let transcript = Transcript::default();
        let stream = Self {
            ack,
            read_error: None,
            write_limit: None,
            transcript: transcript.clone(),
        };
        (stream, transcript)
    }

    /// Fail the first read with `kind`.
    pub fn fail_reads(mut self, kind: io::ErrorKind) -> Self {
        self.read_error = Some(kind);
        self
    }

    /// Accept `limit` writes, then fail every later one.
    pub fn fail_writes_after(mut self, limit: usize) -> Self {
        self.write_limit = Some(limit);
        self
    }
}

impl AsyncRead for MockStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.transcript.0.lock().unwrap().reads += 1;
        if let Some(kind) = self.read_error.take() {
            return Poll::Ready(Err(kind.into()));
        }
        if let Some(byte) = self.ack.take() {
            buf.put_slice(&[byte]);
        }
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut inner = self.transcript.0.lock().unwrap();
        if self.write_limit == Some(inner.writes.len()) {
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        }
        inner.writes.push(buf.to_vec());
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.transcript.0.lock().unwrap().closed = true;
        Poll::Ready(Ok(()))
    }
}

/// One header received by [`MockLg`], tagged with its connection number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub conn: usize,
    pub header: FrameHeader,
    /// Payload bytes read after a DATA header.
    pub payload_len: usize,
}

/// Loopback LG server that reads streams, acks hangups and stops on shutdown.
pub struct MockLg {
    pub port: u16,
    received: Arc<Mutex<Vec<Received>>>,
    accept_loop: JoinHandle<()>,
}

impl MockLg {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let received = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&received);
        let accept_loop = tokio::spawn(async move {
            let (stop_tx, mut stop_rx) = tokio::sync::mpsc::channel::<()>(1);
            let mut conn = 0;
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { return };
                        let log = Arc::clone(&log);
                        let stop_tx = stop_tx.clone();
                        tokio::spawn(async move {
                            if serve(stream, conn, log).await {
                                let _ = stop_tx.send(()).await;
                            }
                        });
                        conn += 1;
                    }
                    _ = stop_rx.recv() => return,
                }
            }
        });

        Self {
            port,
            received,
            accept_loop,
        }
    }

    pub fn received(&self) -> Vec<Received> {
        self.received.lock().unwrap().clone()
    }

    /// Wait until a SHUTDOWN header has stopped the accept loop.
    pub async fn stopped(self) -> Vec<Received> {
        let Self {
            received,
            accept_loop,
            ..
        } = self;
        accept_loop.await.unwrap();
        let received = received.lock().unwrap().clone();
        received
    }
}

/// Serve one connection. Returns true if it carried a SHUTDOWN.
async fn serve(mut stream: TcpStream, conn: usize, log: Arc<Mutex<Vec<Received>>>) -> bool {
    let mut raw = [0u8; HEADER_SIZE];
    let mut payload = Vec::new();
    loop {
        if stream.read_exact(&mut raw).await.is_err() {
            return false;
        }
        let header = FrameHeader::decode(&raw).unwrap();

        let mut payload_len = 0;
        if header.command == Command::Data {
            payload.resize(header.length as usize, 0);
            stream.read_exact(&mut payload).await.unwrap();
            payload_len = payload.len();
        }

        log.lock().unwrap().push(Received {
            conn,
            header,
            payload_len,
        });

        match header.command {
            Command::Data => {}
            Command::Hangup => {
                let _ = stream.write_all(&[1]).await;
                return false;
            }
            Command::Shutdown => return true,
        }
    }
}

/// Accept one connection, read a single header, then hold the socket open
/// until `release` fires and drop it without answering.
pub async fn silent_lg() -> (u16, oneshot::Sender<()>, JoinHandle<FrameHeader>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (release, released) = oneshot::channel::<()>();

    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut raw = [0u8; HEADER_SIZE];
        stream.read_exact(&mut raw).await.unwrap();
        let _ = released.await;
        drop(stream);
        FrameHeader::decode(&raw).unwrap()
    });

    (port, release, handle)
}
