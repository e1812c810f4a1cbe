//! Line-framed client connections.

use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// A client connection with buffered, newline-delimited reads and writes.
///
/// The partial-line accumulator lives in the struct rather than in the read
/// future, so a `read_line` future dropped by `select!` leaves any bytes
/// already received in place for the next call.
#[derive(Debug)]
pub struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    peer: SocketAddr,
    pending: String,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Connection {
        let (read_half, write_half) = stream.into_split();
        Connection {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
            peer,
            pending: String::new(),
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Reads the next line, stripped of its terminator. `None` on EOF.
    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        let n = self.reader.read_line(&mut self.pending).await?;
        if n == 0 && self.pending.is_empty() {
            return Ok(None);
        }
        let raw = std::mem::take(&mut self.pending);
        Ok(Some(
            raw.trim_end_matches(|c| c == '\r' || c == '\n').to_string(),
        ))
    }

    /// Writes one newline-terminated line and flushes it.
    pub async fn send_line(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await
    }

    /// Writes a `21x` block: the opener, the rows verbatim, and the
    /// closing `.`, flushed once at the end.
    pub async fn send_block(&mut self, opener: &str, rows: &[String]) -> io::Result<()> {
        self.writer.write_all(opener.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        for row in rows {
            self.writer.write_all(row.as_bytes()).await?;
            self.writer.write_all(b"\n").await?;
        }
        self.writer.write_all(b".\n").await?;
        self.writer.flush().await
    }
}
