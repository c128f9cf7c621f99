use crate::error::{Error, Result};
use crate::ClientId;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::{debug, info};

async fn connect(addr: impl ToSocketAddrs, timeout: Duration) -> Result<TcpStream> {
    tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| Error::Timeout)?
        .map_err(Error::from)
}

/// Errors raised by the peer closing its end map to `ConnectionClosed`
fn closed_or_io(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => Error::ConnectionClosed,
        _ => Error::Io(e),
    }
}

/// Read one line into `line`, which keeps partial input across cancelled reads.
/// The buffer is only cleared once a whole line has been taken out of it.
async fn read_line(reader: &mut BufReader<OwnedReadHalf>, line: &mut Vec<u8>) -> Result<String> {
    reader.read_until(b'\n', line).await.map_err(closed_or_io)?;
    if !line.ends_with(b"\n") {
        // EOF, possibly in the middle of a line
        line.clear();
        return Err(Error::ConnectionClosed);
    }
    let content = line.strip_suffix(b"\n").unwrap_or(&line[..]);
    let content = content.strip_suffix(b"\r").unwrap_or(content);
    let text = String::from_utf8_lossy(content).into_owned();
    line.clear();
    Ok(text)
}

/// A client that submits publications to the ingestion endpoint
pub struct Publisher {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    line: Vec<u8>,
    client_id: ClientId,
}

impl Publisher {
    /// Connect to a broker's ingestion endpoint
    pub async fn connect(addr: impl ToSocketAddrs, timeout: Duration) -> Result<Self> {
        let (reader, writer) = connect(addr, timeout).await?.into_split();
        let client_id = ClientId::new();
        debug!("Creating new publisher with client ID: {}", client_id.as_str());
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
            line: Vec::new(),
            client_id,
        })
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Send a raw request and wait for the acknowledgement.
    ///
    /// Line breaks inside the request are sent as spaces.
    pub async fn send_publication(&mut self, request: &str) -> Result<String> {
        let mut line = request.replace(['\r', '\n'], " ");
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await.map_err(closed_or_io)?;
        read_line(&mut self.reader, &mut self.line).await
    }

    /// Publish a payload to a topic
    pub async fn publish(&mut self, topic: &str, payload: &str) -> Result<String> {
        debug!("Publishing to topic {} ({} bytes)", topic, payload.len());
        self.send_publication(&format!("{} {}", topic, payload)).await
    }

    /// Publish with an explicit priority; only honored by brokers with priorities enabled
    pub async fn publish_with_priority(&mut self, topic: &str, priority: i32, payload: &str) -> Result<String> {
        self.send_publication(&format!("{} {} {}", topic, priority, payload))
            .await
    }
}

/// A client that receives frames from the publish endpoint
pub struct Subscriber {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    line: Vec<u8>,
    client_id: ClientId,
}

impl Subscriber {
    /// Connect to a broker's publish endpoint
    pub async fn connect(addr: impl ToSocketAddrs, timeout: Duration) -> Result<Self> {
        let (reader, writer) = connect(addr, timeout).await?.into_split();
        let client_id = ClientId::new();
        debug!("Creating new subscriber with client ID: {}", client_id.as_str());
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
            line: Vec::new(),
            client_id,
        })
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Receive frames starting with `prefix`; the empty prefix receives everything
    pub async fn subscribe(&mut self, prefix: &str) -> Result<()> {
        info!("Subscribing to prefix: {}", prefix);
        self.writer.write_all(format!("+{}\n", prefix).as_bytes()).await?;
        Ok(())
    }

    /// Stop receiving frames starting with `prefix`
    pub async fn unsubscribe(&mut self, prefix: &str) -> Result<()> {
        info!("Unsubscribing from prefix: {}", prefix);
        self.writer.write_all(format!("-{}\n", prefix).as_bytes()).await?;
        Ok(())
    }

    /// Receive a single frame
    pub async fn recv(&mut self) -> Result<String> {
        read_line(&mut self.reader, &mut self.line).await
    }

    /// Receive a frame with timeout. A frame cut off by the timeout is kept
    /// and completed by the next receive.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<String> {
        tokio::time::timeout(timeout, self.recv())
            .await
            .map_err(|_| Error::Timeout)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_frame_split_across_timeout_is_kept_whole() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"weath").await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
            stream.write_all(b"er 22C\r\nalerts storm\n").await.unwrap();
            stream
        });

        let mut subscriber = Subscriber::connect(addr, TIMEOUT).await.unwrap();
        assert!(matches!(
            subscriber.recv_timeout(Duration::from_millis(50)).await,
            Err(Error::Timeout)
        ));
        assert_eq!(subscriber.recv().await.unwrap(), "weather 22C");
        assert_eq!(subscriber.recv().await.unwrap(), "alerts storm");

        drop(server.await.unwrap());
        assert!(matches!(subscriber.recv().await, Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_unterminated_line_at_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = vec![0u8; 6];
            stream.read_exact(&mut request).await.unwrap();
            stream.write_all(b"O").await.unwrap();
            request
        });

        let mut publisher = Publisher::connect(addr, TIMEOUT).await.unwrap();
        assert!(matches!(
            publisher.publish("a", "b\nc").await,
            Err(Error::ConnectionClosed)
        ));
        assert_eq!(server.await.unwrap(), b"a b c\n".to_vec());
    }
}
