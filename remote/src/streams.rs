use futures::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tracing::instrument;

/// Largest frame either side accepts, bounds the segment size a client can ask for.
pub const MAX_FRAME_LENGTH: usize = 256 * 1024 * 1024;

/// Fails when `size` bytes do not fit in a single data frame.
pub fn check_read_size(size: u64) -> Result<(), crate::protocol::RemoteError> {
    let limit = MAX_FRAME_LENGTH as u64;
    if size > limit {
        return Err(crate::protocol::RemoteError::TooLarge { size, limit });
    }
    Ok(())
}

fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

/// Framed send stream for length-delimited messages.
///
/// Generic over the underlying writer type - works with TCP or any AsyncWrite.
#[derive(Debug)]
pub struct SendStream<W = OwnedWriteHalf> {
    framed: FramedWrite<W, LengthDelimitedCodec>,
}

impl<W: AsyncWrite + Unpin> SendStream<W> {
    pub fn new(stream: W) -> Self {
        Self {
            framed: FramedWrite::new(stream, codec()),
        }
    }

    /// Queues a message without flushing, use when more frames follow.
    pub async fn send_batch_message<T: serde::Serialize>(&mut self, obj: &T) -> anyhow::Result<()> {
        let bytes = bincode::serialize(obj)?;
        self.framed.send(bytes::Bytes::from(bytes)).await?;
        Ok(())
    }

    pub async fn send_control_message<T: serde::Serialize>(
        &mut self,
        obj: &T,
    ) -> anyhow::Result<()> {
        self.send_batch_message(obj).await?;
        SinkExt::<bytes::Bytes>::flush(&mut self.framed).await?;
        Ok(())
    }

    /// Sends a message followed by a raw data frame.
    #[instrument(level = "trace", skip(self, obj, data), fields(len = data.len()))]
    pub async fn send_message_with_data<T: serde::Serialize>(
        &mut self,
        obj: &T,
        data: bytes::Bytes,
    ) -> anyhow::Result<()> {
        self.send_batch_message(obj).await?;
        self.framed.send(data).await?;
        SinkExt::<bytes::Bytes>::flush(&mut self.framed).await?;
        Ok(())
    }

    pub async fn close(&mut self) -> anyhow::Result<()> {
        SinkExt::<bytes::Bytes>::close(&mut self.framed).await?;
        Ok(())
    }
}

/// Framed receive stream for length-delimited messages.
///
/// Generic over the underlying reader type - works with TCP or any AsyncRead.
#[derive(Debug)]
pub struct RecvStream<R = OwnedReadHalf> {
    framed: FramedRead<R, LengthDelimitedCodec>,
}

impl<R: AsyncRead + Unpin> RecvStream<R> {
    pub fn new(stream: R) -> Self {
        Self {
            framed: FramedRead::new(stream, codec()),
        }
    }

    /// Next message, `None` once the peer closed the stream.
    pub async fn recv_object<T: serde::de::DeserializeOwned>(
        &mut self,
    ) -> anyhow::Result<Option<T>> {
        match self.recv_frame().await? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Raw data frame sent with [`SendStream::send_message_with_data`]. Unlike a message, the end
    /// of the stream here is an error.
    #[instrument(level = "trace", skip(self))]
    pub async fn recv_data(&mut self, size: u64) -> anyhow::Result<bytes::Bytes> {
        let Some(data) = self.recv_frame().await? else {
            anyhow::bail!("unexpected EOF: expected {size} bytes of data");
        };
        if data.len() as u64 != size {
            anyhow::bail!(
                "data frame has {} bytes, header announced {}",
                data.len(),
                size
            );
        }
        Ok(data)
    }

    async fn recv_frame(&mut self) -> anyhow::Result<Option<bytes::Bytes>> {
        match futures::StreamExt::next(&mut self.framed).await {
            Some(frame) => Ok(Some(frame?.freeze())),
            None => Ok(None),
        }
    }
}

/// Bidirectional framed TCP connection.
#[derive(Debug)]
pub struct Connection {
    send: SendStream,
    recv: RecvStream,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            send: SendStream::new(write_half),
            recv: RecvStream::new(read_half),
        }
    }

    pub fn send_mut(&mut self) -> &mut SendStream {
        &mut self.send
    }

    pub fn recv_mut(&mut self) -> &mut RecvStream {
        &mut self.recv
    }
}
