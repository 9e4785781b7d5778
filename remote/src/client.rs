use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use futures::future::BoxFuture;
use tokio::net::TcpStream;
use tracing::instrument;

use crate::protocol::{FileEntry, Request, Response};
use crate::streams::{Connection, check_read_size};

#[derive(Debug)]
struct Inner {
    // idle connections per node address
    idle: tokio::sync::Mutex<HashMap<String, Vec<Connection>>>,
    connect_timeout: Duration,
}

/// Talks to `rpulld` servers over TCP. Nodes are `host:port` addresses.
///
/// Connections are opened on demand and returned to a per-node pool after each request, so
/// concurrent reads of one node use as many connections as there are reads in flight. A
/// connection that saw an I/O error is dropped instead of being reused.
#[derive(Debug, Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Default for Client {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl Client {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                idle: tokio::sync::Mutex::new(HashMap::new()),
                connect_timeout,
            }),
        }
    }

    async fn checkout(&self, node: &str) -> anyhow::Result<Connection> {
        if let Some(connection) = self
            .inner
            .idle
            .lock()
            .await
            .get_mut(node)
            .and_then(Vec::pop)
        {
            return Ok(connection);
        }
        tracing::debug!("connecting to {node}");
        let stream = tokio::time::timeout(self.inner.connect_timeout, TcpStream::connect(node))
            .await
            .map_err(|_| anyhow!("timed out connecting to {node}"))?
            .with_context(|| format!("failed connecting to {node}"))?;
        stream.set_nodelay(true)?;
        Ok(Connection::new(stream))
    }

    async fn checkin(&self, node: &str, connection: Connection) {
        self.inner
            .idle
            .lock()
            .await
            .entry(node.to_string())
            .or_default()
            .push(connection);
    }

    async fn round_trip(
        &self,
        node: &str,
        request: &Request,
    ) -> anyhow::Result<(Response, Option<bytes::Bytes>)> {
        let mut connection = self.checkout(node).await?;
        connection
            .send_mut()
            .send_control_message(request)
            .await
            .with_context(|| format!("failed sending request to {node}"))?;
        let response = connection
            .recv_mut()
            .recv_object::<Response>()
            .await
            .with_context(|| format!("failed receiving response from {node}"))?
            .ok_or_else(|| anyhow!("{node} closed the connection"))?;
        let data = match &response {
            Response::Data { size } => {
                Some(connection.recv_mut().recv_data(*size).await?)
            }
            _ => None,
        };
        self.checkin(node, connection).await;
        Ok((response, data))
    }

    /// Sizes of `files` in `dir` on `node`, or of every file below `dir` when `files` is empty.
    #[instrument(skip(self, files), fields(files = files.len()))]
    pub async fn list_files(
        &self,
        node: &str,
        dir: &Path,
        files: &[PathBuf],
    ) -> anyhow::Result<Vec<FileEntry>> {
        let request = Request::ListFiles {
            dir: dir.to_path_buf(),
            files: files.to_vec(),
        };
        match self.round_trip(node, &request).await? {
            (Response::Files(entries), _) => Ok(entries),
            (Response::Error(error), _) => {
                Err(error).with_context(|| format!("failed listing {dir:?} on {node}"))
            }
            (other, _) => Err(anyhow!("unexpected response to listing: {other:?}")),
        }
    }

    pub async fn read(&self, request: fetch::ReadRequest) -> anyhow::Result<bytes::Bytes> {
        check_read_size(request.size)
            .with_context(|| format!("cannot read {:?} from {}", request.file, &request.node))?;
        let wire = Request::Read {
            dir: request.source_dir,
            file: request.file,
            offset: request.offset,
            size: request.size,
            is_last: request.is_last,
        };
        match self.round_trip(&request.node, &wire).await? {
            (Response::Data { .. }, Some(data)) => Ok(data),
            (Response::Error(error), _) => Err(error).with_context(|| {
                format!(
                    "failed reading [{}, +{}) from {}",
                    request.offset, request.size, &request.node
                )
            }),
            (other, _) => Err(anyhow!("unexpected response to read: {other:?}")),
        }
    }
}

impl fetch::Transport for Client {
    fn read(
        &self,
        request: fetch::ReadRequest,
    ) -> BoxFuture<'static, anyhow::Result<bytes::Bytes>> {
        let client = self.clone();
        Box::pin(async move { client.read(request).await })
    }
}
