//! TCP server answering [`Request`]s from a [`DirSource`].

use anyhow::Context;
use tokio::net::{TcpListener, TcpStream};
use tracing::instrument;

use crate::protocol::{Request, Response};
use crate::source::DirSource;
use crate::streams::{Connection, check_read_size};

/// Accepts connections forever, serving each one from its own task.
pub async fn serve(listener: TcpListener, source: DirSource) -> anyhow::Result<()> {
    tracing::info!(
        "serving {:?} on {}",
        source.root(),
        listener.local_addr().context("failed reading listener address")?
    );
    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .context("failed accepting connection")?;
        let source = source.clone();
        tokio::spawn(async move {
            if let Err(error) = handle_connection(stream, peer, source).await {
                tracing::warn!("connection from {peer} failed: {error:#}");
            }
        });
    }
}

#[instrument(skip(stream, source))]
async fn handle_connection(
    stream: TcpStream,
    peer: std::net::SocketAddr,
    source: DirSource,
) -> anyhow::Result<()> {
    stream.set_nodelay(true)?;
    tracing::debug!("accepted connection");
    let mut connection = Connection::new(stream);
    while let Some(request) = connection.recv_mut().recv_object::<Request>().await? {
        match request {
            Request::ListFiles { dir, files } => {
                let response = match source.list_files(&dir, &files).await {
                    Ok(entries) => {
                        tracing::debug!("listed {} files in {:?}", entries.len(), &dir);
                        Response::Files(entries)
                    }
                    Err(error) => {
                        tracing::warn!("listing {:?} failed: {error}", &dir);
                        Response::Error(error)
                    }
                };
                connection.send_mut().send_control_message(&response).await?;
            }
            Request::Read {
                dir,
                file,
                offset,
                size,
                is_last,
            } => {
                let read = match check_read_size(size) {
                    Ok(()) => source.read_range(&dir, &file, offset, size).await,
                    Err(error) => Err(error),
                };
                match read {
                    Ok(data) => {
                        tracing::trace!("sending {:?} [{offset}, +{size}) last: {is_last}", &file);
                        connection
                            .send_mut()
                            .send_message_with_data(&Response::Data { size }, data)
                            .await?;
                    }
                    Err(error) => {
                        tracing::warn!("read of {:?} failed: {error}", &file);
                        connection
                            .send_mut()
                            .send_control_message(&Response::Error(error))
                            .await?;
                    }
                }
            }
        }
    }
    tracing::debug!("peer closed connection");
    Ok(())
}
