//! Network side of rpull
//!
//! Provides the serving end (`rpulld`) and the client transport used by the fetch engine.
//!
//! # Components
//!
//! - [`protocol`] - request/response messages, encoded with bincode
//! - [`streams`] - length-delimited framing over TCP (messages and raw data frames)
//! - [`DirSource`] - byte ranges and file listings below a root directory
//! - [`server::serve`] - accept loop answering requests from a [`DirSource`]
//! - [`Client`] - pooled TCP client, implements [`fetch::Transport`]
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> anyhow::Result<()> {
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
//! let addr = listener.local_addr()?.to_string();
//! tokio::spawn(remote::server::serve(listener, remote::DirSource::new("/srv/data")));
//!
//! let client = remote::Client::default();
//! let files = client.list_files(&addr, "models".as_ref(), &[]).await?;
//! println!("{} files available", files.len());
//! # Ok(())
//! # }
//! ```

mod client;
pub mod protocol;
pub mod server;
mod source;
pub mod streams;

pub use client::Client;
pub use source::DirSource;
