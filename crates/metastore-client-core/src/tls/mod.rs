//! TLS support for metastore connections.
//!
//! ```rust,ignore
//! use metastore_client_core::tls::TlsConnector;
//!
//! let connector = TlsConnector::new(&config.tls)?;
//! let tls_stream = connector.connect("metastore.example.com", tcp_stream).await?;
//! ```

pub mod client;

pub use client::TlsConnector;
