//! Gzip and deflate response compression for HTTP handlers.
//!
//! Two surfaces share the same negotiation and header rules:
//!
//! - [`CompressHandler`] wraps a synchronous [`Handler`] that writes its
//!   response through a [`ResponseWriter`]. The decision to compress is made
//!   lazily, at the first write, flush or explicit head.
//! - [`CompressionLayer`] wraps a Tower service and decides when the inner
//!   service's response head is ready.
//!
//! # Example
//!
//! ```
//! use http_compress_handler::{
//!     Handler, ResponseRecorder, ResponseWriter, compress_handler, handler_fn,
//! };
//! use std::io::Write;
//!
//! let handler = compress_handler(handler_fn(
//!     |_req: &http::Request<()>, w: &mut dyn ResponseWriter| w.write_all(b"hello"),
//! ));
//!
//! let req = http::Request::builder()
//!     .header("accept-encoding", "gzip")
//!     .body(())
//!     .unwrap();
//! let mut recorder = ResponseRecorder::new();
//! handler.serve(&req, &mut recorder).unwrap();
//!
//! let response = recorder.into_response();
//! assert_eq!(response.headers()["content-encoding"], "gzip");
//! ```
//!
//! # Negotiation
//!
//! Only the literal `gzip` and `deflate` tokens of `Accept-Encoding` count
//! (`x-gzip` is an alias of `gzip`). When both are acceptable gzip wins.
//! A token with `q=0` is refused.
//!
//! # Compression Rules
//!
//! A response is passed through unchanged when:
//! - No supported `Accept-Encoding` is present in the request
//! - `Content-Encoding` header is already set
//! - `Content-Range` header is present (range responses)
//! - `Content-Type` is excluded by the configured [`ContentTypePolicy`]
//! - `Content-Length` is below the minimum size threshold (default: 0)
//! - The status never carries a body (`1xx`, `204`, `304`)
//!
//! # Response Modifications
//!
//! When compression is applied:
//! - `Content-Encoding` header is set to the encoding used
//! - `Content-Length` header is removed (compressed size is unknown)
//! - `Accept-Ranges` header is removed
//! - `Vary` header includes `Accept-Encoding`

#![deny(missing_docs)]

mod body;
mod codec;
mod config;
mod future;
mod handler;
mod layer;
mod negotiate;
mod policy;
mod recorder;
mod service;
mod writer;

pub use body::CompressionBody;
pub use codec::{CompressionLevel, Encoding};
pub use config::CompressionConfig;
pub use future::ResponseFuture;
pub use handler::{CompressHandler, Handler, HandlerFn, compress_handler, handler_fn};
pub use layer::CompressionLayer;
pub use negotiate::{choose_encoding, from_headers};
pub use policy::ContentTypePolicy;
pub use recorder::ResponseRecorder;
pub use service::CompressionService;
pub use writer::{CompressWriter, ResponseWriter};
