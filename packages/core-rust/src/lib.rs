//! Trellis core: the protocol-neutral data model shared by the server crate.
//!
//! - [`metadata`]: ordered, multi-valued request/response metadata bag
//! - [`failure`]: failure kinds and the [`Failure`] value carried on the error path
//! - [`http`] / [`thrift`]: request and response types for the two wire protocols

pub mod failure;
pub mod http;
pub mod message;
pub mod metadata;
pub mod thrift;

pub use failure::{AppKind, Failure, FailureKind};
pub use crate::http::{HttpRequest, HttpResponse};
pub use message::Message;
pub use metadata::Metadata;
pub use thrift::{
    ApplicationException, ApplicationExceptionKind, ThriftReply, ThriftRequest, ThriftResponse,
};
