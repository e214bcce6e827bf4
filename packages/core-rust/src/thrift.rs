//! Request/response types for the RPC (Thrift-style) protocol.
//!
//! Arguments and results stay as encoded bytes: decoding them into typed
//! structs is the job of generated bindings, not of the server core.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::message::Message;
use crate::metadata::Metadata;

/// A single RPC call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThriftRequest {
    /// RPC method name, used for routing.
    pub method: String,
    /// Sequence id assigned by the client.
    pub seq_id: i32,
    /// Request context (client id, trace headers, ...).
    pub metadata: Metadata,
    /// Encoded argument struct.
    pub args: Bytes,
}

impl ThriftRequest {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            seq_id: 0,
            metadata: Metadata::new(),
            args: Bytes::new(),
        }
    }

    #[must_use]
    pub fn with_seq_id(mut self, seq_id: i32) -> Self {
        self.seq_id = seq_id;
        self
    }

    #[must_use]
    pub fn with_args(mut self, args: impl Into<Bytes>) -> Self {
        self.args = args.into();
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.append(name, value);
        self
    }
}

impl Message for ThriftRequest {
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

/// Outcome of an RPC call as written back to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThriftReply {
    /// Encoded result struct.
    Success(Bytes),
    /// Protocol-level application exception.
    Exception(ApplicationException),
}

/// Reply to a single RPC call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThriftResponse {
    pub metadata: Metadata,
    pub reply: ThriftReply,
}

impl ThriftResponse {
    pub fn success(result: impl Into<Bytes>) -> Self {
        Self {
            metadata: Metadata::new(),
            reply: ThriftReply::Success(result.into()),
        }
    }

    #[must_use]
    pub fn exception(exception: ApplicationException) -> Self {
        Self {
            metadata: Metadata::new(),
            reply: ThriftReply::Exception(exception),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.reply, ThriftReply::Success(_))
    }

    /// Returns the exception, if this reply carries one.
    #[must_use]
    pub fn as_exception(&self) -> Option<&ApplicationException> {
        match &self.reply {
            ThriftReply::Exception(exception) => Some(exception),
            ThriftReply::Success(_) => None,
        }
    }
}

impl Message for ThriftResponse {
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

// ---------------------------------------------------------------------------
// ApplicationException
// ---------------------------------------------------------------------------

/// Standard Thrift `TApplicationException` types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApplicationExceptionKind {
    Unknown,
    UnknownMethod,
    InvalidMessageType,
    WrongMethodName,
    BadSequenceId,
    MissingResult,
    InternalError,
    ProtocolError,
    InvalidTransform,
    InvalidProtocol,
    UnsupportedClientType,
}

impl ApplicationExceptionKind {
    /// Wire code as defined by the Thrift protocol.
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::Unknown => 0,
            Self::UnknownMethod => 1,
            Self::InvalidMessageType => 2,
            Self::WrongMethodName => 3,
            Self::BadSequenceId => 4,
            Self::MissingResult => 5,
            Self::InternalError => 6,
            Self::ProtocolError => 7,
            Self::InvalidTransform => 8,
            Self::InvalidProtocol => 9,
            Self::UnsupportedClientType => 10,
        }
    }

    /// Decodes a wire code; unknown codes map to `Unknown`.
    #[must_use]
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::UnknownMethod,
            2 => Self::InvalidMessageType,
            3 => Self::WrongMethodName,
            4 => Self::BadSequenceId,
            5 => Self::MissingResult,
            6 => Self::InternalError,
            7 => Self::ProtocolError,
            8 => Self::InvalidTransform,
            9 => Self::InvalidProtocol,
            10 => Self::UnsupportedClientType,
            _ => Self::Unknown,
        }
    }
}

/// Exception returned in place of a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationException {
    pub kind: ApplicationExceptionKind,
    pub message: String,
}

impl ApplicationException {
    pub fn new(kind: ApplicationExceptionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ApplicationException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({}): {}", self.kind, self.kind.code(), self.message)
    }
}
