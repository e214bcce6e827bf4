use crate::metadata::Metadata;

/// Anything that carries a [`Metadata`] bag through a dispatch.
///
/// Implemented by every request and response type so that protocol-agnostic
/// filters (trace ids, header rewriting) can work on either protocol.
pub trait Message {
    fn metadata(&self) -> &Metadata;

    fn metadata_mut(&mut self) -> &mut Metadata;
}
