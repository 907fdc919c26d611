mod compressed;
mod document;

pub use compressed::{compress, decompress, CodecError, CompressedGraph};
pub use document::{LinkDoc, NodeDoc, NodeLinkDocument};

use chronomesh_base::Result;

/// Parses the canonical node-link JSON text into a [`NodeLinkDocument`].
pub fn decode_document(bytes: &[u8]) -> Result<NodeLinkDocument> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Serialises a [`NodeLinkDocument`] to canonical node-link JSON text.
pub fn encode_document(doc: &NodeLinkDocument) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(doc)?)
}

/// Parses compressed archive JSON text into a [`CompressedGraph`].
pub fn decode_compressed(bytes: &[u8]) -> Result<CompressedGraph> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Serialises a [`CompressedGraph`] to archive JSON text.
pub fn encode_compressed(graph: &CompressedGraph) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(graph)?)
}
