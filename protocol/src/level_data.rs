//! World snapshot framing.
//!
//! The block array is prefixed with its big-endian length, gzipped, and sent
//! as a series of fixed-size chunks, each carrying the running percentage of
//! the stream delivered so far.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use crate::error::ProtocolError;
use crate::packet::Packet;

/// Payload bytes per level data chunk.
pub const CHUNK_SIZE: usize = 1024;

/// Gzips the length-prefixed block array.
pub fn compress(blocks: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(blocks.len() / 8), Compression::default());
    encoder.write_all(&(blocks.len() as u32).to_be_bytes())?;
    encoder.write_all(blocks)?;
    Ok(encoder.finish()?)
}

/// Reverses [`compress`], validating the length prefix.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut decoder = GzDecoder::new(data);
    let mut raw = Vec::new();
    decoder.read_to_end(&mut raw)?;
    if raw.len() < 4 {
        return Err(ProtocolError::InvalidValue("level data missing length".into()));
    }
    let declared = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
    let blocks = raw.split_off(4);
    if blocks.len() != declared {
        return Err(ProtocolError::InvalidValue(format!(
            "level data declares {} blocks, contains {}",
            declared,
            blocks.len()
        )));
    }
    Ok(blocks)
}

/// Splits a compressed stream into level data chunk packets.
pub fn chunk_packets(compressed: &[u8]) -> Vec<Packet> {
    let total = compressed.len().max(1);
    let mut sent = 0;
    compressed
        .chunks(CHUNK_SIZE)
        .map(|chunk| {
            sent += chunk.len();
            Packet::LevelDataChunk {
                data: chunk.to_vec(),
                percent: (sent * 100 / total) as u8,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compress_roundtrip() {
        let blocks: Vec<u8> = (0..4096u32).map(|i| (i % 50) as u8).collect();
        let compressed = compress(&blocks).unwrap();
        assert_eq!(decompress(&compressed).unwrap(), blocks);
    }

    #[test]
    fn test_length_prefix_is_big_endian() {
        let compressed = compress(&[1, 2, 3]).unwrap();
        let mut raw = Vec::new();
        GzDecoder::new(&compressed[..]).read_to_end(&mut raw).unwrap();
        assert_eq!(&raw[..4], &[0, 0, 0, 3]);
    }

    #[test]
    fn test_chunk_percentages_reach_100() {
        let data = vec![7u8; CHUNK_SIZE * 2 + 10];
        let packets = chunk_packets(&data);
        assert_eq!(packets.len(), 3);

        let percents: Vec<u8> = packets
            .iter()
            .map(|p| match p {
                Packet::LevelDataChunk { percent, .. } => *percent,
                _ => panic!("unexpected packet"),
            })
            .collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*percents.last().unwrap(), 100);
    }

    #[test]
    fn test_decompress_rejects_garbage() {
        assert!(decompress(&[1, 2, 3, 4]).is_err());
    }
}
