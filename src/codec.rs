//! Chunk encoding: raw bytes or an RFC 1950 zlib stream.

use crate::package::Encoding;
use crate::Result;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Compress a chunk for storage, keeping the compressed form only when
/// it is strictly smaller than the input.
pub fn compress(data: &[u8]) -> Result<(Vec<u8>, Encoding)> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len()), Compression::default());
    encoder.write_all(data)?;
    let compressed = encoder.finish()?;
    if compressed.len() < data.len() {
        Ok((compressed, Encoding::Zlib))
    } else {
        Ok((data.to_vec(), Encoding::Raw))
    }
}

/// Decode stored chunk bytes back to their original form.
pub fn decompress(data: &[u8], encoding: Encoding) -> Result<Vec<u8>> {
    match encoding {
        Encoding::Raw => Ok(data.to_vec()),
        Encoding::Zlib => {
            let mut decoder = ZlibDecoder::new(data);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out)?;
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compressible_data_round_trips_as_zlib() {
        let data = vec![b'a'; 1000];
        let (stored, encoding) = compress(&data).unwrap();
        assert_eq!(encoding, Encoding::Zlib);
        assert!(stored.len() < data.len());
        assert_eq!(decompress(&stored, encoding).unwrap(), data);
    }

    #[test]
    fn incompressible_data_stays_raw() {
        // Too short for the zlib header overhead to pay off
        let data = b"xz";
        let (stored, encoding) = compress(data).unwrap();
        assert_eq!(encoding, Encoding::Raw);
        assert_eq!(stored, data);
    }

    #[test]
    fn raw_decompress_is_identity() {
        assert_eq!(decompress(b"abc", Encoding::Raw).unwrap(), b"abc");
    }
}
