use crate::record::LogEntry;
use crate::{Error, Result};
use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Encodes records as gzip-compressed newline-delimited JSON.
pub fn encode(entries: &[LogEntry]) -> Result<Bytes> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    for entry in entries {
        serde_json::to_writer(&mut encoder, entry)?;
        encoder.write_all(b"\n")?;
    }
    Ok(Bytes::from(encoder.finish()?))
}

/// Decompresses a batch back into its newline-delimited JSON text.
pub fn decompress(data: &[u8]) -> Result<String> {
    let mut text = String::new();
    GzDecoder::new(data).read_to_string(&mut text)?;
    Ok(text)
}

pub fn decode(data: &[u8]) -> Result<Vec<LogEntry>> {
    decompress(data)?
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let value = serde_json::from_str(line)?;
            LogEntry::from_value(value)
                .map_err(|e| Error::Output(format!("invalid record in batch: {}", e)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_batch_is_gzip_ndjson() {
        let entries = vec![
            LogEntry::from_value(json!({"id": 1})).unwrap(),
            LogEntry::from_value(json!({"id": 2, "msg": "line\nbreak"})).unwrap(),
        ];
        let data = encode(&entries).unwrap();
        assert_eq!(&data[..2], &[0x1f, 0x8b]);

        let text = decompress(&data).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert_eq!(decode(&data).unwrap(), entries);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(decode(b"not gzip").is_err());
    }
}
