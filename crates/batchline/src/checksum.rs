//! Quick content fingerprints for session file records.

use std::fs::File;
use std::io::Read;
use std::path::Path;

/// How much of the file feeds the fingerprint. Enough to catch swapped or
/// re-encoded inputs without paying full-file IO on large media.
const SAMPLE_BYTES: usize = 64 * 1024;

/// Hashes the first 64 KiB of the file with BLAKE3 and returns the hex
/// digest. Returns `None` when the file cannot be read; records keep a
/// NULL checksum in that case rather than failing session creation.
pub fn quick_checksum(path: &Path) -> Option<String> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            log::debug!("Skipping checksum for {}: {}", path.display(), e);
            return None;
        }
    };

    let mut buf = vec![0u8; SAMPLE_BYTES];
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) => {
                log::debug!("Skipping checksum for {}: {}", path.display(), e);
                return None;
            }
        }
    }

    Some(blake3::hash(&buf[..filled]).to_hex().to_string())
}
