/*!
 * Content checksums for scanned files
 */

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Hex-encoded SHA-256 digest of a file's contents
///
/// Fails with `InvalidInput` if the path is not a regular file.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    if !path.is_file() {
        let msg = format!("{} is not a file; cannot compute checksum", path.display());
        warn!("{}", msg);
        return Err(io::Error::new(io::ErrorKind::InvalidInput, msg));
    }

    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buffer = [0; 64 * 1024];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    let digest = format!("{:x}", hasher.finalize());
    debug!(path = %path.display(), checksum = %digest, "computed checksum");
    Ok(digest)
}
