// File fingerprints used as the key for resumable upload state.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::str::FromStr;

use sha2::{Digest, Sha256};

use crate::error::{Result, UploadError};

/// Files below this size are hashed whole by the sampled strategy.
pub const SMALL_FILE_LIMIT: u64 = 0xF000;
/// Length of each of the three samples taken from larger files.
pub const SAMPLE_LEN: u64 = 0x5000;

const READ_BUF: usize = 64 * 1024;

/// How a file fingerprint is derived. A deployment should stick to one,
/// records written under the other strategy are never matched again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FingerprintStrategy {
    /// Head, one-third offset and tail samples.
    #[default]
    Sampled,
    /// Every byte of the file.
    Full,
}

impl FromStr for FingerprintStrategy {
    type Err = UploadError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sampled" => Ok(FingerprintStrategy::Sampled),
            "full" => Ok(FingerprintStrategy::Full),
            other => Err(UploadError::Config(format!(
                "unknown fingerprint strategy '{other}', expected 'sampled' or 'full'"
            ))),
        }
    }
}

/// Computes the hex-encoded fingerprint of the file at `path`.
pub fn fingerprint(path: &Path, strategy: FingerprintStrategy) -> Result<String> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();
    let mut hasher = Sha256::new();

    match strategy {
        FingerprintStrategy::Full => hash_stream(&mut file, &mut hasher)?,
        FingerprintStrategy::Sampled if size < SMALL_FILE_LIMIT => {
            hash_stream(&mut file, &mut hasher)?
        }
        FingerprintStrategy::Sampled => {
            for offset in [0, size / 3, size - SAMPLE_LEN] {
                file.seek(SeekFrom::Start(offset))?;
                let mut sample = vec![0u8; SAMPLE_LEN as usize];
                file.read_exact(&mut sample)?;
                hasher.update(&sample);
            }
        }
    }

    Ok(hex::encode(hasher.finalize()))
}

fn hash_stream(file: &mut File, hasher: &mut Sha256) -> Result<()> {
    let mut buf = vec![0u8; READ_BUF];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            return Ok(());
        }
        hasher.update(&buf[..n]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(data).unwrap();
        path
    }

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn same_content_same_digest() {
        let dir = TempDir::new().unwrap();
        let data = patterned(300_000);
        let a = write_file(&dir, "a.bin", &data);
        let b = write_file(&dir, "b.bin", &data);

        for strategy in [FingerprintStrategy::Sampled, FingerprintStrategy::Full] {
            let fa = fingerprint(&a, strategy).unwrap();
            assert_eq!(fa, fingerprint(&a, strategy).unwrap());
            assert_eq!(fa, fingerprint(&b, strategy).unwrap());
            assert_eq!(fa.len(), 64);
        }
    }

    #[test]
    fn small_file_is_hashed_whole() {
        let dir = TempDir::new().unwrap();
        let data = patterned(1000);
        let path = write_file(&dir, "small.bin", &data);

        let expected = hex::encode(Sha256::digest(&data));
        assert_eq!(fingerprint(&path, FingerprintStrategy::Sampled).unwrap(), expected);
        assert_eq!(fingerprint(&path, FingerprintStrategy::Full).unwrap(), expected);
    }

    #[test]
    fn sampled_digest_covers_head_middle_and_tail() {
        let dir = TempDir::new().unwrap();
        let data = patterned(300_000);
        let size = data.len();
        let mut expected = Sha256::new();
        expected.update(&data[..SAMPLE_LEN as usize]);
        expected.update(&data[size / 3..size / 3 + SAMPLE_LEN as usize]);
        expected.update(&data[size - SAMPLE_LEN as usize..]);
        let path = write_file(&dir, "big.bin", &data);

        assert_eq!(
            fingerprint(&path, FingerprintStrategy::Sampled).unwrap(),
            hex::encode(expected.finalize())
        );
    }

    #[test]
    fn changing_a_sampled_region_changes_digest() {
        let dir = TempDir::new().unwrap();
        let data = patterned(300_000);
        let original = write_file(&dir, "orig.bin", &data);
        let base = fingerprint(&original, FingerprintStrategy::Sampled).unwrap();

        for offset in [10, data.len() / 3 + 5, data.len() - 10] {
            let mut changed = data.clone();
            changed[offset] ^= 0xFF;
            let path = write_file(&dir, &format!("changed-{offset}.bin"), &changed);
            assert_ne!(base, fingerprint(&path, FingerprintStrategy::Sampled).unwrap());
        }
    }

    #[test]
    fn full_strategy_sees_unsampled_bytes() {
        let dir = TempDir::new().unwrap();
        let data = patterned(300_000);
        let mut changed = data.clone();
        // Between the head and middle samples.
        changed[50_000] ^= 0xFF;
        let a = write_file(&dir, "a.bin", &data);
        let b = write_file(&dir, "b.bin", &changed);

        assert_eq!(
            fingerprint(&a, FingerprintStrategy::Sampled).unwrap(),
            fingerprint(&b, FingerprintStrategy::Sampled).unwrap()
        );
        assert_ne!(
            fingerprint(&a, FingerprintStrategy::Full).unwrap(),
            fingerprint(&b, FingerprintStrategy::Full).unwrap()
        );
    }

    #[test]
    fn parses_strategy_names() {
        assert_eq!("sampled".parse::<FingerprintStrategy>().unwrap(), FingerprintStrategy::Sampled);
        assert_eq!(" FULL ".parse::<FingerprintStrategy>().unwrap(), FingerprintStrategy::Full);
        assert!("md5".parse::<FingerprintStrategy>().is_err());
    }
}
