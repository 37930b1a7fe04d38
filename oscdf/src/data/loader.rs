use std::fs;
use std::io::{self, Cursor, Read, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use osccore::data::trials::TrialMatrix;
use osccore::PipelineConfig;
use serde::Serialize;

const MAGIC: &[u8; 4] = b"OSCT";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrialFormat {
    /// `[[f64, ..], ..]`, one array per trial
    Json,
    /// `OSCT`, u64 trials, u64 samples, then row-major f64, all little-endian
    Binary,
}

/// Format and zstd wrapping of `path`, from its extension(s).
pub fn detect_format(path: &Path) -> Result<(TrialFormat, bool)> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    let compressed = name.ends_with(".zst");
    let inner = if compressed { &name[..name.len() - 4] } else { &name[..] };
    match Path::new(inner).extension().and_then(|e| e.to_str()) {
        Some("json") => Ok((TrialFormat::Json, compressed)),
        Some("bin") | Some("osct") => Ok((TrialFormat::Binary, compressed)),
        _ => bail!("unsupported trial file: {}", path.display()),
    }
}

pub fn zstd_decompress(compressed_data: &[u8]) -> io::Result<Vec<u8>> {
    let mut decoder = zstd::Decoder::new(compressed_data)?;
    let mut decompressed_data = Vec::new();
    decoder.read_to_end(&mut decompressed_data)?;
    Ok(decompressed_data)
}

pub fn zstd_compress(decompressed_data: &[u8], compression_level: i32) -> io::Result<Vec<u8>> {
    let mut encoder = zstd::Encoder::new(Vec::new(), compression_level)?;
    encoder.write_all(decompressed_data)?;
    encoder.finish()
}

pub fn encode_binary(trials: &TrialMatrix) -> io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(20 + 8 * trials.n_trials() * trials.n_samples());
    out.write_all(MAGIC)?;
    out.write_u64::<LittleEndian>(trials.n_trials() as u64)?;
    out.write_u64::<LittleEndian>(trials.n_samples() as u64)?;
    for row in trials.iter_rows() {
        for &v in row {
            out.write_f64::<LittleEndian>(v)?;
        }
    }
    Ok(out)
}

pub fn decode_binary(bytes: &[u8]) -> Result<TrialMatrix> {
    let mut rdr = Cursor::new(bytes);
    let mut magic = [0u8; 4];
    rdr.read_exact(&mut magic).context("reading header")?;
    if &magic != MAGIC {
        bail!("not a trial file: bad magic {:?}", magic);
    }
    let rows = rdr.read_u64::<LittleEndian>().context("reading trial count")? as usize;
    let cols = rdr.read_u64::<LittleEndian>().context("reading sample count")? as usize;

    let expected = rows.checked_mul(cols).and_then(|n| n.checked_mul(8));
    let remaining = bytes.len() - rdr.position() as usize;
    if expected != Some(remaining) {
        bail!("{} x {} trials need {:?} bytes, found {}", rows, cols, expected, remaining);
    }

    let mut data = vec![0.0f64; rows * cols];
    rdr.read_f64_into::<LittleEndian>(&mut data).context("reading samples")?;
    Ok(TrialMatrix::new(data, rows, cols)?)
}

pub fn load_trials(path: &Path) -> Result<TrialMatrix> {
    let (format, compressed) = detect_format(path)?;
    let raw = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let bytes = if compressed {
        zstd_decompress(&raw).with_context(|| format!("decompressing {}", path.display()))?
    } else {
        raw
    };

    let trials = match format {
        TrialFormat::Json => {
            let rows: Vec<Vec<f64>> = serde_json::from_slice(&bytes).context("parsing JSON trials")?;
            TrialMatrix::from_rows(rows)?
        }
        TrialFormat::Binary => decode_binary(&bytes)?,
    };
    log::info!(
        "loaded {} trials x {} samples from {}",
        trials.n_trials(),
        trials.n_samples(),
        path.display()
    );
    Ok(trials)
}

pub fn save_trials(path: &Path, trials: &TrialMatrix, compression_level: i32) -> Result<()> {
    let (format, compressed) = detect_format(path)?;
    let bytes = match format {
        TrialFormat::Json => {
            let rows: Vec<&[f64]> = trials.iter_rows().collect();
            serde_json::to_vec(&rows)?
        }
        TrialFormat::Binary => encode_binary(trials)?,
    };
    let bytes = if compressed { zstd_compress(&bytes, compression_level)? } else { bytes };
    fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let config: PipelineConfig = serde_json::from_str(&text).context("parsing pipeline config")?;
    Ok(config)
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("oscdf-{}-{}", std::process::id(), name))
    }

    fn trials() -> TrialMatrix {
        TrialMatrix::from_rows(vec![vec![0.5, -1.0, 2.0], vec![3.0, 4.25, -0.125]]).unwrap()
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format(Path::new("a/x.json")).unwrap(), (TrialFormat::Json, false));
        assert_eq!(detect_format(Path::new("x.bin.zst")).unwrap(), (TrialFormat::Binary, true));
        assert!(detect_format(Path::new("x.csv")).is_err());
    }

    #[test]
    fn test_compressed_binary_file() {
        let path = scratch("trials.bin.zst");
        save_trials(&path, &trials(), 3).unwrap();
        let loaded = load_trials(&path).unwrap();
        fs::remove_file(&path).ok();
        assert_eq!(loaded, trials());
    }

    #[test]
    fn test_json_file() {
        let path = scratch("trials.json");
        fs::write(&path, "[[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]").unwrap();
        let loaded = load_trials(&path).unwrap();
        fs::remove_file(&path).ok();
        assert_eq!(loaded.n_trials(), 3);
        assert_eq!(loaded.row(2), &[5.0, 6.0]);
    }

    #[test]
    fn test_truncated_binary() {
        let mut bytes = encode_binary(&trials()).unwrap();
        bytes.truncate(bytes.len() - 4);
        assert!(decode_binary(&bytes).is_err());
        assert!(decode_binary(b"NOPE").is_err());
    }

    #[test]
    fn test_partial_config() {
        let path = scratch("config.json");
        fs::write(&path, r#"{"cross_validation": {"seed": 9, "outer_repetitions": 4}}"#).unwrap();
        let config = load_config(&path).unwrap();
        fs::remove_file(&path).ok();
        assert_eq!(config.cross_validation.seed, 9);
        assert_eq!(config.cross_validation.outer_repetitions, 4);
        assert_eq!(config.cross_validation.inner_splits, 100);
    }
}
