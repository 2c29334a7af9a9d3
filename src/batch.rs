use std::fs;
use std::path::{Path, PathBuf};

use image::{ImageFormat, RgbImage};
use tracing::{debug, info, warn};

use crate::error::IngestError;
use crate::pickle::{self, Value};

const SIDE: u32 = 32;
const CHANNELS: usize = 3;
pub const SAMPLE_BYTES: usize = (SIDE * SIDE) as usize * CHANNELS;
const DECODED_DIR: &str = "decoded";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchLayout {
    TenClass,
    HundredClass,
}

impl BatchLayout {
    pub const ALL: [BatchLayout; 2] = [BatchLayout::TenClass, BatchLayout::HundredClass];

    pub fn dir_name(self) -> &'static str {
        match self {
            BatchLayout::TenClass => "cifar-10-batches-py",
            BatchLayout::HundredClass => "cifar-100-python",
        }
    }

    pub fn batch_files(self) -> &'static [&'static str] {
        match self {
            BatchLayout::TenClass => &[
                "data_batch_1",
                "data_batch_2",
                "data_batch_3",
                "data_batch_4",
                "data_batch_5",
                "test_batch",
            ],
            BatchLayout::HundredClass => &["train", "test"],
        }
    }

    pub fn locate(root: &Path) -> Option<(BatchLayout, PathBuf)> {
        let mut candidates = vec![root.to_path_buf()];
        if let Ok(entries) = fs::read_dir(root) {
            let mut children: Vec<PathBuf> = entries
                .flatten()
                .map(|entry| entry.path())
                .filter(|path| path.is_dir())
                .collect();
            children.sort();
            candidates.extend(children);
        }
        for base in candidates {
            for layout in Self::ALL {
                let dir = base.join(layout.dir_name());
                if layout.batch_files().iter().any(|name| dir.join(name).is_file()) {
                    return Some((layout, dir));
                }
            }
        }
        None
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchDecoder;

impl BatchDecoder {
    pub fn decode(&self, raw_dir: &Path) -> usize {
        let Some((layout, dir)) = BatchLayout::locate(raw_dir) else {
            debug!(dir = %raw_dir.display(), "no batch layout found");
            return 0;
        };
        info!(layout = layout.dir_name(), "decoding sample batches");

        let mut total = 0;
        for name in layout.batch_files() {
            let path = dir.join(name);
            if !path.is_file() {
                warn!(batch = name, "batch file missing");
                continue;
            }
            let out_dir = raw_dir.join(DECODED_DIR).join(name);
            match self.decode_file(&path, name, &out_dir) {
                Ok(count) => {
                    info!(batch = name, count, "batch decoded");
                    total += count;
                }
                Err(err) => warn!(batch = name, error = %err, "batch decode failed"),
            }
        }
        total
    }

    fn decode_file(&self, path: &Path, batch: &str, out_dir: &Path) -> Result<usize, IngestError> {
        let bytes = fs::read(path)
            .map_err(|err| IngestError::Filesystem(format!("read {}: {err}", path.display())))?;
        let root = pickle::from_slice(&bytes)?;
        let Some(data) = root.get("data") else {
            warn!(batch, "batch has no data field");
            return Ok(0);
        };
        let samples = sample_rows(data)?;
        if samples.missing > 0 {
            warn!(batch, missing = samples.missing, "array buffer shorter than declared shape");
        }
        let names = root.get("filenames");

        fs::create_dir_all(out_dir).map_err(|err| IngestError::Filesystem(err.to_string()))?;
        let mut written = 0;
        for (index, row) in samples.rows.iter().enumerate() {
            let Some(row) = row else {
                debug!(batch, index, "skipping malformed sample");
                continue;
            };
            let file_name = sample_name(names, batch, index);
            match write_sample(row, &out_dir.join(file_name)) {
                Ok(()) => written += 1,
                Err(err) => warn!(batch, index, error = %err, "failed to write sample"),
            }
        }
        Ok(written)
    }
}

#[derive(Debug, Default)]
pub struct SampleRows {
    // `None` marks a sample that does not hold exactly SAMPLE_BYTES bytes.
    pub rows: Vec<Option<Vec<u8>>>,
    pub missing: usize,
}

pub fn sample_rows(data: &Value) -> Result<SampleRows, IngestError> {
    match data {
        Value::List(items) => Ok(SampleRows {
            rows: items
                .iter()
                .map(|item| item.as_bytes().filter(|bytes| bytes.len() == SAMPLE_BYTES))
                .collect(),
            missing: 0,
        }),
        Value::Object { state: Some(state), .. } => ndarray_rows(state),
        _ => Err(IngestError::Batch(
            "data field is neither an array nor a list".to_string(),
        )),
    }
}

// numpy pickles arrays as `_reconstruct(...)` followed by BUILD with
// `(version, shape, dtype, is_fortran, raw)`.
fn ndarray_rows(state: &Value) -> Result<SampleRows, IngestError> {
    let Value::Tuple(fields) = state else {
        return Err(IngestError::Batch("array state is not a tuple".to_string()));
    };
    let [_, shape, dtype, fortran, raw] = fields.as_slice() else {
        return Err(IngestError::Batch(format!(
            "unexpected array state with {} fields",
            fields.len()
        )));
    };

    let Value::Tuple(dims) = shape else {
        return Err(IngestError::Batch("array shape is not a tuple".to_string()));
    };
    let dims = dims
        .iter()
        .map(|dim| dim.as_int().and_then(|value| usize::try_from(value).ok()))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| IngestError::Batch("array shape is not integral".to_string()))?;
    let Some((&count, rest)) = dims.split_first() else {
        return Err(IngestError::Batch("array has no dimensions".to_string()));
    };
    let row_len: usize = rest.iter().product();
    if row_len != SAMPLE_BYTES {
        return Err(IngestError::Batch(format!(
            "sample size {row_len} does not match {SAMPLE_BYTES}"
        )));
    }
    if !is_uint8(dtype) {
        return Err(IngestError::Batch("array dtype is not uint8".to_string()));
    }
    if fortran.as_int().unwrap_or(0) != 0 {
        return Err(IngestError::Batch(
            "fortran-ordered arrays are not supported".to_string(),
        ));
    }
    let raw = raw
        .as_bytes()
        .ok_or_else(|| IngestError::Batch("array buffer is not bytes".to_string()))?;

    if count.checked_mul(SAMPLE_BYTES).is_none() {
        return Err(IngestError::Batch(format!(
            "declared sample count {count} overflows the buffer size"
        )));
    }

    // Rows are bounded by the buffer actually present, not by the declared shape.
    let present = count.min(raw.len() / SAMPLE_BYTES);
    Ok(SampleRows {
        rows: raw
            .chunks_exact(SAMPLE_BYTES)
            .take(present)
            .map(|row| Some(row.to_vec()))
            .collect(),
        missing: count - present,
    })
}

fn is_uint8(dtype: &Value) -> bool {
    let Value::Object { args, .. } = dtype else {
        return false;
    };
    let Value::Tuple(items) = args.as_ref() else {
        return false;
    };
    items
        .first()
        .and_then(Value::as_text)
        .map(|code| code.trim_start_matches('|') == "u1")
        .unwrap_or(false)
}

fn sample_name(names: Option<&Value>, batch: &str, index: usize) -> String {
    let explicit = match names {
        Some(Value::List(items)) => items.get(index).and_then(Value::as_text),
        _ => None,
    };
    explicit
        .as_deref()
        .and_then(|name| Path::new(name).file_stem())
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .map(|stem| format!("{stem}.png"))
        .unwrap_or_else(|| format!("{batch}_{index:05}.png"))
}

// Samples are channel-major (3, 32, 32); PNG wants interleaved RGB.
pub fn write_sample(flat: &[u8], path: &Path) -> Result<(), IngestError> {
    if flat.len() != SAMPLE_BYTES {
        return Err(IngestError::Batch(format!(
            "sample has {} bytes, expected {SAMPLE_BYTES}",
            flat.len()
        )));
    }
    let plane = (SIDE * SIDE) as usize;
    let mut interleaved = Vec::with_capacity(SAMPLE_BYTES);
    for pixel in 0..plane {
        for channel in 0..CHANNELS {
            interleaved.push(flat[channel * plane + pixel]);
        }
    }
    let image = RgbImage::from_raw(SIDE, SIDE, interleaved)
        .ok_or_else(|| IngestError::Image("sample buffer size mismatch".to_string()))?;
    image
        .save_with_format(path, ImageFormat::Png)
        .map_err(|err| IngestError::Image(format!("write {}: {err}", path.display())))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    // Protocol-2 pickle of {'data': ndarray(uint8, (n, 3072)), 'filenames': [...]}
    // laid out the way numpy writes it.
    pub(crate) fn ndarray_batch(samples: &[Vec<u8>], names: Option<&[&str]>) -> Vec<u8> {
        let mut out = vec![0x80, 0x02, b'}', b'q', 0x00, b'('];
        push_short(&mut out, b"data");
        out.extend_from_slice(b"cnumpy.core.multiarray\n_reconstruct\n");
        out.extend_from_slice(b"cnumpy\nndarray\n");
        out.extend_from_slice(b"K\x00\x85");
        push_short(&mut out, b"b");
        out.extend_from_slice(b"\x87R(K\x01");
        out.push(b'J');
        out.extend_from_slice(&(samples.len() as i32).to_le_bytes());
        out.push(b'M');
        out.extend_from_slice(&(SAMPLE_BYTES as u16).to_le_bytes());
        out.push(0x86);
        out.extend_from_slice(b"cnumpy\ndtype\n");
        push_short(&mut out, b"u1");
        out.extend_from_slice(b"K\x00K\x01\x87R(K\x03");
        push_short(&mut out, b"|");
        out.extend_from_slice(b"NNNJ\xff\xff\xff\xffJ\xff\xff\xff\xffK\x00tb");
        out.push(0x89);
        let raw: Vec<u8> = samples.concat();
        out.push(b'T');
        out.extend_from_slice(&(raw.len() as u32).to_le_bytes());
        out.extend_from_slice(&raw);
        out.extend_from_slice(b"tb");
        if let Some(names) = names {
            push_short(&mut out, b"filenames");
            out.extend_from_slice(b"](");
            for name in names {
                push_short(&mut out, name.as_bytes());
            }
            out.push(b'e');
        }
        out.extend_from_slice(b"u.");
        out
    }

    fn push_short(out: &mut Vec<u8>, bytes: &[u8]) {
        out.push(b'U');
        out.push(bytes.len() as u8);
        out.extend_from_slice(bytes);
    }

    fn list_batch(samples: &[Vec<u8>]) -> Vec<u8> {
        let mut out = vec![0x80, 0x02, b'}', b'('];
        push_short(&mut out, b"data");
        out.extend_from_slice(b"](");
        for sample in samples {
            out.push(b'T');
            out.extend_from_slice(&(sample.len() as u32).to_le_bytes());
            out.extend_from_slice(sample);
        }
        out.extend_from_slice(b"eu.");
        out
    }

    fn solid_sample(r: u8, g: u8, b: u8) -> Vec<u8> {
        let plane = (SIDE * SIDE) as usize;
        let mut flat = vec![r; plane];
        flat.extend(vec![g; plane]);
        flat.extend(vec![b; plane]);
        flat
    }

    #[test]
    fn decodes_ndarray_batch_with_names() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("cifar-10-batches-py");
        fs::create_dir_all(&dir).unwrap();
        let samples = vec![solid_sample(255, 0, 128), solid_sample(1, 2, 3)];
        fs::write(
            dir.join("data_batch_1"),
            ndarray_batch(&samples, Some(&["nested/frog_001.png", "cat_002.png"])),
        )
        .unwrap();

        let count = BatchDecoder.decode(temp.path());

        assert_eq!(count, 2);
        let frog = temp.path().join("decoded/data_batch_1/frog_001.png");
        let image = image::open(&frog).unwrap().to_rgb8();
        assert_eq!(image.dimensions(), (32, 32));
        assert_eq!(image.get_pixel(5, 7).0, [255, 0, 128]);
        assert!(temp.path().join("decoded/data_batch_1/cat_002.png").is_file());
    }

    #[test]
    fn transposes_channel_major_layout() {
        let temp = tempfile::tempdir().unwrap();
        let mut flat = vec![0u8; SAMPLE_BYTES];
        // red plane, row 1, column 2
        flat[32 + 2] = 7;
        // blue plane, row 31, column 0
        flat[2 * 1024 + 31 * 32] = 9;
        let path = temp.path().join("s.png");

        write_sample(&flat, &path).unwrap();

        let image = image::open(&path).unwrap().to_rgb8();
        assert_eq!(image.get_pixel(2, 1).0, [7, 0, 0]);
        assert_eq!(image.get_pixel(0, 31).0, [0, 0, 9]);
    }

    #[test]
    fn malformed_samples_are_skipped_and_named_synthetically() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("extracted").join("cifar-100-python");
        fs::create_dir_all(&dir).unwrap();
        let samples = vec![solid_sample(9, 9, 9), vec![1, 2, 3], solid_sample(4, 5, 6)];
        fs::write(dir.join("train"), list_batch(&samples)).unwrap();
        fs::write(dir.join("test"), b"garbage").unwrap();

        let count = BatchDecoder.decode(temp.path());

        assert_eq!(count, 2);
        let out = temp.path().join("decoded/train");
        assert!(out.join("train_00000.png").is_file());
        assert!(!out.join("train_00001.png").exists());
        assert!(out.join("train_00002.png").is_file());
    }

    #[test]
    fn truncated_array_buffer_drops_missing_rows() {
        let samples = vec![solid_sample(1, 1, 1), solid_sample(2, 2, 2)];
        let mut bytes = ndarray_batch(&samples, None);
        // Claim three rows while only two are present.
        let shape_pos = bytes
            .windows(5)
            .position(|w| w == [b'J', 2, 0, 0, 0])
            .unwrap();
        bytes[shape_pos + 1] = 3;

        let root = pickle::from_slice(&bytes).unwrap();
        let samples = sample_rows(root.get("data").unwrap()).unwrap();

        assert_eq!(samples.rows.len(), 2);
        assert!(samples.rows.iter().all(Option::is_some));
        assert_eq!(samples.missing, 1);
    }

    #[test]
    fn oversized_declared_shape_does_not_stop_other_batches() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("cifar-10-batches-py");
        fs::create_dir_all(&dir).unwrap();
        let mut huge = ndarray_batch(&[solid_sample(1, 1, 1)], None);
        let shape_pos = huge
            .windows(5)
            .position(|w| w == [b'J', 1, 0, 0, 0])
            .unwrap();
        huge[shape_pos + 1..shape_pos + 5].copy_from_slice(&0x7fff_ffff_i32.to_le_bytes());
        fs::write(dir.join("data_batch_1"), huge).unwrap();
        fs::write(
            dir.join("test_batch"),
            ndarray_batch(&[solid_sample(2, 2, 2)], None),
        )
        .unwrap();

        let count = BatchDecoder.decode(temp.path());

        assert_eq!(count, 2);
        assert!(temp.path().join("decoded/data_batch_1/data_batch_1_00000.png").is_file());
        assert!(temp.path().join("decoded/test_batch/test_batch_00000.png").is_file());
    }

    #[test]
    fn missing_layout_decodes_nothing() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("readme.txt"), b"hi").unwrap();
        assert_eq!(BatchDecoder.decode(temp.path()), 0);
        assert!(!temp.path().join("decoded").exists());
    }
}
