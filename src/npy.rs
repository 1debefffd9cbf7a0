//! NumPy `.npy` reader and writer
//!
//! Pretrained snapshots are stored one array per file in the NumPy v1/v2/v3
//! format. Little-endian `float32` and `float64` arrays in C order are
//! supported; `float64` data is narrowed to `f32` on read. Arrays are always
//! written as `float32`, version 1.0.
//!
//! Reference: <https://numpy.org/devdocs/reference/generated/numpy.lib.format.html>

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use ndarray::{ArrayD, IxDyn};
use thiserror::Error;

use crate::error::{GridError, GridResult};

const MAGIC: &[u8; 6] = b"\x93NUMPY";
const ALIGNMENT: usize = 64;

/// Errors produced while decoding or encoding an `.npy` stream.
#[derive(Debug, Error)]
pub enum NpyError {
    #[error("not a valid .npy file (bad magic)")]
    BadMagic,

    #[error("unsupported .npy version {0}.{1}")]
    UnsupportedVersion(u8, u8),

    #[error("malformed header: {0}")]
    BadHeader(String),

    #[error("unsupported dtype {0} (only <f4 and <f8 are supported)")]
    UnsupportedDtype(String),

    #[error("fortran-ordered arrays are not supported")]
    FortranOrder,

    #[error("read error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dtype {
    F32,
    F64,
}

impl Dtype {
    fn size(self) -> usize {
        match self {
            Dtype::F32 => 4,
            Dtype::F64 => 8,
        }
    }
}

#[derive(Debug)]
struct NpyHeader {
    dtype: Dtype,
    shape: Vec<usize>,
}

fn read_header<R: Read>(reader: &mut R) -> Result<NpyHeader, NpyError> {
    let mut magic = [0u8; 6];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(NpyError::BadMagic);
    }

    let mut version = [0u8; 2];
    reader.read_exact(&mut version)?;

    let header_len = match version[0] {
        1 => {
            let mut buf = [0u8; 2];
            reader.read_exact(&mut buf)?;
            u16::from_le_bytes(buf) as usize
        }
        2 | 3 => {
            let mut buf = [0u8; 4];
            reader.read_exact(&mut buf)?;
            u32::from_le_bytes(buf) as usize
        }
        _ => return Err(NpyError::UnsupportedVersion(version[0], version[1])),
    };

    let mut header_bytes = vec![0u8; header_len];
    reader.read_exact(&mut header_bytes)?;
    let header = std::str::from_utf8(&header_bytes)
        .map_err(|e| NpyError::BadHeader(format!("header is not utf8: {e}")))?;

    parse_header_dict(header)
}

/// Locate the text following `'key':` in the header dict.
fn dict_value<'a>(header: &'a str, key: &str) -> Result<&'a str, NpyError> {
    let single = format!("'{key}':");
    let double = format!("\"{key}\":");
    let (start, len) = header
        .find(&single)
        .map(|i| (i, single.len()))
        .or_else(|| header.find(&double).map(|i| (i, double.len())))
        .ok_or_else(|| NpyError::BadHeader(format!("no '{key}' key in {header}")))?;
    Ok(header[start + len..].trim_start())
}

fn parse_header_dict(header: &str) -> Result<NpyHeader, NpyError> {
    let descr = dict_value(header, "descr")?;
    let quote = descr
        .chars()
        .next()
        .filter(|c| *c == '\'' || *c == '"')
        .ok_or_else(|| NpyError::BadHeader("descr is not a string".to_string()))?;
    let descr = &descr[1..];
    let end = descr
        .find(quote)
        .ok_or_else(|| NpyError::BadHeader("unterminated descr".to_string()))?;
    let dtype = match &descr[..end] {
        "<f4" | "float32" => Dtype::F32,
        "<f8" | "float64" => Dtype::F64,
        other => return Err(NpyError::UnsupportedDtype(other.to_string())),
    };

    if dict_value(header, "fortran_order")?.starts_with("True") {
        return Err(NpyError::FortranOrder);
    }

    let shape_text = dict_value(header, "shape")?;
    let close = shape_text
        .find(')')
        .filter(|_| shape_text.starts_with('('))
        .ok_or_else(|| NpyError::BadHeader(format!("bad shape tuple in {header}")))?;
    let shape = shape_text[1..close]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<usize>()
                .map_err(|e| NpyError::BadHeader(format!("bad shape dim {s:?}: {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(NpyHeader { dtype, shape })
}

/// Decode an `.npy` stream into an `f32` array.
pub fn read_npy<R: Read>(mut reader: R) -> Result<ArrayD<f32>, NpyError> {
    let header = read_header(&mut reader)?;
    let byte_len = header
        .shape
        .iter()
        .try_fold(header.dtype.size(), |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(|| {
            NpyError::BadHeader(format!("shape {:?} overflows the address space", header.shape))
        })?;

    // The header is untrusted, so the buffer grows with the bytes actually read
    let mut raw = Vec::new();
    reader.by_ref().take(byte_len as u64).read_to_end(&mut raw)?;
    if raw.len() != byte_len {
        return Err(NpyError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("expected {byte_len} data bytes, found {}", raw.len()),
        )));
    }

    let data: Vec<f32> = match header.dtype {
        Dtype::F32 => raw
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        Dtype::F64 => raw
            .chunks_exact(8)
            .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f32)
            .collect(),
    };

    ArrayD::from_shape_vec(IxDyn(&header.shape), data)
        .map_err(|e| NpyError::BadHeader(format!("shape does not match data: {e}")))
}

/// Encode an `f32` array as a version 1.0 `.npy` stream.
pub fn write_npy<W: Write>(mut writer: W, array: &ArrayD<f32>) -> Result<(), NpyError> {
    let shape = match array.shape() {
        [n] => format!("({n},)"),
        dims => format!(
            "({})",
            dims.iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    };
    let mut dict = format!("{{'descr': '<f4', 'fortran_order': False, 'shape': {shape}, }}");

    // magic + version + u16 length + dict + trailing newline
    let unpadded = MAGIC.len() + 2 + 2 + dict.len() + 1;
    let padding = (ALIGNMENT - unpadded % ALIGNMENT) % ALIGNMENT;
    dict.extend(std::iter::repeat(' ').take(padding));
    dict.push('\n');

    let header_len = u16::try_from(dict.len())
        .map_err(|_| NpyError::BadHeader("header longer than 65535 bytes".to_string()))?;

    writer.write_all(MAGIC)?;
    writer.write_all(&[1, 0])?;
    writer.write_all(&header_len.to_le_bytes())?;
    writer.write_all(dict.as_bytes())?;
    // iter() walks logical (row-major) order regardless of memory layout
    for value in array.iter() {
        writer.write_all(&value.to_le_bytes())?;
    }
    writer.flush()?;
    Ok(())
}

/// Read an `.npy` file from disk.
pub fn read_npy_file(path: &Path) -> GridResult<ArrayD<f32>> {
    let file = File::open(path).map_err(|e| GridError::io(path, e))?;
    read_npy(BufReader::new(file)).map_err(|source| match source {
        NpyError::Io(e) if e.kind() != std::io::ErrorKind::UnexpectedEof => GridError::io(path, e),
        source => GridError::Npy {
            path: path.to_path_buf(),
            source,
        },
    })
}

/// Write an `.npy` file to disk, replacing any existing file.
pub fn write_npy_file(path: &Path, array: &ArrayD<f32>) -> GridResult<()> {
    let file = File::create(path).map_err(|e| GridError::io(path, e))?;
    write_npy(BufWriter::new(file), array).map_err(|source| match source {
        NpyError::Io(e) => GridError::io(path, e),
        source => GridError::Npy {
            path: path.to_path_buf(),
            source,
        },
    })
}
