//! Synthetic single-cell count matrices for loader benchmarks.
//!
//! Generates a deterministic cells × genes CSR matrix of small positive counts
//! and stores it on disk so repeated runs read identical data.
//!
//! # File Format
//!
//! ```text
//! Header (bincode, fixed width):
//!   magic: [u8; 8]  = b"CLB_CSR\0"
//!   version: u32    = 1
//!   n_rows: u64     = number of cells
//!   n_cols: u64     = number of genes
//!   nnz: u64        = number of stored values
//!   seed: u64       = random seed used for generation
//!
//! Body (bincode):
//!   indptr: Vec<u64>   (n_rows + 1)
//!   indices: Vec<u32>  (nnz)
//!   data: Vec<f32>     (nnz)
//! ```

use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::DatasetError;

/// Magic bytes identifying the dataset format.
const MAGIC: [u8; 8] = *b"CLB_CSR\0";

/// Current format version.
const FORMAT_VERSION: u32 = 1;

/// Largest count value generated for a stored entry.
const MAX_COUNT: u32 = 32;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Header {
    magic: [u8; 8],
    version: u32,
    n_rows: u64,
    n_cols: u64,
    nnz: u64,
    seed: u64,
}

/// Dataset metadata from the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetMeta {
    pub n_rows: u64,
    pub n_cols: u64,
    pub nnz: u64,
    pub seed: u64,
}

/// Configuration for dataset generation.
#[derive(Debug, Clone)]
pub struct GenerateConfig {
    /// Number of cells (rows).
    pub rows: u64,
    /// Number of genes (columns).
    pub cols: u64,
    /// Expected fraction of non-zero entries per row.
    pub density: f64,
    /// Random seed for deterministic generation.
    pub seed: u64,
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            rows: 10_000,
            cols: 2_000,
            density: 0.05,
            seed: 42,
        }
    }
}

/// An in-memory CSR count matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseDataset {
    pub n_rows: u64,
    pub n_cols: u64,
    pub seed: u64,
    pub indptr: Vec<u64>,
    pub indices: Vec<u32>,
    pub data: Vec<f32>,
}

#[derive(Serialize, Deserialize)]
struct Body {
    indptr: Vec<u64>,
    indices: Vec<u32>,
    data: Vec<f32>,
}

impl SparseDataset {
    pub fn nnz(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn meta(&self) -> DatasetMeta {
        DatasetMeta {
            n_rows: self.n_rows,
            n_cols: self.n_cols,
            nnz: self.nnz(),
            seed: self.seed,
        }
    }

    /// Column indices and values of one row.
    pub fn row(&self, row: usize) -> (&[u32], &[f32]) {
        let lo = self.indptr[row] as usize;
        let hi = self.indptr[row + 1] as usize;
        (&self.indices[lo..hi], &self.data[lo..hi])
    }

    /// Check the CSR structure; loaders index without further checks.
    pub fn validate(&self) -> Result<(), DatasetError> {
        let corrupt = |msg: String| Err(DatasetError::Corrupt(msg));
        if self.indptr.len() as u64 != self.n_rows + 1 {
            return corrupt(format!(
                "indptr has {} entries, expected {}",
                self.indptr.len(),
                self.n_rows + 1
            ));
        }
        if self.indices.len() != self.data.len() {
            return corrupt(format!(
                "{} indices but {} values",
                self.indices.len(),
                self.data.len()
            ));
        }
        if self.indptr.first() != Some(&0) || self.indptr.last() != Some(&self.nnz()) {
            return corrupt("indptr does not span the stored values".to_string());
        }
        if self.indptr.windows(2).any(|w| w[0] > w[1]) {
            return corrupt("indptr is not monotone".to_string());
        }
        if let Some(bad) = self.indices.iter().find(|&&c| c as u64 >= self.n_cols) {
            return corrupt(format!("column index {bad} out of range ({})", self.n_cols));
        }
        Ok(())
    }
}

fn per_row_seed(master_seed: u64, index: u64) -> u64 {
    master_seed
        .wrapping_add(index)
        .wrapping_mul(0x517cc1b727220a95)
}

/// Generate one row's sorted column indices and counts.
fn generate_row(rng: &mut ChaCha8Rng, cols: u64, density: f64) -> (Vec<u32>, Vec<f32>) {
    let expected = cols as f64 * density.clamp(0.0, 1.0);
    // Jitter the row length by ±50% so rows differ in size like real cells.
    let jitter = rng.gen_range(0.5..1.5);
    let k = ((expected * jitter).round() as u64).min(cols) as usize;

    let mut cols_picked: Vec<u32> = index::sample(rng, cols as usize, k)
        .into_iter()
        .map(|c| c as u32)
        .collect();
    cols_picked.sort_unstable();
    let values = (0..k)
        .map(|_| rng.gen_range(1..=MAX_COUNT) as f32)
        .collect();
    (cols_picked, values)
}

/// Generate a dataset deterministically.
///
/// Rows are generated in parallel from per-row seeds, so the result does not
/// depend on the thread count.
pub fn generate_dataset(config: &GenerateConfig) -> SparseDataset {
    let rows: Vec<(Vec<u32>, Vec<f32>)> = (0..config.rows)
        .into_par_iter()
        .map(|i| {
            let mut rng = ChaCha8Rng::seed_from_u64(per_row_seed(config.seed, i));
            generate_row(&mut rng, config.cols, config.density)
        })
        .collect();

    let nnz: usize = rows.iter().map(|(c, _)| c.len()).sum();
    let mut indptr = Vec::with_capacity(rows.len() + 1);
    let mut indices = Vec::with_capacity(nnz);
    let mut data = Vec::with_capacity(nnz);
    indptr.push(0u64);
    for (cols, values) in rows {
        indices.extend(cols);
        data.extend(values);
        indptr.push(indices.len() as u64);
    }

    SparseDataset {
        n_rows: config.rows,
        n_cols: config.cols,
        seed: config.seed,
        indptr,
        indices,
        data,
    }
}

/// Write a dataset to a binary file.
pub fn write_dataset<P: AsRef<Path>>(path: P, dataset: &SparseDataset) -> Result<(), DatasetError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::with_capacity(64 * 1024, file);

    let header = Header {
        magic: MAGIC,
        version: FORMAT_VERSION,
        n_rows: dataset.n_rows,
        n_cols: dataset.n_cols,
        nnz: dataset.nnz(),
        seed: dataset.seed,
    };
    bincode::serialize_into(&mut writer, &header)?;
    bincode::serialize_into(
        &mut writer,
        &(&dataset.indptr, &dataset.indices, &dataset.data),
    )?;

    writer.flush()?;
    Ok(())
}

fn read_header<R: std::io::Read>(reader: &mut R) -> Result<Header, DatasetError> {
    let header: Header = bincode::deserialize_from(reader)?;
    if header.magic != MAGIC {
        return Err(DatasetError::BadMagic(header.magic));
    }
    if header.version != FORMAT_VERSION {
        return Err(DatasetError::UnsupportedVersion(header.version));
    }
    Ok(header)
}

/// Read dataset metadata from a file header.
pub fn read_dataset_meta<P: AsRef<Path>>(path: P) -> Result<DatasetMeta, DatasetError> {
    let mut reader = BufReader::new(File::open(path)?);
    let header = read_header(&mut reader)?;
    Ok(DatasetMeta {
        n_rows: header.n_rows,
        n_cols: header.n_cols,
        nnz: header.nnz,
        seed: header.seed,
    })
}

/// Load and validate a dataset from a binary file.
pub fn load_dataset<P: AsRef<Path>>(path: P) -> Result<SparseDataset, DatasetError> {
    let mut reader = BufReader::with_capacity(64 * 1024, File::open(path)?);
    let header = read_header(&mut reader)?;
    let body: Body = bincode::deserialize_from(&mut reader)?;

    if body.data.len() as u64 != header.nnz {
        return Err(DatasetError::Corrupt(format!(
            "header declares {} values, body has {}",
            header.nnz,
            body.data.len()
        )));
    }

    let dataset = SparseDataset {
        n_rows: header.n_rows,
        n_cols: header.n_cols,
        seed: header.seed,
        indptr: body.indptr,
        indices: body.indices,
        data: body.data,
    };
    dataset.validate()?;
    Ok(dataset)
}
