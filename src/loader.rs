//! In-memory stand-in for an ML data loader.
//!
//! Rows of a [`SparseDataset`] are ordered according to a [`BlockSpec`] and a
//! [`Shuffle`] mode, then cut into batches materialized as dense, COO or CSR
//! matrices.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::block_spec::BlockSpec;
use crate::dataset::SparseDataset;
use crate::error::{DatasetError, Error};
use crate::harness::{LoaderBatch, Payload};

/// In-memory representation a batch is materialized into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    /// Row-major dense `f32` array.
    Dense,
    /// Coordinate-format sparse matrix.
    Coo,
    /// Compressed sparse rows.
    Csr,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Dense => "dense",
            Method::Coo => "coo",
            Method::Csr => "csr",
        }
    }

    pub fn all() -> [Method; 3] {
        [Method::Dense, Method::Coo, Method::Csr]
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dense" | "np.array" => Ok(Method::Dense),
            "coo" | "scipy.coo" => Ok(Method::Coo),
            "csr" | "scipy.csr" => Ok(Method::Csr),
            _ => Err(Error::UnknownMethod(s.to_string())),
        }
    }
}

/// Row ordering across an epoch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Shuffle {
    /// Storage order.
    #[default]
    None,
    /// Shuffle chunk order, then rows within each block of chunks.
    Chunk,
    /// Shuffle all rows.
    Global,
}

impl Shuffle {
    /// `-s` count on the command line: 0 none, 1 chunk, 2+ global.
    pub fn from_count(count: u8) -> Self {
        match count {
            0 => Shuffle::None,
            1 => Shuffle::Chunk,
            _ => Shuffle::Global,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Shuffle::None => "none",
            Shuffle::Chunk => "chunk",
            Shuffle::Global => "global",
        }
    }
}

/// A materialized batch matrix.
#[derive(Clone, Debug, PartialEq)]
pub enum Matrix {
    Dense {
        rows: usize,
        cols: usize,
        data: Vec<f32>,
    },
    Coo {
        rows: usize,
        cols: usize,
        row: Vec<u32>,
        col: Vec<u32>,
        data: Vec<f32>,
    },
    Csr {
        rows: usize,
        cols: usize,
        indptr: Vec<u64>,
        indices: Vec<u32>,
        data: Vec<f32>,
    },
}

impl Matrix {
    pub fn shape(&self) -> (usize, usize) {
        match self {
            Matrix::Dense { rows, cols, .. }
            | Matrix::Coo { rows, cols, .. }
            | Matrix::Csr { rows, cols, .. } => (*rows, *cols),
        }
    }

    /// Number of non-zero values.
    pub fn nnz(&self) -> u64 {
        match self {
            Matrix::Dense { data, .. } => data.iter().filter(|&&v| v != 0.0).count() as u64,
            Matrix::Coo { data, .. } | Matrix::Csr { data, .. } => data.len() as u64,
        }
    }

    /// Gather `rows` of `dataset` into the given representation.
    pub fn gather(dataset: &SparseDataset, rows: &[u64], method: Method) -> Self {
        let cols = dataset.n_cols as usize;
        match method {
            Method::Dense => {
                let mut data = vec![0f32; rows.len() * cols];
                for (i, &r) in rows.iter().enumerate() {
                    let (idx, vals) = dataset.row(r as usize);
                    let out = &mut data[i * cols..(i + 1) * cols];
                    for (&c, &v) in idx.iter().zip(vals) {
                        out[c as usize] = v;
                    }
                }
                Matrix::Dense {
                    rows: rows.len(),
                    cols,
                    data,
                }
            }
            Method::Coo => {
                let mut row = Vec::new();
                let mut col = Vec::new();
                let mut data = Vec::new();
                for (i, &r) in rows.iter().enumerate() {
                    let (idx, vals) = dataset.row(r as usize);
                    row.extend(std::iter::repeat(i as u32).take(idx.len()));
                    col.extend_from_slice(idx);
                    data.extend_from_slice(vals);
                }
                Matrix::Coo {
                    rows: rows.len(),
                    cols,
                    row,
                    col,
                    data,
                }
            }
            Method::Csr => {
                let mut indptr = Vec::with_capacity(rows.len() + 1);
                let mut indices = Vec::new();
                let mut data = Vec::new();
                indptr.push(0);
                for &r in rows {
                    let (idx, vals) = dataset.row(r as usize);
                    indices.extend_from_slice(idx);
                    data.extend_from_slice(vals);
                    indptr.push(indices.len() as u64);
                }
                Matrix::Csr {
                    rows: rows.len(),
                    cols,
                    indptr,
                    indices,
                    data,
                }
            }
        }
    }

    /// Dense row-major copy.
    pub fn to_dense(&self) -> Vec<f32> {
        match self {
            Matrix::Dense { data, .. } => data.clone(),
            Matrix::Coo {
                rows,
                cols,
                row,
                col,
                data,
            } => {
                let mut out = vec![0f32; rows * cols];
                for ((&r, &c), &v) in row.iter().zip(col).zip(data) {
                    out[r as usize * cols + c as usize] = v;
                }
                out
            }
            Matrix::Csr {
                rows,
                cols,
                indptr,
                indices,
                data,
            } => {
                let mut out = vec![0f32; rows * cols];
                for r in 0..*rows {
                    let (lo, hi) = (indptr[r] as usize, indptr[r + 1] as usize);
                    for (&c, &v) in indices[lo..hi].iter().zip(&data[lo..hi]) {
                        out[r * cols + c as usize] = v;
                    }
                }
                out
            }
        }
    }
}

/// Batch payload: a matrix plus whether it has been moved to the device.
///
/// Loader batches start off-device; moving one densifies it into a fresh
/// contiguous buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    pub matrix: Matrix,
    pub resident: bool,
}

impl Payload for Tensor {
    fn shape(&self) -> (usize, usize) {
        self.matrix.shape()
    }

    fn is_resident(&self) -> bool {
        self.resident
    }

    fn make_resident(self) -> Self {
        let (rows, cols) = self.matrix.shape();
        let data = self.matrix.to_dense();
        Tensor {
            matrix: Matrix::Dense { rows, cols, data },
            resident: true,
        }
    }
}

/// How each batch is wrapped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchLayout {
    /// `{key: tensor}`
    Keyed(String),
    /// `[tensor, obs_ids]`
    Positional,
}

#[derive(Clone, Debug)]
pub struct LoaderConfig {
    pub method: Method,
    pub block_spec: BlockSpec,
    pub batch_size: u64,
    pub shuffle: Shuffle,
    pub seed: u64,
    pub layout: BatchLayout,
}

/// Order of row ids for one epoch.
pub fn epoch_order(n_rows: u64, spec: &BlockSpec, shuffle: Shuffle, seed: u64) -> Vec<u64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut order: Vec<u64> = (0..n_rows).collect();
    match shuffle {
        Shuffle::None => {}
        Shuffle::Global => order.shuffle(&mut rng),
        Shuffle::Chunk => {
            let chunk = spec.chunk_size() as usize;
            let mut chunks: Vec<&[u64]> = order.chunks(chunk).collect();
            chunks.shuffle(&mut rng);
            let mut shuffled = Vec::with_capacity(order.len());
            for block in chunks.chunks(spec.chunks_per_block() as usize) {
                let start = shuffled.len();
                for c in block {
                    shuffled.extend_from_slice(c);
                }
                shuffled[start..].shuffle(&mut rng);
            }
            order = shuffled;
        }
    }
    order
}

/// Iterator over the batches of one epoch.
pub struct DataLoader<'a> {
    dataset: &'a SparseDataset,
    config: LoaderConfig,
    order: Vec<u64>,
    cursor: usize,
}

impl<'a> DataLoader<'a> {
    pub fn new(dataset: &'a SparseDataset, config: LoaderConfig) -> Self {
        let order = epoch_order(dataset.n_rows, &config.block_spec, config.shuffle, config.seed);
        Self {
            dataset,
            config,
            order,
            cursor: 0,
        }
    }

    /// Total number of samples one pass yields.
    pub fn total_samples(&self) -> u64 {
        self.dataset.n_rows
    }

    fn next_batch(&mut self) -> Result<Option<LoaderBatch<Tensor>>, DatasetError> {
        if self.cursor >= self.order.len() {
            return Ok(None);
        }
        let end = (self.cursor + self.config.batch_size.max(1) as usize).min(self.order.len());
        let rows = &self.order[self.cursor..end];
        self.cursor = end;

        if let Some(&bad) = rows.iter().find(|&&r| r >= self.dataset.n_rows) {
            return Err(DatasetError::Corrupt(format!("row {bad} out of range")));
        }

        let matrix = Matrix::gather(self.dataset, rows, self.config.method);
        let tensor = Tensor {
            matrix,
            resident: false,
        };

        let batch = match &self.config.layout {
            BatchLayout::Keyed(key) => {
                let mut map = BTreeMap::new();
                map.insert(key.clone(), tensor);
                LoaderBatch::Keyed(map)
            }
            BatchLayout::Positional => {
                let obs_ids = rows.iter().map(|&r| r as f32).collect::<Vec<_>>();
                let obs = Tensor {
                    matrix: Matrix::Dense {
                        rows: rows.len(),
                        cols: 1,
                        data: obs_ids,
                    },
                    resident: true,
                };
                LoaderBatch::Positional(vec![tensor, obs])
            }
        };
        Ok(Some(batch))
    }
}

impl Iterator for DataLoader<'_> {
    type Item = Result<LoaderBatch<Tensor>, DatasetError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_batch().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{generate_dataset, GenerateConfig};

    fn dataset() -> SparseDataset {
        generate_dataset(&GenerateConfig {
            rows: 103,
            cols: 40,
            density: 0.2,
            seed: 3,
        })
    }

    fn config(method: Method, shuffle: Shuffle) -> LoaderConfig {
        LoaderConfig {
            method,
            block_spec: BlockSpec::make(Some(8), Some(4), None).unwrap(),
            batch_size: 10,
            shuffle,
            seed: 11,
            layout: BatchLayout::Keyed("x".to_string()),
        }
    }

    #[test]
    fn test_every_row_once_per_shuffle_mode() {
        for shuffle in [Shuffle::None, Shuffle::Chunk, Shuffle::Global] {
            let spec = BlockSpec::make(Some(8), Some(4), None).unwrap();
            let mut order = epoch_order(103, &spec, shuffle, 5);
            order.sort_unstable();
            assert_eq!(order, (0..103).collect::<Vec<_>>(), "{shuffle:?}");
        }
        let spec = BlockSpec::make(Some(8), Some(4), None).unwrap();
        assert_eq!(epoch_order(5, &spec, Shuffle::None, 0), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_chunk_shuffle_keeps_blocks_together() {
        let spec = BlockSpec::make(Some(4), Some(2), None).unwrap();
        let order = epoch_order(64, &spec, Shuffle::Chunk, 9);
        // Each block of 8 rows holds exactly two whole chunks.
        for block in order.chunks(8) {
            let mut chunk_ids: Vec<u64> = block.iter().map(|r| r / 4).collect();
            chunk_ids.sort_unstable();
            chunk_ids.dedup();
            assert_eq!(chunk_ids.len(), 2);
        }
    }

    #[test]
    fn test_batches_cover_dataset() {
        let ds = dataset();
        for method in Method::all() {
            let loader = DataLoader::new(&ds, config(method, Shuffle::Chunk));
            let mut rows = 0;
            let mut nnz = 0;
            let mut batches = 0;
            for batch in loader {
                let LoaderBatch::Keyed(mut map) = batch.unwrap() else {
                    panic!("expected keyed batch");
                };
                let tensor = map.remove("x").unwrap();
                rows += tensor.shape().0;
                assert_eq!(tensor.shape().1, 40);
                nnz += tensor.matrix.nnz();
                batches += 1;
            }
            assert_eq!(rows, 103, "{method}");
            assert_eq!(batches, 11);
            assert_eq!(nnz, ds.nnz(), "{method}");
        }
    }

    #[test]
    fn test_representations_agree_when_densified() {
        let ds = dataset();
        let rows = [5u64, 0, 77, 102];
        let dense = Matrix::gather(&ds, &rows, Method::Dense).to_dense();
        assert_eq!(Matrix::gather(&ds, &rows, Method::Coo).to_dense(), dense);
        assert_eq!(Matrix::gather(&ds, &rows, Method::Csr).to_dense(), dense);
    }

    #[test]
    fn test_make_resident_densifies_sparse() {
        let ds = dataset();
        let tensor = Tensor {
            matrix: Matrix::gather(&ds, &[1, 2], Method::Csr),
            resident: false,
        };
        assert!(!tensor.is_resident());
        let moved = tensor.make_resident();
        assert!(moved.is_resident());
        assert!(matches!(moved.matrix, Matrix::Dense { rows: 2, cols: 40, .. }));
    }

    #[test]
    fn test_positional_layout() {
        let ds = dataset();
        let cfg = LoaderConfig {
            layout: BatchLayout::Positional,
            ..config(Method::Dense, Shuffle::None)
        };
        let first = DataLoader::new(&ds, cfg).next().unwrap().unwrap();
        let LoaderBatch::Positional(items) = first else {
            panic!("expected positional batch");
        };
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].shape(), (10, 40));
        assert_eq!(&items[1].matrix.to_dense()[..3], &[0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_method_names() {
        assert_eq!("CSR".parse::<Method>().unwrap(), Method::Csr);
        assert_eq!("scipy.coo".parse::<Method>().unwrap(), Method::Coo);
        assert!(matches!(
            "arrow".parse::<Method>(),
            Err(Error::UnknownMethod(name)) if name == "arrow"
        ));
    }
}
