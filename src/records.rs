//! Flattening epochs into table rows.

use serde_json::Value;

use crate::harness::Epoch;
use crate::schema::{Metadata, Row};

/// One row per epoch: epoch columns, then every metadata column.
///
/// `epoch` is the index of each epoch within `epochs`. Metadata keys that
/// collide with epoch columns take precedence.
pub fn to_records<'a, I>(epochs: I, metadata: &Metadata) -> Vec<Row>
where
    I: IntoIterator<Item = &'a Epoch>,
{
    epochs
        .into_iter()
        .enumerate()
        .map(|(idx, epoch)| to_record(idx as u64, epoch, metadata))
        .collect()
}

/// The row for epoch number `index`, when each epoch carries its own metadata.
pub fn to_record(index: u64, epoch: &Epoch, metadata: &Metadata) -> Row {
    let mut row = Row::new();
    row.insert("epoch".into(), Value::from(index));
    row.insert("n_rows".into(), Value::from(epoch.total_rows));
    row.insert("n_cols".into(), Value::from(epoch.col_count));
    row.insert("n_batches".into(), Value::from(epoch.batches.len() as u64));
    row.insert("elapsed".into(), Value::from(epoch.total_elapsed.as_secs_f64()));
    row.insert("gc".into(), Value::from(epoch.total_gc.as_secs_f64()));
    for (k, v) in metadata {
        row.insert(k.clone(), v.clone());
    }
    row
}
