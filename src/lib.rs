pub mod block_spec;
pub mod dataset;
pub mod error;
pub mod harness;
pub mod host;
pub mod loader;
pub mod logging;
pub mod records;
pub mod schema;
pub mod store;

pub use block_spec::{parse_block_specs, BlockSpec};
pub use error::{BlockSpecError, EpochError, Error, Result};
pub use harness::{run_epoch, Batch, Epoch, EpochConfig};
pub use loader::Method;
pub use records::{to_record, to_records};
