//! Repository modules for database operations

pub mod defaults;
pub mod summaries;
pub mod tracking;

use crate::{Error, Result};

/// Stored integers are signed; counts and ids never are
pub(crate) fn to_u64(value: i64, what: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| Error::InvalidData(format!("negative {}: {}", what, value)))
}

pub(crate) fn to_i64(value: u64, what: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| Error::InvalidData(format!("{} out of range: {}", what, value)))
}
