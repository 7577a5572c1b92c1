use crate::db::{Store, StoreConfig};

use crate::admin::error::{AdminError, Result};

/// Opens the store described by `config` for an admin command.
///
/// Unlike [`Store::open`], a missing file is an error rather than a
/// prompt to create one.
pub fn open_store(config: &StoreConfig) -> Result<Store> {
    if !config.path.exists() {
        return Err(AdminError::missing_store(&config.path));
    }
    Ok(Store::open(config.clone())?)
}
