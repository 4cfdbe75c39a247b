//! Store schema probe, served through the status cache.

use std::sync::Arc;

use tether_core::dto::status::StoreStatus;

use super::status_cache::{ProbeError, StatusCache};
use crate::repository::Store;

const CACHE_KEY: &str = "store-schema";

pub async fn store_status(
    store: &dyn Store,
    cache: &Arc<StatusCache<StoreStatus>>,
) -> Result<StoreStatus, ProbeError> {
    cache
        .get(CACHE_KEY, || async {
            store
                .schema_status()
                .await
                .map_err(|e| ProbeError::new(e.to_string()))
        })
        .await
}
