pub mod api;

use anyhow::Result;

use crate::config::StoreConfig;

pub async fn start(port: u16, config: StoreConfig) -> Result<()> {
    api::serve(port, config).await
}
