#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use kargo_rbac_controller::{Args, Databases, RoleScope};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let settings = args.settings();
    let runtime = args.runtime().await?;

    let databases = Databases::new(runtime.client(), settings);

    // Surface cluster connectivity or permission problems at startup rather
    // than on the first request.
    let system_roles = databases.roles.list_names(&RoleScope::Global).await?;
    info!(system_roles = system_roles.len(), "rbac controller ready");

    runtime.run().await?;
    Ok(())
}
