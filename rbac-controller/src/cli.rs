use crate::db;
use anyhow::Result;
use clap::Parser;

#[derive(Debug, Parser)]
#[clap(name = "rbac", about = "Kargo RBAC controller")]
pub struct Args {
    #[clap(
        long,
        default_value = "kargo=info,warn",
        env = "KARGO_RBAC_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    /// The namespace holding global-scope roles and identities.
    #[clap(long, default_value = "kargo", env = "KARGO_SYSTEM_NAMESPACE")]
    system_namespace: String,
}

// === impl Args ===

impl Args {
    /// Returns a [`kubert::Runtime`] configured by the CLI arguments.
    pub async fn runtime(&self) -> Result<kubert::Runtime> {
        kubert::Runtime::builder()
            .with_log(self.log_level.clone(), self.log_format.clone())
            .with_client(self.client.clone())
            .build()
            .await
            .map_err(Into::into)
    }

    pub fn settings(&self) -> db::Settings {
        db::Settings {
            system_namespace: self.system_namespace.clone(),
        }
    }
}
