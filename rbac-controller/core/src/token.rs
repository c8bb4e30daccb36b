use kargo_rbac_k8s_api::Time;

/// The placeholder substituted for token material on every read and list
/// path. Full material is visible only in the synchronous response to the
/// creation call.
pub const REDACTED_TOKEN: &str = "*** REDACTED ***";

/// A bearer credential issued for a role or bare identity. Backed by a
/// service-account token Secret whose material is populated asynchronously by
/// the cluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiToken {
    pub name: String,
    pub namespace: String,
    /// The owning identity. Deleting it cascades deletion of the token.
    pub service_account: String,
    pub token: String,
    pub creation_timestamp: Option<Time>,
}

impl ApiToken {
    pub fn is_redacted(&self) -> bool {
        self.token == REDACTED_TOKEN
    }
}
