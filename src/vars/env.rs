//! `env:<NAME>` provider

use super::{VarContext, VarProvider};
use async_trait::async_trait;

/// Reads process environment variables
///
/// Always reports the variable as found; unset variables expand to nothing.
pub struct EnvProvider;

#[async_trait]
impl VarProvider for EnvProvider {
    async fn query(&self, _prefix: &str, reference: &str, _ctx: &VarContext<'_>) -> Option<String> {
        Some(std::env::var(reference).unwrap_or_default())
    }
}
