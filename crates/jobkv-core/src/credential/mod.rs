mod munge;
pub use munge::MungeCredential;

mod password;
pub use password::PasswordCredential;

use async_trait::async_trait;

use crate::CoreError;

/// Random bytes in a generated keystore password.
pub const SECRET_BYTES: usize = 16;

/// Supplies the secret presented to the keystore.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Current credential.
    async fn credential(&self) -> Result<String, CoreError>;

    /// Credential to present after the store reported the current one as
    /// expired.
    async fn renew(&self) -> Result<String, CoreError> {
        self.credential().await
    }
}

/// Returns `true` if `candidate` has the shape of a generated password.
pub fn is_password_credential(candidate: &str) -> bool {
    candidate.len() == 2 * SECRET_BYTES && candidate.bytes().all(|b| b.is_ascii_hexdigit())
}
