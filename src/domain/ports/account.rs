//! Current account contract.

/// Exposes the identity of the account this process runs as.
#[cfg_attr(test, mockall::automock)]
pub trait AccountService: Send + Sync {
    /// Identity of the current account.
    fn current_identity(&self) -> String;
}
