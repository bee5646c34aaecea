//! Identity provider seam.
//!
//! The session never issues credentials; it asks whoever owns the signed-in
//! user for the id to authenticate with.

/// Supplies the user id used in the authentication handshake.
#[cfg_attr(test, mockall::automock)]
pub trait IdentityProvider: Send + Sync {
    /// The current user id, or `None` when nobody is signed in.
    fn current_user_id(&self) -> Option<String>;
}

/// A fixed identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StaticIdentity(String);

impl StaticIdentity {
    /// Wrap a user id.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self(user_id.into())
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user_id(&self) -> Option<String> {
        Some(self.0.clone())
    }
}
