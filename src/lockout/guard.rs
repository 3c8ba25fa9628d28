/// Host capability that vetoes exit, navigation and reload while an account is
/// locked. Advisory: the backend stays authoritative.
pub trait NavigationGuard: Send + Sync {
    /// Called on entering a lock, and again when a lock for another identity
    /// replaces it.
    fn engage(&self, username: &str);
    fn release(&self);
}

/// For hosts that cannot veto anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNavigationGuard;

impl NavigationGuard for NoopNavigationGuard {
    fn engage(&self, _username: &str) {}

    fn release(&self) {}
}
