use lotsync_core::UserId;

/// Acting user for a request, as asserted by the upstream gateway.
///
/// Present on every route except `/health`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ActorContext {
    user_id: UserId,
}

impl ActorContext {
    pub fn new(user_id: UserId) -> Self {
        Self { user_id }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }
}
