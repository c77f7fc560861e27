use uuid::Uuid;

use crate::api::error;
use crate::modules::friend::model::{FriendRequestResponse, FriendResponse};
use crate::modules::friend::schema::{FriendRequestEntity, FriendRequestStatus};

/// Durable store for friend-request records. Guarantees the uniqueness
/// invariant: at most one pending request per unordered user pair, enforced
/// atomically with the insert, never as a separate check.
#[async_trait::async_trait]
pub trait FriendRequestRepository {
    /// Inserts a new pending request. Violating the pending-pair invariant
    /// yields `ConstraintViolation` carrying the constraint name.
    async fn create_request(
        &self,
        sender_id: &Uuid,
        recipient_id: &Uuid,
    ) -> Result<FriendRequestEntity, error::SystemError>;

    async fn find_request_by_id(
        &self,
        request_id: &Uuid,
    ) -> Result<Option<FriendRequestEntity>, error::SystemError>;

    /// Compare-and-set transition out of pending. Fails with `InvalidState`
    /// when the record exists but is already resolved, `NotFound` when it
    /// does not exist.
    async fn update_status(
        &self,
        request_id: &Uuid,
        new_status: FriendRequestStatus,
    ) -> Result<(), error::SystemError>;

    async fn find_requests_from_user(
        &self,
        user_id: &Uuid,
    ) -> Result<Vec<FriendRequestResponse>, error::SystemError>;

    async fn find_requests_to_user(
        &self,
        user_id: &Uuid,
    ) -> Result<Vec<FriendRequestResponse>, error::SystemError>;

    async fn find_pending_for(
        &self,
        recipient_id: &Uuid,
    ) -> Result<Vec<FriendRequestResponse>, error::SystemError>;

    /// Physical delete. Not part of the workflow; only the removal endpoint
    /// uses it.
    async fn delete_request(&self, request_id: &Uuid) -> Result<(), error::SystemError>;
}

/// Derived friendship views. Friendships are never stored; they are read
/// straight off the accepted requests.
#[async_trait::async_trait]
pub trait FriendshipRepository {
    async fn find_accepted_between(
        &self,
        user_id_a: &Uuid,
        user_id_b: &Uuid,
    ) -> Result<Option<FriendRequestEntity>, error::SystemError>;

    async fn find_friends(&self, user_id: &Uuid)
    -> Result<Vec<FriendResponse>, error::SystemError>;
}

pub trait FriendRepo: FriendRequestRepository + FriendshipRepository + Send + Sync {}
