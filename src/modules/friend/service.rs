use std::sync::Arc;

use uuid::Uuid;

use crate::{
    api::error,
    constants::CREATE_FRIEND_REQUEST,
    modules::{
        friend::{
            model::{FriendRequestResponse, FriendResponse},
            repository::FriendRepo,
            schema::{FriendRequestEntity, FriendRequestStatus},
        },
        user::repository::UserRepository,
    },
    rate_limit::{RateLimitDecision, RateLimiter},
};

/// Friend-request workflow engine. All collaborators arrive through the
/// constructor; the engine itself holds no state.
#[derive(Clone)]
pub struct FriendService<R, U, L>
where
    R: FriendRepo + Send + Sync,
    U: UserRepository + Send + Sync,
    L: RateLimiter + Send + Sync,
{
    friend_repo: Arc<R>,
    user_repo: Arc<U>,
    rate_limiter: Arc<L>,
}

impl<R, U, L> FriendService<R, U, L>
where
    R: FriendRepo + Send + Sync,
    U: UserRepository + Send + Sync,
    L: RateLimiter + Send + Sync,
{
    pub fn with_dependencies(friend_repo: Arc<R>, user_repo: Arc<U>, rate_limiter: Arc<L>) -> Self {
        FriendService { friend_repo, user_repo, rate_limiter }
    }

    pub async fn send_friend_request(
        &self,
        sender_id: Uuid,
        recipient_id: Uuid,
    ) -> Result<FriendRequestEntity, error::SystemError> {
        // Self-requests fail before any quota is consumed.
        if recipient_id == sender_id {
            return Err(error::SystemError::invalid_target(
                "Cannot send a friend request to yourself",
            ));
        }

        let decision =
            self.rate_limiter.check_and_consume(&sender_id, CREATE_FRIEND_REQUEST).await?;
        if decision == RateLimitDecision::Denied {
            return Err(error::SystemError::rate_limited(
                "Too many friend requests, try again later",
            ));
        }

        if self.user_repo.find_by_id(&recipient_id).await?.is_none() {
            return Err(error::SystemError::not_found("Recipient user not found"));
        }

        // The duplicate check lives inside the insert: the store's
        // pending-pair constraint decides atomically, so two concurrent
        // creations can never both pass.
        match self.friend_repo.create_request(&sender_id, &recipient_id).await {
            Ok(request) => Ok(request),
            Err(err) if err.is_pending_pair_violation() => Err(error::SystemError::duplicate_active(
                "A pending friend request already exists between these users",
            )),
            Err(err) => Err(err),
        }
    }

    pub async fn accept_friend_request(
        &self,
        user_id: Uuid,
        request_id: Uuid,
    ) -> Result<FriendResponse, error::SystemError> {
        let request = self.resolve(request_id, user_id, FriendRequestStatus::Accepted).await?;

        let from_user = self
            .user_repo
            .find_by_id(&request.from_user_id)
            .await?
            .ok_or_else(|| error::SystemError::not_found("User not found"))?;

        Ok(FriendResponse::from(from_user))
    }

    pub async fn decline_friend_request(
        &self,
        user_id: Uuid,
        request_id: Uuid,
    ) -> Result<(), error::SystemError> {
        self.resolve(request_id, user_id, FriendRequestStatus::Rejected).await?;
        Ok(())
    }

    /// The one transition accept and decline share, so their guards can
    /// never diverge. Ownership is checked before state: the wrong actor
    /// gets Forbidden even when the request is already resolved.
    async fn resolve(
        &self,
        request_id: Uuid,
        acting_user_id: Uuid,
        target: FriendRequestStatus,
    ) -> Result<FriendRequestEntity, error::SystemError> {
        let request = self
            .friend_repo
            .find_request_by_id(&request_id)
            .await?
            .ok_or_else(|| error::SystemError::not_found("Friend request not found"))?;

        if request.to_user_id != acting_user_id {
            return Err(error::SystemError::forbidden(
                "You are not allowed to resolve this friend request",
            ));
        }

        // Compare-and-set out of pending; the loser of a concurrent
        // accept/reject race observes InvalidState.
        self.friend_repo.update_status(&request_id, target).await?;

        Ok(request)
    }

    pub async fn is_friend(
        &self,
        user_id: Uuid,
        friend_id: Uuid,
    ) -> Result<bool, error::SystemError> {
        let friendship = self.friend_repo.find_accepted_between(&user_id, &friend_id).await?;
        Ok(friendship.is_some())
    }

    pub async fn get_friends(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<FriendResponse>, error::SystemError> {
        let friends = self.friend_repo.find_friends(&user_id).await?;
        Ok(friends)
    }

    pub async fn get_pending_requests(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<FriendRequestResponse>, error::SystemError> {
        self.friend_repo.find_pending_for(&user_id).await
    }

    pub async fn get_friend_requests(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<FriendRequestResponse>, error::SystemError> {
        let (requests_to, requests_from) = tokio::try_join!(
            self.friend_repo.find_requests_to_user(&user_id),
            self.friend_repo.find_requests_from_user(&user_id),
        )?;

        let mut all = Vec::with_capacity(requests_to.len() + requests_from.len());
        all.extend(requests_to);
        all.extend(requests_from);
        Ok(all)
    }

    /// Administrative removal, outside the normal workflow. Only the two
    /// involved users may remove a request record.
    pub async fn remove_request(
        &self,
        user_id: Uuid,
        request_id: Uuid,
    ) -> Result<(), error::SystemError> {
        let request = self
            .friend_repo
            .find_request_by_id(&request_id)
            .await?
            .ok_or_else(|| error::SystemError::not_found("Friend request not found"))?;

        if request.from_user_id != user_id && request.to_user_id != user_id {
            return Err(error::SystemError::forbidden(
                "You are not allowed to remove this friend request",
            ));
        }

        self.friend_repo.delete_request(&request_id).await
    }
}
