use uuid::Uuid;

use crate::{
    api::error,
    modules::friend::{
        model::{FriendRequestResponse, FriendResponse, FriendUserRow, IdOrInfo},
        repository::{FriendRepo, FriendRequestRepository, FriendshipRepository},
        schema::{FriendRequestEntity, FriendRequestStatus},
    },
};

#[derive(Clone)]
pub struct FriendRepositoryPg {
    pool: sqlx::PgPool,
}

impl FriendRepositoryPg {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    async fn insert_request(
        &self,
        id: &Uuid,
        sender_id: &Uuid,
        recipient_id: &Uuid,
    ) -> Result<FriendRequestEntity, sqlx::Error> {
        // ON CONFLICT (id) DO NOTHING makes the statement idempotent under a
        // retry with the same pre-generated id; the pending-pair index still
        // raises its own unique violation.
        let inserted = sqlx::query_as::<_, FriendRequestEntity>(
            r#"
            INSERT INTO friend_requests (id, from_user_id, to_user_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(sender_id)
        .bind(recipient_id)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(request) => Ok(request),
            // The first attempt landed after all; fetch what it wrote.
            None => {
                sqlx::query_as::<_, FriendRequestEntity>(
                    "SELECT * FROM friend_requests WHERE id = $1",
                )
                .bind(id)
                .fetch_one(&self.pool)
                .await
            }
        }
    }
}

fn is_transient(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut)
}

#[async_trait::async_trait]
impl FriendRequestRepository for FriendRepositoryPg {
    async fn create_request(
        &self,
        sender_id: &Uuid,
        recipient_id: &Uuid,
    ) -> Result<FriendRequestEntity, error::SystemError> {
        let id = Uuid::new_v7(uuid::Timestamp::now(uuid::NoContext));

        match self.insert_request(&id, sender_id, recipient_id).await {
            Ok(request) => Ok(request),
            Err(err) if is_transient(&err) => {
                log::warn!("transient error inserting friend request {id}, retrying once: {err:?}");
                Ok(self.insert_request(&id, sender_id, recipient_id).await?)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn find_request_by_id(
        &self,
        request_id: &Uuid,
    ) -> Result<Option<FriendRequestEntity>, error::SystemError> {
        let request =
            sqlx::query_as::<_, FriendRequestEntity>("SELECT * FROM friend_requests WHERE id = $1")
                .bind(request_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(request)
    }

    async fn update_status(
        &self,
        request_id: &Uuid,
        new_status: FriendRequestStatus,
    ) -> Result<(), error::SystemError> {
        let updated = sqlx::query(
            "UPDATE friend_requests SET status = $2 WHERE id = $1 AND status = 'pending'",
        )
        .bind(request_id)
        .bind(new_status)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 1 {
            return Ok(());
        }

        // Zero rows: either the id never existed or another caller resolved
        // the request first.
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM friend_requests WHERE id = $1)",
        )
        .bind(request_id)
        .fetch_one(&self.pool)
        .await?;

        if exists {
            Err(error::SystemError::invalid_state("Friend request is already resolved"))
        } else {
            Err(error::SystemError::not_found("Friend request not found"))
        }
    }

    async fn find_requests_from_user(
        &self,
        user_id: &Uuid,
    ) -> Result<Vec<FriendRequestResponse>, error::SystemError> {
        let rows = sqlx::query_as::<_, FriendUserRow>(
            r#"
            SELECT
                fr.id AS req_id,
                u.id AS user_id,
                u.email,
                u.display_name,
                fr.status,
                fr.created_at
            FROM friend_requests fr
            JOIN users u
                ON fr.to_user_id = u.id
            WHERE fr.from_user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| FriendRequestResponse {
                id: r.req_id,
                from: IdOrInfo::Id(*user_id),
                to: IdOrInfo::Info(FriendResponse {
                    id: r.user_id,
                    email: r.email,
                    display_name: r.display_name,
                }),
                status: r.status,
                created_at: r.created_at,
            })
            .collect())
    }

    async fn find_requests_to_user(
        &self,
        user_id: &Uuid,
    ) -> Result<Vec<FriendRequestResponse>, error::SystemError> {
        let rows = sqlx::query_as::<_, FriendUserRow>(
            r#"
            SELECT
                fr.id AS req_id,
                u.id AS user_id,
                u.email,
                u.display_name,
                fr.status,
                fr.created_at
            FROM friend_requests fr
            JOIN users u
                ON fr.from_user_id = u.id
            WHERE fr.to_user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| FriendRequestResponse {
                id: r.req_id,
                from: IdOrInfo::Info(FriendResponse {
                    id: r.user_id,
                    email: r.email,
                    display_name: r.display_name,
                }),
                to: IdOrInfo::Id(*user_id),
                status: r.status,
                created_at: r.created_at,
            })
            .collect())
    }

    async fn find_pending_for(
        &self,
        recipient_id: &Uuid,
    ) -> Result<Vec<FriendRequestResponse>, error::SystemError> {
        let rows = sqlx::query_as::<_, FriendUserRow>(
            r#"
            SELECT
                fr.id AS req_id,
                u.id AS user_id,
                u.email,
                u.display_name,
                fr.status,
                fr.created_at
            FROM friend_requests fr
            JOIN users u
                ON fr.from_user_id = u.id
            WHERE fr.to_user_id = $1
              AND fr.status = 'pending'
            "#,
        )
        .bind(recipient_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| FriendRequestResponse {
                id: r.req_id,
                from: IdOrInfo::Info(FriendResponse {
                    id: r.user_id,
                    email: r.email,
                    display_name: r.display_name,
                }),
                to: IdOrInfo::Id(*recipient_id),
                status: r.status,
                created_at: r.created_at,
            })
            .collect())
    }

    async fn delete_request(&self, request_id: &Uuid) -> Result<(), error::SystemError> {
        sqlx::query("DELETE FROM friend_requests WHERE id = $1")
            .bind(request_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl FriendshipRepository for FriendRepositoryPg {
    async fn find_accepted_between(
        &self,
        user_id_a: &Uuid,
        user_id_b: &Uuid,
    ) -> Result<Option<FriendRequestEntity>, error::SystemError> {
        let request = sqlx::query_as::<_, FriendRequestEntity>(
            r#"
            SELECT *
            FROM friend_requests
            WHERE status = 'accepted'
              AND (
                  (from_user_id = $1 AND to_user_id = $2)
               OR (from_user_id = $2 AND to_user_id = $1)
              )
            LIMIT 1
            "#,
        )
        .bind(user_id_a)
        .bind(user_id_b)
        .fetch_optional(&self.pool)
        .await?;

        Ok(request)
    }

    async fn find_friends(
        &self,
        user_id: &Uuid,
    ) -> Result<Vec<FriendResponse>, error::SystemError> {
        // DISTINCT because both directions between a pair may have been
        // accepted at different points in time.
        let friends = sqlx::query_as::<_, FriendResponse>(
            r#"
            SELECT DISTINCT
                u.id,
                u.email,
                u.display_name
            FROM friend_requests fr
            JOIN users u
                ON u.id = CASE
                    WHEN fr.from_user_id = $1 THEN fr.to_user_id
                    ELSE fr.from_user_id
                END
            WHERE fr.status = 'accepted'
              AND (fr.from_user_id = $1 OR fr.to_user_id = $1)
            ORDER BY u.id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(friends)
    }
}

impl FriendRepo for FriendRepositoryPg {}
