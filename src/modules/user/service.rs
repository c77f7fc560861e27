use log::info;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::error;
use crate::configs::RedisCache;
use crate::ENV;

use crate::modules::user::model::{InsertUser, SignInModel, SignUpModel, UserResponse};
use crate::modules::user::repository::UserRepository;
use crate::utils::{hash_password, verify_password, Claims, TypeClaims};

const SEARCH_LIMIT: i32 = 20;
const DIRECTORY_LIMIT: i32 = 50;

#[derive(Clone)]
pub struct UserService {
    repo: Arc<dyn UserRepository + Send + Sync>,
    cache: Arc<RedisCache>,
}

impl UserService {
    pub fn with_dependencies(
        repo: Arc<dyn UserRepository + Send + Sync>,
        cache: Arc<RedisCache>,
    ) -> Self {
        info!("UserService initialized with dependencies");
        UserService { repo, cache }
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<UserResponse, error::SystemError> {
        let key = format!("user:{}", id);
        if let Some(cached_user) = self.cache.get::<UserResponse>(&key).await? {
            info!("User {} found in cache", id);
            return Ok(cached_user);
        }
        let user_entity = self.repo.find_by_id(&id).await?;
        if let Some(entity) = user_entity {
            self.cache.set(&key, &UserResponse::from(entity.clone()), 3600).await?;
            info!("User {} cached", id);
            Ok(UserResponse::from(entity))
        } else {
            Err(error::SystemError::not_found("User not found"))
        }
    }

    pub async fn sign_up(&self, user: SignUpModel) -> Result<uuid::Uuid, error::SystemError> {
        let hash_password = hash_password(&user.password)?;

        let new_user = InsertUser {
            email: user.email,
            hash_password,
            display_name: user.display_name,
        };

        let user_id = self.repo.create(&new_user).await?;
        Ok(user_id)
    }

    pub async fn sign_in(&self, user: SignInModel) -> Result<(String, String), error::SystemError> {
        let user_entity = self
            .repo
            .find_by_email(&user.email)
            .await?
            .ok_or_else(|| error::SystemError::unauthorized("Invalid email or password"))?;

        let valid = verify_password(&user_entity.hash_password, &user.password)?;
        if !valid {
            return Err(error::SystemError::unauthorized("Invalid email or password"));
        }

        self.issue_tokens(&user_entity.id).await
    }

    pub async fn sign_out(&self, refresh_token: Option<String>) -> Result<(), error::SystemError> {
        let Some(token) = refresh_token else {
            return Ok(());
        };

        // Best effort: an expired or mangled cookie still clears fine client-side.
        let Ok(claims) = Claims::decode(&token, ENV.jwt_secret.as_ref()) else {
            return Ok(());
        };

        if let Some(jti) = claims.jti {
            self.cache.delete(&format!("refresh_token:{jti}")).await?;
        }

        Ok(())
    }

    pub async fn refresh(
        &self,
        refresh_token: Option<String>,
    ) -> Result<(String, String), error::SystemError> {
        let token = refresh_token
            .ok_or_else(|| error::SystemError::unauthorized("Refresh token missing"))?;

        let claims = Claims::decode(&token, ENV.jwt_secret.as_ref())
            .map_err(|_| error::SystemError::unauthorized("Refresh token invalid or expired"))?;

        if claims._type != TypeClaims::RefreshToken {
            return Err(error::SystemError::unauthorized("Refresh token invalid or expired"));
        }

        let jti = claims
            .jti
            .ok_or_else(|| error::SystemError::unauthorized("Refresh token invalid or expired"))?;

        let key = format!("refresh_token:{jti}");
        let stored: Option<Uuid> = self.cache.get(&key).await?;
        if stored != Some(claims.sub) {
            return Err(error::SystemError::unauthorized("Refresh token revoked"));
        }

        // Rotate: the old jti dies with this call.
        self.cache.delete(&key).await?;
        self.issue_tokens(&claims.sub).await
    }

    /// Search policy, applied in order:
    /// 1. empty or absent query returns nothing, never the full directory;
    /// 2. a case-insensitive exact email match returns exactly that user;
    /// 3. otherwise the union of display-name and email substring matches.
    pub async fn search(
        &self,
        query: Option<&str>,
    ) -> Result<Vec<UserResponse>, error::SystemError> {
        let Some(q) = query.map(str::trim).filter(|q| !q.is_empty()) else {
            return Ok(Vec::new());
        };

        if let Some(user) = self.repo.find_by_email(q).await? {
            return Ok(vec![UserResponse::from(user)]);
        }

        let users = self.repo.search_users(q, SEARCH_LIMIT).await?;
        Ok(users.into_iter().map(UserResponse::from).collect())
    }

    pub async fn list_users(&self) -> Result<Vec<UserResponse>, error::SystemError> {
        let users = self.repo.find_all(DIRECTORY_LIMIT).await?;
        Ok(users.into_iter().map(UserResponse::from).collect())
    }

    async fn issue_tokens(&self, user_id: &Uuid) -> Result<(String, String), error::SystemError> {
        let access_token = Claims::new(user_id, TypeClaims::AccessToken, ENV.access_token_expiration)
            .encode(ENV.jwt_secret.as_ref())?;

        let jti = Uuid::new_v7(uuid::Timestamp::now(uuid::NoContext));

        let refresh_token =
            Claims::new(user_id, TypeClaims::RefreshToken, ENV.refresh_token_expiration)
                .with_jti(jti)
                .encode(ENV.jwt_secret.as_ref())?;

        let refresh_key = format!("refresh_token:{jti}");
        self.cache
            .set(&refresh_key, user_id, ENV.refresh_token_expiration as usize)
            .await?;

        Ok((access_token, refresh_token))
    }
}
