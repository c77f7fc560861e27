use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::api::error::{DbErrorMeta, SystemError};
use crate::configs::RedisCache;
use crate::constants::PENDING_PAIR_CONSTRAINT;
use crate::modules::friend::model::{FriendRequestResponse, FriendResponse, IdOrInfo};
use crate::modules::friend::repository::{
    FriendRepo, FriendRequestRepository, FriendshipRepository,
};
use crate::modules::friend::schema::{FriendRequestEntity, FriendRequestStatus};
use crate::modules::friend::service::FriendService;
use crate::modules::user::model::{InsertUser, SignUpModel};
use crate::modules::user::repository::UserRepository;
use crate::modules::user::schema::UserEntity;
use crate::modules::user::service::UserService;
use crate::rate_limit::{RateLimitDecision, RateLimiter};
use crate::utils::verify_password;

fn new_id() -> Uuid {
    Uuid::new_v7(uuid::Timestamp::now(uuid::NoContext))
}

fn pending_pair_violation() -> SystemError {
    SystemError::ConstraintViolation(Some(DbErrorMeta {
        code: Some("23505".to_string()),
        constraint: Some(PENDING_PAIR_CONSTRAINT.to_string()),
        message: "duplicate key value violates unique constraint".to_string(),
    }))
}

#[derive(Default)]
struct MemoryUserRepo {
    users: Mutex<Vec<UserEntity>>,
}

impl MemoryUserRepo {
    fn add(&self, email: &str, display_name: &str) -> Uuid {
        let entity = UserEntity {
            id: new_id(),
            email: email.to_string(),
            hash_password: "unused".to_string(),
            display_name: display_name.to_string(),
            created_at: chrono::Utc::now(),
        };
        let id = entity.id;
        self.users.lock().unwrap().push(entity);
        id
    }

    fn get(&self, id: &Uuid) -> Option<UserEntity> {
        self.users.lock().unwrap().iter().find(|u| u.id == *id).cloned()
    }
}

#[async_trait::async_trait]
impl UserRepository for MemoryUserRepo {
    async fn find_by_id(&self, id: &Uuid) -> Result<Option<UserEntity>, SystemError> {
        Ok(self.get(id))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserEntity>, SystemError> {
        let users = self.users.lock().unwrap();
        Ok(users.iter().find(|u| u.email.eq_ignore_ascii_case(email)).cloned())
    }

    async fn create(&self, user: &InsertUser) -> Result<Uuid, SystemError> {
        let mut users = self.users.lock().unwrap();
        if users.iter().any(|u| u.email.eq_ignore_ascii_case(&user.email)) {
            return Err(SystemError::ConstraintViolation(Some(DbErrorMeta {
                code: Some("23505".to_string()),
                constraint: Some("users_email_key".to_string()),
                message: "duplicate key value violates unique constraint".to_string(),
            })));
        }
        let entity = UserEntity {
            id: new_id(),
            email: user.email.clone(),
            hash_password: user.hash_password.clone(),
            display_name: user.display_name.clone(),
            created_at: chrono::Utc::now(),
        };
        let id = entity.id;
        users.push(entity);
        Ok(id)
    }

    async fn find_all(&self, limit: i32) -> Result<Vec<UserEntity>, SystemError> {
        let mut users = self.users.lock().unwrap().clone();
        users.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        users.truncate(limit as usize);
        Ok(users)
    }

    async fn search_users(&self, query: &str, limit: i32) -> Result<Vec<UserEntity>, SystemError> {
        let needle = query.to_lowercase();
        let users = self.users.lock().unwrap();
        Ok(users
            .iter()
            .filter(|u| {
                u.display_name.to_lowercase().contains(&needle)
                    || u.email.to_lowercase().contains(&needle)
            })
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

struct MemoryFriendRepo {
    requests: Mutex<Vec<FriendRequestEntity>>,
    users: Arc<MemoryUserRepo>,
}

impl MemoryFriendRepo {
    fn new(users: Arc<MemoryUserRepo>) -> Self {
        Self { requests: Mutex::new(Vec::new()), users }
    }

    fn counterpart_info(&self, id: &Uuid) -> FriendResponse {
        let user = self.users.get(id).expect("user exists");
        FriendResponse::from(user)
    }

    fn to_response(&self, r: &FriendRequestEntity, viewer: &Uuid) -> FriendRequestResponse {
        let (from, to) = if r.from_user_id == *viewer {
            (IdOrInfo::Id(*viewer), IdOrInfo::Info(self.counterpart_info(&r.to_user_id)))
        } else {
            (IdOrInfo::Info(self.counterpart_info(&r.from_user_id)), IdOrInfo::Id(*viewer))
        };
        FriendRequestResponse { id: r.id, from, to, status: r.status, created_at: r.created_at }
    }
}

#[async_trait::async_trait]
impl FriendRequestRepository for MemoryFriendRepo {
    async fn create_request(
        &self,
        sender_id: &Uuid,
        recipient_id: &Uuid,
    ) -> Result<FriendRequestEntity, SystemError> {
        // One lock section: the duplicate check and the insert are atomic,
        // mirroring the partial unique index in Postgres.
        let mut requests = self.requests.lock().unwrap();

        let pair_taken = requests.iter().any(|r| {
            r.status == FriendRequestStatus::Pending
                && ((r.from_user_id == *sender_id && r.to_user_id == *recipient_id)
                    || (r.from_user_id == *recipient_id && r.to_user_id == *sender_id))
        });
        if pair_taken {
            return Err(pending_pair_violation());
        }

        let request = FriendRequestEntity {
            id: new_id(),
            from_user_id: *sender_id,
            to_user_id: *recipient_id,
            status: FriendRequestStatus::Pending,
            created_at: chrono::Utc::now(),
        };
        requests.push(request.clone());
        Ok(request)
    }

    async fn find_request_by_id(
        &self,
        request_id: &Uuid,
    ) -> Result<Option<FriendRequestEntity>, SystemError> {
        let requests = self.requests.lock().unwrap();
        Ok(requests.iter().find(|r| r.id == *request_id).cloned())
    }

    async fn update_status(
        &self,
        request_id: &Uuid,
        new_status: FriendRequestStatus,
    ) -> Result<(), SystemError> {
        let mut requests = self.requests.lock().unwrap();
        let Some(request) = requests.iter_mut().find(|r| r.id == *request_id) else {
            return Err(SystemError::not_found("Friend request not found"));
        };
        if request.status != FriendRequestStatus::Pending {
            return Err(SystemError::invalid_state("Friend request is already resolved"));
        }
        request.status = new_status;
        Ok(())
    }

    async fn find_requests_from_user(
        &self,
        user_id: &Uuid,
    ) -> Result<Vec<FriendRequestResponse>, SystemError> {
        let requests = self.requests.lock().unwrap().clone();
        Ok(requests
            .iter()
            .filter(|r| r.from_user_id == *user_id)
            .map(|r| self.to_response(r, user_id))
            .collect())
    }

    async fn find_requests_to_user(
        &self,
        user_id: &Uuid,
    ) -> Result<Vec<FriendRequestResponse>, SystemError> {
        let requests = self.requests.lock().unwrap().clone();
        Ok(requests
            .iter()
            .filter(|r| r.to_user_id == *user_id)
            .map(|r| self.to_response(r, user_id))
            .collect())
    }

    async fn find_pending_for(
        &self,
        recipient_id: &Uuid,
    ) -> Result<Vec<FriendRequestResponse>, SystemError> {
        let requests = self.requests.lock().unwrap().clone();
        Ok(requests
            .iter()
            .filter(|r| r.to_user_id == *recipient_id && r.status == FriendRequestStatus::Pending)
            .map(|r| self.to_response(r, recipient_id))
            .collect())
    }

    async fn delete_request(&self, request_id: &Uuid) -> Result<(), SystemError> {
        self.requests.lock().unwrap().retain(|r| r.id != *request_id);
        Ok(())
    }
}

#[async_trait::async_trait]
impl FriendshipRepository for MemoryFriendRepo {
    async fn find_accepted_between(
        &self,
        user_id_a: &Uuid,
        user_id_b: &Uuid,
    ) -> Result<Option<FriendRequestEntity>, SystemError> {
        let requests = self.requests.lock().unwrap();
        Ok(requests
            .iter()
            .find(|r| {
                r.status == FriendRequestStatus::Accepted
                    && ((r.from_user_id == *user_id_a && r.to_user_id == *user_id_b)
                        || (r.from_user_id == *user_id_b && r.to_user_id == *user_id_a))
            })
            .cloned())
    }

    async fn find_friends(&self, user_id: &Uuid) -> Result<Vec<FriendResponse>, SystemError> {
        let requests = self.requests.lock().unwrap().clone();
        let mut counterparts: Vec<Uuid> = requests
            .iter()
            .filter(|r| {
                r.status == FriendRequestStatus::Accepted
                    && (r.from_user_id == *user_id || r.to_user_id == *user_id)
            })
            .map(|r| if r.from_user_id == *user_id { r.to_user_id } else { r.from_user_id })
            .collect();
        counterparts.sort();
        counterparts.dedup();
        Ok(counterparts.iter().map(|id| self.counterpart_info(id)).collect())
    }
}

impl FriendRepo for MemoryFriendRepo {}

struct MemoryRateLimiter {
    limit: u32,
    counts: Mutex<HashMap<(Uuid, String), u32>>,
}

impl MemoryRateLimiter {
    fn new(limit: u32) -> Self {
        Self { limit, counts: Mutex::new(HashMap::new()) }
    }
}

#[async_trait::async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn check_and_consume(
        &self,
        user_id: &Uuid,
        action: &str,
    ) -> Result<RateLimitDecision, SystemError> {
        let mut counts = self.counts.lock().unwrap();
        let count = counts.entry((*user_id, action.to_string())).or_insert(0);
        *count += 1;
        if *count > self.limit {
            Ok(RateLimitDecision::Denied)
        } else {
            Ok(RateLimitDecision::Allowed)
        }
    }
}

type TestFriendService = FriendService<MemoryFriendRepo, MemoryUserRepo, MemoryRateLimiter>;

fn friend_harness() -> (TestFriendService, Arc<MemoryUserRepo>, Arc<MemoryFriendRepo>) {
    let users = Arc::new(MemoryUserRepo::default());
    let friends = Arc::new(MemoryFriendRepo::new(users.clone()));
    let limiter = Arc::new(MemoryRateLimiter::new(3));
    let service = FriendService::with_dependencies(friends.clone(), users.clone(), limiter);
    (service, users, friends)
}

fn user_service(repo: Arc<MemoryUserRepo>) -> UserService {
    // The pool is lazy; none of the paths under test touch Redis.
    let cache = Arc::new(RedisCache::new("redis://127.0.0.1:6379").expect("redis pool"));
    UserService::with_dependencies(repo, cache)
}

// ── Friend request creation ─────────────────────────────────────────────

#[tokio::test]
async fn send_request_to_self_is_rejected() {
    let (service, users, _) = friend_harness();
    let alice = users.add("alice@example.com", "Alice");

    let err = service.send_friend_request(alice, alice).await.unwrap_err();
    assert!(matches!(err, SystemError::InvalidTarget(_)));
}

#[tokio::test]
async fn duplicate_pending_request_is_rejected() {
    let (service, users, _) = friend_harness();
    let alice = users.add("alice@example.com", "Alice");
    let bob = users.add("bob@example.com", "Bob");

    service.send_friend_request(alice, bob).await.unwrap();
    let err = service.send_friend_request(alice, bob).await.unwrap_err();
    assert!(matches!(err, SystemError::DuplicateActive(_)));
}

#[tokio::test]
async fn reverse_direction_duplicate_is_rejected() {
    let (service, users, _) = friend_harness();
    let alice = users.add("alice@example.com", "Alice");
    let bob = users.add("bob@example.com", "Bob");

    service.send_friend_request(alice, bob).await.unwrap();
    let err = service.send_friend_request(bob, alice).await.unwrap_err();
    assert!(matches!(err, SystemError::DuplicateActive(_)));
}

#[tokio::test]
async fn concurrent_cross_requests_admit_exactly_one() {
    let (service, users, _) = friend_harness();
    let alice = users.add("alice@example.com", "Alice");
    let bob = users.add("bob@example.com", "Bob");

    let (first, second) = tokio::join!(
        service.send_friend_request(alice, bob),
        service.send_friend_request(bob, alice),
    );

    assert_eq!(first.is_ok() as u8 + second.is_ok() as u8, 1);
    let err = if first.is_err() { first.unwrap_err() } else { second.unwrap_err() };
    assert!(matches!(err, SystemError::DuplicateActive(_)));
}

#[tokio::test]
async fn store_reports_race_loser_as_constraint_violation() {
    let (_, users, friends) = friend_harness();
    let alice = users.add("alice@example.com", "Alice");
    let bob = users.add("bob@example.com", "Bob");

    friends.create_request(&alice, &bob).await.unwrap();
    let err = friends.create_request(&bob, &alice).await.unwrap_err();
    assert!(err.is_pending_pair_violation());
}

#[tokio::test]
async fn request_to_unknown_user_is_not_found() {
    let (service, users, _) = friend_harness();
    let alice = users.add("alice@example.com", "Alice");

    let err = service.send_friend_request(alice, new_id()).await.unwrap_err();
    assert!(matches!(err, SystemError::NotFound(_)));
}

#[tokio::test]
async fn rejected_request_does_not_block_a_new_one() {
    let (service, users, _) = friend_harness();
    let alice = users.add("alice@example.com", "Alice");
    let bob = users.add("bob@example.com", "Bob");

    let request = service.send_friend_request(alice, bob).await.unwrap();
    service.decline_friend_request(bob, request.id).await.unwrap();

    service.send_friend_request(alice, bob).await.unwrap();
}

// ── Rate limiting ───────────────────────────────────────────────────────

#[tokio::test]
async fn fourth_request_in_window_is_rate_limited() {
    let (service, users, _) = friend_harness();
    let alice = users.add("alice@example.com", "Alice");
    let bob = users.add("bob@example.com", "Bob");
    let carol = users.add("carol@example.com", "Carol");
    let dave = users.add("dave@example.com", "Dave");
    let erin = users.add("erin@example.com", "Erin");

    service.send_friend_request(alice, bob).await.unwrap();
    service.send_friend_request(alice, carol).await.unwrap();
    service.send_friend_request(alice, dave).await.unwrap();

    let err = service.send_friend_request(alice, erin).await.unwrap_err();
    assert!(matches!(err, SystemError::RateLimited(_)));
}

#[tokio::test]
async fn self_request_fails_the_same_way_with_quota_exhausted() {
    let (service, users, _) = friend_harness();
    let alice = users.add("alice@example.com", "Alice");
    let bob = users.add("bob@example.com", "Bob");
    let carol = users.add("carol@example.com", "Carol");
    let dave = users.add("dave@example.com", "Dave");

    service.send_friend_request(alice, bob).await.unwrap();
    service.send_friend_request(alice, carol).await.unwrap();
    service.send_friend_request(alice, dave).await.unwrap();

    let err = service.send_friend_request(alice, alice).await.unwrap_err();
    assert!(matches!(err, SystemError::InvalidTarget(_)));
}

// ── Accept / reject transitions ─────────────────────────────────────────

#[tokio::test]
async fn accepting_makes_friendship_symmetric() {
    let (service, users, _) = friend_harness();
    let alice = users.add("alice@example.com", "Alice");
    let bob = users.add("bob@example.com", "Bob");

    let request = service.send_friend_request(alice, bob).await.unwrap();
    let sender = service.accept_friend_request(bob, request.id).await.unwrap();
    assert_eq!(sender.id, alice);

    assert!(service.is_friend(alice, bob).await.unwrap());
    assert!(service.is_friend(bob, alice).await.unwrap());
}

#[tokio::test]
async fn resolved_request_cannot_be_resolved_again() {
    let (service, users, friends) = friend_harness();
    let alice = users.add("alice@example.com", "Alice");
    let bob = users.add("bob@example.com", "Bob");

    let request = service.send_friend_request(alice, bob).await.unwrap();
    service.accept_friend_request(bob, request.id).await.unwrap();

    let err = service.decline_friend_request(bob, request.id).await.unwrap_err();
    assert!(matches!(err, SystemError::InvalidState(_)));

    let stored = friends.find_request_by_id(&request.id).await.unwrap().unwrap();
    assert_eq!(stored.status, FriendRequestStatus::Accepted);
}

#[tokio::test]
async fn sender_cannot_resolve_own_request() {
    let (service, users, _) = friend_harness();
    let alice = users.add("alice@example.com", "Alice");
    let bob = users.add("bob@example.com", "Bob");

    let request = service.send_friend_request(alice, bob).await.unwrap();
    let err = service.accept_friend_request(alice, request.id).await.unwrap_err();
    assert!(matches!(err, SystemError::Forbidden(_)));
}

#[tokio::test]
async fn ownership_is_checked_before_state() {
    let (service, users, _) = friend_harness();
    let alice = users.add("alice@example.com", "Alice");
    let bob = users.add("bob@example.com", "Bob");

    let request = service.send_friend_request(alice, bob).await.unwrap();
    service.accept_friend_request(bob, request.id).await.unwrap();

    // Already resolved, but the wrong actor still sees Forbidden.
    let err = service.decline_friend_request(alice, request.id).await.unwrap_err();
    assert!(matches!(err, SystemError::Forbidden(_)));
}

#[tokio::test]
async fn resolving_missing_request_is_not_found() {
    let (service, users, _) = friend_harness();
    let bob = users.add("bob@example.com", "Bob");

    let err = service.accept_friend_request(bob, new_id()).await.unwrap_err();
    assert!(matches!(err, SystemError::NotFound(_)));
}

// ── Derived views ───────────────────────────────────────────────────────

#[tokio::test]
async fn friends_list_contains_only_accepted_counterparts() {
    let (service, users, _) = friend_harness();
    let alice = users.add("alice@example.com", "Alice");
    let bob = users.add("bob@example.com", "Bob");
    let carol = users.add("carol@example.com", "Carol");
    let dave = users.add("dave@example.com", "Dave");
    let erin = users.add("erin@example.com", "Erin");

    let to_bob = service.send_friend_request(alice, bob).await.unwrap();
    service.accept_friend_request(bob, to_bob.id).await.unwrap();
    let from_carol = service.send_friend_request(carol, alice).await.unwrap();
    service.accept_friend_request(alice, from_carol.id).await.unwrap();
    let to_dave = service.send_friend_request(alice, dave).await.unwrap();
    service.decline_friend_request(dave, to_dave.id).await.unwrap();
    service.send_friend_request(erin, alice).await.unwrap();

    let mut friend_ids: Vec<Uuid> =
        service.get_friends(alice).await.unwrap().iter().map(|f| f.id).collect();
    friend_ids.sort();

    let mut expected = vec![bob, carol];
    expected.sort();
    assert_eq!(friend_ids, expected);
}

#[tokio::test]
async fn pending_list_is_incoming_only() {
    let (service, users, _) = friend_harness();
    let alice = users.add("alice@example.com", "Alice");
    let bob = users.add("bob@example.com", "Bob");
    let carol = users.add("carol@example.com", "Carol");
    let dave = users.add("dave@example.com", "Dave");

    service.send_friend_request(alice, bob).await.unwrap();
    service.send_friend_request(carol, bob).await.unwrap();
    service.send_friend_request(bob, dave).await.unwrap();

    let pending = service.get_pending_requests(bob).await.unwrap();
    assert_eq!(pending.len(), 2);
    for request in &pending {
        assert_eq!(request.status, FriendRequestStatus::Pending);
        assert!(matches!(request.to, IdOrInfo::Id(id) if id == bob));
    }
}

#[tokio::test]
async fn request_listing_covers_both_directions() {
    let (service, users, _) = friend_harness();
    let alice = users.add("alice@example.com", "Alice");
    let bob = users.add("bob@example.com", "Bob");
    let carol = users.add("carol@example.com", "Carol");

    service.send_friend_request(alice, bob).await.unwrap();
    service.send_friend_request(carol, alice).await.unwrap();

    let requests = service.get_friend_requests(alice).await.unwrap();
    assert_eq!(requests.len(), 2);
}

#[tokio::test]
async fn removal_requires_involvement() {
    let (service, users, friends) = friend_harness();
    let alice = users.add("alice@example.com", "Alice");
    let bob = users.add("bob@example.com", "Bob");
    let carol = users.add("carol@example.com", "Carol");

    let request = service.send_friend_request(alice, bob).await.unwrap();

    let err = service.remove_request(carol, request.id).await.unwrap_err();
    assert!(matches!(err, SystemError::Forbidden(_)));

    service.remove_request(bob, request.id).await.unwrap();
    assert!(friends.find_request_by_id(&request.id).await.unwrap().is_none());
}

// ── User search ─────────────────────────────────────────────────────────

#[tokio::test]
async fn empty_search_returns_nothing() {
    let users = Arc::new(MemoryUserRepo::default());
    users.add("alice@example.com", "Alice");
    let service = user_service(users);

    assert!(service.search(None).await.unwrap().is_empty());
    assert!(service.search(Some("")).await.unwrap().is_empty());
    assert!(service.search(Some("   ")).await.unwrap().is_empty());
}

#[tokio::test]
async fn exact_email_match_wins_over_substring_matches() {
    let users = Arc::new(MemoryUserRepo::default());
    let alice = users.add("alice@example.com", "Alice");
    users.add("carol@example.com", "alice@example.com admirer");
    let service = user_service(users);

    let found = service.search(Some("alice@example.com")).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, alice);
}

#[tokio::test]
async fn search_unions_name_and_email_matches() {
    let users = Arc::new(MemoryUserRepo::default());
    let alice = users.add("alice@example.com", "Alice");
    let malin = users.add("malin@example.com", "Malin");
    users.add("dave@example.com", "Dave");
    let service = user_service(users);

    let mut found_ids: Vec<Uuid> =
        service.search(Some("ali")).await.unwrap().iter().map(|u| u.id).collect();
    found_ids.sort();

    // Alice by display name, Malin by email; each exactly once.
    let mut expected = vec![alice, malin];
    expected.sort();
    assert_eq!(found_ids, expected);
}

#[tokio::test]
async fn search_is_case_insensitive() {
    let users = Arc::new(MemoryUserRepo::default());
    let alice = users.add("alice@example.com", "Alice");
    let service = user_service(users);

    let exact = service.search(Some("ALICE@EXAMPLE.COM")).await.unwrap();
    assert_eq!(exact.len(), 1);
    assert_eq!(exact[0].id, alice);

    let partial = service.search(Some("aLiC")).await.unwrap();
    assert_eq!(partial.len(), 1);
    assert_eq!(partial[0].id, alice);
}

// ── Signup ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn signup_stores_a_verifiable_password_hash() {
    let users = Arc::new(MemoryUserRepo::default());
    let service = user_service(users.clone());

    let id = service
        .sign_up(SignUpModel {
            email: "alice@example.com".to_string(),
            password: "hunter22".to_string(),
            display_name: "Alice".to_string(),
        })
        .await
        .unwrap();

    let stored = users.get(&id).unwrap();
    assert_ne!(stored.hash_password, "hunter22");
    assert!(verify_password(&stored.hash_password, "hunter22").unwrap());
}

#[tokio::test]
async fn signup_with_taken_email_is_a_constraint_violation() {
    let users = Arc::new(MemoryUserRepo::default());
    users.add("alice@example.com", "Alice");
    let service = user_service(users);

    let err = service
        .sign_up(SignUpModel {
            email: "Alice@Example.com".to_string(),
            password: "hunter22".to_string(),
            display_name: "Other Alice".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SystemError::ConstraintViolation(_)));
}
