/// Rate-limiter action key for friend-request creation.
pub const CREATE_FRIEND_REQUEST: &str = "create_friend_request";

/// Name of the partial unique index that admits at most one pending
/// friend request per unordered user pair (see migrations).
pub const PENDING_PAIR_CONSTRAINT: &str = "friend_requests_pending_pair_idx";

pub struct Env {
    pub jwt_secret: String,
    pub access_token_expiration: u64,
    pub refresh_token_expiration: u64,
    pub database_url: String,
    pub redis_url: String,
    pub frontend_url: String,
    pub ip: String,
    pub port: u16,
    pub friend_request_rate_limit: u32,
    pub friend_request_rate_window: u64,
}

impl Env {
    fn new() -> Self {
        let jwt_secret = std::env::var("SECRET_KEY")
            .expect("SECRET_KEY must be set in .env file or environment variable");

        let access_token_expiration = std::env::var("ACCESS_TOKEN_EXPIRATION")
            .unwrap_or_else(|_| "900".to_string())
            .parse::<u64>()
            .expect("ACCESS_TOKEN_EXPIRATION must be a valid u64 integer");
        let refresh_token_expiration = std::env::var("REFRESH_TOKEN_EXPIRATION")
            .unwrap_or_else(|_| "604800".to_string())
            .parse::<u64>()
            .expect("REFRESH_TOKEN_EXPIRATION must be a valid u64 integer");

        let database_url = std::env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set in .env file or environment variable");
        let redis_url = std::env::var("REDIS_URL")
            .expect("REDIS_URL must be set in .env file or environment variable");

        let frontend_url =
            std::env::var("FRONTEND_URL").unwrap_or_else(|_| "http://localhost:5173".to_string());
        let ip = std::env::var("IP").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse::<u16>()
            .expect("PORT must be a valid u16 integer");

        let friend_request_rate_limit = std::env::var("FRIEND_REQUEST_RATE_LIMIT")
            .unwrap_or_else(|_| "3".to_string())
            .parse::<u32>()
            .expect("FRIEND_REQUEST_RATE_LIMIT must be a valid u32 integer");
        let friend_request_rate_window = std::env::var("FRIEND_REQUEST_RATE_WINDOW")
            .unwrap_or_else(|_| "60".to_string())
            .parse::<u64>()
            .expect("FRIEND_REQUEST_RATE_WINDOW must be a valid u64 integer");

        Env {
            jwt_secret,
            access_token_expiration,
            refresh_token_expiration,
            database_url,
            redis_url,
            frontend_url,
            ip,
            port,
            friend_request_rate_limit,
            friend_request_rate_window,
        }
    }
}

impl Default for Env {
    fn default() -> Self {
        Self::new()
    }
}
