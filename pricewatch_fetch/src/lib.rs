mod errors;
mod fetcher;
mod proxy;
pub mod user_agent;
pub use self::errors::FetchError;
pub use self::fetcher::{FetchConfig, FetchStats, FetchStatsSummary, Fetcher, RawPage};
pub use self::proxy::{ProxyConfig, ProxyIdentity, ProxyPool, MAX_PROXY_SESSIONS};
pub use url::Url;
