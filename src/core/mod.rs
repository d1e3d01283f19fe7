pub mod balancer;
pub mod gateway;
pub mod rate_limiter;
pub mod upstream;

pub use gateway::GatewayService;
pub use rate_limiter::{LimitInfo, RateLimiter};
pub use upstream::{UpstreamGroup, parse_service_path};
