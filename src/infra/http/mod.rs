//! HTTP surfaces: the public club API and the loopback admin API.

mod admin;
mod club;
mod middleware;
mod public;

pub use admin::{AdminState, build_admin_router};
pub use club::{
    EVENTS_ROUTE, INVENTORY_ROUTE, MEMBERS_ROUTE, build_club_router, warming_descriptors,
};
pub use middleware::RequestContext;
pub use public::{HealthReport, HttpState, build_router};
