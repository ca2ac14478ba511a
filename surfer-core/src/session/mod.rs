mod backend;
mod http;
mod multiplexer;
mod normalize;

pub use backend::{BrowserBackend, BrowserPage};
pub use http::{HttpBackend, HttpPage, DEFAULT_USER_AGENT};
pub use multiplexer::{NavigationEvent, SessionHandle, SessionMultiplexer};
pub use normalize::{normalize_user_agent, PageHygiene};
