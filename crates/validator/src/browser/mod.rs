//! Browser supervision and Chrome DevTools Protocol plumbing.

pub mod cdp;
pub mod session;

pub use cdp::CdpClient;
pub use session::SessionManager;
