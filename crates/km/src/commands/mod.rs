//! CLI command implementations.

pub(crate) mod encode;
pub(crate) mod render;
pub(crate) mod session;
pub(crate) mod watch;

pub(crate) use encode::EncodeArgs;
pub(crate) use render::RenderArgs;
pub(crate) use watch::WatchArgs;
