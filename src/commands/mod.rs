pub(crate) mod config;
pub(crate) mod health;
pub(crate) mod install;
pub(crate) mod locate;
pub(crate) mod port;
pub(crate) mod secret;
pub(crate) mod start;
