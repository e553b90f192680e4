pub(crate) mod fallback;
pub(crate) mod health;
pub(crate) mod meta;
pub(crate) mod migrate;
pub(crate) mod recover;
pub(crate) mod shared;
pub(crate) mod sync;

pub(crate) use shared::OutputFormat;
