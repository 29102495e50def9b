mod error;

pub(crate) mod proto;

pub use self::error::Error;
