pub(crate) mod connector;
pub(crate) mod stream;
