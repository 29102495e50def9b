pub(crate) mod codec;
pub(crate) mod decode;
pub(crate) mod dispatcher;
pub(crate) mod encode;
