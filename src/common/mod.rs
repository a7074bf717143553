mod frame;

pub(crate) use frame::*;
