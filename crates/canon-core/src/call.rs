//! The replicated call tuple
//!
//! Transports only ever carry `(Revision, Key, Method, Value)`; entity
//! references inside `arg` have already been replaced by primary keys.

use crate::{Key, Revision, Value};

/// Index of an impulse in its entity kind's dispatch table
pub type Method = u8;

/// One replicated impulse call as it travels between peers
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Call {
    pub revision: Revision,
    pub key: Key,
    pub method: Method,
    pub arg: Value,
}

impl Call {
    pub fn new(revision: Revision, key: Key, method: Method, arg: Value) -> Self {
        Call {
            revision,
            key,
            method,
            arg,
        }
    }
}
