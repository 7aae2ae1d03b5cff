//! Canon Core - Fundamental types
//!
//! This crate defines the types shared by every Canon crate:
//! - Identities (Author)
//! - Ordering keys (Revision)
//! - Plain values, primary keys and key patterns
//! - The replicated call tuple
//! - Errors

pub mod author;
pub mod call;
pub mod error;
pub mod revision;
pub mod value;

pub use author::*;
pub use call::*;
pub use error::*;
pub use revision::*;
pub use value::*;
