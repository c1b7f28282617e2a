//! Commonly used types and re-exports.
pub use bytes::{Bytes, BytesMut};
pub use compact_str::{format_compact, CompactString, ToCompactString};
pub use ::http::{
    self, header, header::HeaderName, HeaderMap, HeaderValue, Method, StatusCode, Version,
};
pub use std::collections::HashMap;
pub use std::fmt::{self, Debug, Display, Formatter};
pub use std::io::{self, Write};
pub use std::str;

pub use crate::*;
