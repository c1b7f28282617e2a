//! ## **The Hearth Prelude**
//!
//! The purpose of this module is to *simplify*, *make modules dependencies obvious*,
//! and *keep consistency* in the development of the *Hearth engine*.
//!
//! Other niche preludes can be found as submodules, including
//! * a networking prelude
//! * a internal prelude
//! * and a threading prelude

// External commonly used dependencies
pub use bytes::{Bytes, BytesMut};
pub use compact_str::{format_compact, CompactString, ToCompactString};
pub use ::http;
pub use ::http::{
    header, header::HeaderName, HeaderMap, HeaderValue, Method, StatusCode, Version,
};
pub use log::*;
pub use mime::Mime;
pub use ::mime_guess;
pub use std::cmp;
pub use std::collections::HashMap;
pub use std::fmt::{self, Debug, Display, Formatter};
pub use std::io::{self, Write};
pub use std::net::{self, IpAddr, SocketAddr};
pub use std::path::{Path, PathBuf};
pub use std::str;
pub use std::sync::{self, Arc};
pub use std::time::Duration;
pub use std::{future::Future, pin::Pin};
pub use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub use hearth_async as async_bits;
pub use hearth_utils as utils;
pub use utils::{chars, parse};

// Modules
pub use crate::answer;
pub use crate::encryption;
pub use crate::error::{self};
pub use crate::files;
pub use crate::limiting;
pub use crate::render;
pub use crate::request;
pub use crate::result;
pub use crate::routing;
pub use crate::session;
pub use crate::shutdown;

// Crate types
pub use crate::*;
pub use answer::Answer;
pub use error::{Error, ErrorKind};
pub use render::Format;
pub use request::Request;
pub use result::{Layout, ResultBuilder, Row, Value};
pub use routing::{Access, Context, Hooks, Reply, RetFut, Route, Routes};
pub use session::{MemoryStore, Session, SessionMode, SessionStore, SourceCheck};

/// ## **The Hearth *Networking* Prelude**
///
/// The purpose of this module is to expose Tokio network types used in Hearth.
pub mod networking {
    pub use tokio::net::{TcpListener, TcpStream};
}

/// ## **The Hearth *Internal* Prelude**
///
/// The purpose of this module is to expose the commonly used internals of Hearth.
///
/// **This is not intended to be user-facing and may change rapidly**
pub mod internals {
    pub use super::async_bits::read::{Reader, Section};
    pub use super::encryption::Encryption;
    pub use super::limiting::{Firewall, FirewallEntry};
    pub use super::routing::Dispatcher;
    pub use super::session::Sessions;
}

/// ## **The Hearth *Threading* Prelude**
///
/// The purpose of this module is to expose common threading types.
pub mod threading {
    pub use std::sync::atomic::{self, Ordering};
    pub use tokio::task::{spawn, spawn_blocking};
}
