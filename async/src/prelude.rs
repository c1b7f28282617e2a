//! Prelude for the async readers and writers.
//!
//! This includes all the imports from [`hearth_utils::prelude`].
//! It also imports async-related [`std`] items and the common [`tokio`] items.

pub use hearth_utils as utils;
pub use hearth_utils::prelude::*;
pub use std::time::Duration;
pub use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
pub use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter, ReadBuf};
