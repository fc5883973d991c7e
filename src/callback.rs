//! Callback adapter for store operations.
//!
//! Every [`KvStore`](crate::KvStore) operation is a future resolving to a
//! [`KvResult`]. Callers that also want a completion callback attach one
//! with [`CallbackExt::with_callback`]; the callback sees the settled result
//! and the future still yields it, so both channels observe the same outcome.
//!
//! # Examples
//!
//! ```
//! use netabase_kv::{CallbackExt, Environment, KvStore};
//!
//! # tokio_test_block_on(async {
//! let store = KvStore::new(Environment::temp());
//! let mut seen = None;
//! let value = store
//!     .set_item("office", "Initech")
//!     .with_callback(|result| seen = result.as_ref().ok().cloned())
//!     .await
//!     .unwrap();
//! assert_eq!(seen, Some(value));
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Runtime::new().unwrap().block_on(f)
//! # }
//! ```

use std::future::Future;

use futures::FutureExt;
use futures::future::Inspect;

use crate::errors::KvResult;

pub trait CallbackExt<T>: Future<Output = KvResult<T>> + Sized {
    /// Invoke `callback` with the settled result, then yield that same result.
    fn with_callback<C>(self, callback: C) -> Inspect<Self, C>
    where
        C: FnOnce(&KvResult<T>),
    {
        self.inspect(callback)
    }
}

impl<T, Fut> CallbackExt<T> for Fut where Fut: Future<Output = KvResult<T>> {}
