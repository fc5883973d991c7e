//! Key coercion.
//!
//! Every store keeps a flat string namespace. Non-string keys are coerced
//! to their string form before reaching a driver, so `0` and `"0"` name the
//! same entry.

use log::warn;

/// Anything usable as a store key.
pub trait IntoStoreKey {
    /// The key's string form.
    fn into_store_key(self) -> String;

    /// Whether the key already was a string, no coercion involved.
    fn is_string_key(&self) -> bool {
        false
    }
}

impl IntoStoreKey for &str {
    fn into_store_key(self) -> String {
        self.to_string()
    }

    fn is_string_key(&self) -> bool {
        true
    }
}

impl IntoStoreKey for String {
    fn into_store_key(self) -> String {
        self
    }

    fn is_string_key(&self) -> bool {
        true
    }
}

impl IntoStoreKey for &String {
    fn into_store_key(self) -> String {
        self.clone()
    }

    fn is_string_key(&self) -> bool {
        true
    }
}

macro_rules! display_key {
    ($($ty:ty),*) => {
        $(
            impl IntoStoreKey for $ty {
                fn into_store_key(self) -> String {
                    self.to_string()
                }
            }
        )*
    };
}

display_key!(i8, i16, i32, i64, u8, u16, u32, u64, usize, isize, f32, f64, bool, char);

impl<T: IntoStoreKey> IntoStoreKey for Option<T> {
    fn into_store_key(self) -> String {
        match self {
            Some(key) => key.into_store_key(),
            None => "null".to_string(),
        }
    }

    fn is_string_key(&self) -> bool {
        self.as_ref().is_some_and(IntoStoreKey::is_string_key)
    }
}

impl IntoStoreKey for () {
    fn into_store_key(self) -> String {
        "undefined".to_string()
    }
}

/// Coerce `key`, warning when it was not already a string.
pub fn normalize_key<K: IntoStoreKey>(key: K) -> String {
    let coerced = !key.is_string_key();
    let key = key.into_store_key();
    if coerced {
        warn!("{key} used as a key, but it is not a string.");
    }
    key
}
