use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

/// Variable lookup used during expansion. `None` expands to an empty string.
pub type EnvLookup<'a> = dyn Fn(&str) -> Option<String> + 'a;

/// Recursive visitor that expands `$NAME` / `${NAME}` references in the
/// string leaves of a configuration structure.
///
/// Structs get an implementation from `#[derive(ExpandEnv)]`, which visits
/// every field. `String` expands in place and `Option<T>` forwards to its
/// content. Every other leaf is left alone: the provided method is a no-op,
/// so scalars, sequences and maps implement the trait without expanding.
pub trait ExpandEnv {
    fn expand_env(&mut self, _env: &EnvLookup<'_>) {}
}

impl ExpandEnv for String {
    fn expand_env(&mut self, env: &EnvLookup<'_>) {
        if self.contains('$') {
            *self = expand_str(self, env);
        }
    }
}

impl<T: ExpandEnv> ExpandEnv for Option<T> {
    fn expand_env(&mut self, env: &EnvLookup<'_>) {
        if let Some(inner) = self {
            inner.expand_env(env);
        }
    }
}

impl<T: ExpandEnv + ?Sized> ExpandEnv for Box<T> {
    fn expand_env(&mut self, env: &EnvLookup<'_>) {
        (**self).expand_env(env);
    }
}

macro_rules! leave_unexpanded {
    ($($ty:ty),* $(,)?) => {
        $(impl ExpandEnv for $ty {})*
    };
}

leave_unexpanded!(
    bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64,
    PathBuf,
);

impl<T> ExpandEnv for Vec<T> {}
impl<K, V, S> ExpandEnv for HashMap<K, V, S> {}
impl<K, V> ExpandEnv for BTreeMap<K, V> {}

static REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\$(?:\{(?P<braced>[^}]*)\}|(?P<open>\{)|(?P<special>[*#$@!?\-0-9])|(?P<name>[A-Za-z_][A-Za-z0-9_]*))",
    )
    .expect("variable reference pattern is valid")
});

/// Expand variable references in `input`.
///
/// `${NAME}` and `$NAME` (letters, digits, underscore) look up `NAME`.
/// A single special character after `$` (`$1`, `$$`, `$?`) is a name of
/// its own. `${}` and an unterminated `${` are dropped. A `$` followed by
/// anything else, or at the end of the input, stays as written.
pub fn expand_str(input: &str, env: &EnvLookup<'_>) -> String {
    REFERENCE
        .replace_all(input, |caps: &Captures<'_>| {
            let name = caps
                .name("braced")
                .or_else(|| caps.name("special"))
                .or_else(|| caps.name("name"))
                .map(|m| m.as_str())
                .unwrap_or_default();
            if name.is_empty() {
                return String::new();
            }
            env(name).unwrap_or_default()
        })
        .into_owned()
}
