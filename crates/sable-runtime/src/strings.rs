//! Mutable string runtime over the managed arena.
//!
//! Immutable strings are plain NUL-terminated payloads produced by
//! [`ManagedArena::strdup`]. Mutable strings keep their length and capacity
//! in a [`MutString`] descriptor rather than in hidden metadata before the
//! payload, so telling the two apart is a type-level question instead of a
//! memory probe. Append grows through handle reassignment, which keeps the
//! arena's live/dead accounting exact.

use crate::arena::ManagedArena;
use crate::handle::Handle;

/// A string value as generated code sees it: either a raw NUL-terminated
/// payload or a mutable builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrValue {
    /// Immutable NUL-terminated payload.
    Immutable(Handle),
    /// Mutable builder with tracked length and capacity.
    Mutable(MutString),
}

/// A mutable string: a handle to `cap + 1` bytes plus tracked length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutString {
    handle: Handle,
    len: usize,
    cap: usize,
}

impl MutString {
    /// Create an empty mutable string with room for `cap` bytes.
    pub fn with_capacity(arena: &ManagedArena, cap: usize) -> Option<MutString> {
        let cap = cap.max(1);
        let handle = arena.alloc(Handle::NULL, cap + 1);
        if handle.is_null() {
            return None;
        }
        let mut lease = arena.lease(handle)?;
        lease.write(&[0]);
        drop(lease);
        Some(MutString {
            handle,
            len: 0,
            cap,
        })
    }

    /// Create a mutable string holding a copy of `s`, with headroom for
    /// appends.
    pub fn from_str(arena: &ManagedArena, s: &str) -> Option<MutString> {
        let cap = if s.len() < 16 { 32 } else { s.len() * 2 };
        let mut m = Self::with_capacity(arena, cap)?;
        if !m.append(arena, s) {
            return None;
        }
        Some(m)
    }

    /// Ensure a string value is mutable.
    ///
    /// A mutable input is returned unchanged, so the operation is
    /// idempotent. An immutable payload is copied into a fresh builder; a
    /// null handle becomes an empty builder.
    pub fn ensure_mutable(arena: &ManagedArena, value: StrValue) -> Option<MutString> {
        match value {
            StrValue::Mutable(m) => Some(m),
            StrValue::Immutable(h) if h.is_null() => Self::with_capacity(arena, 32),
            StrValue::Immutable(h) => {
                let s = read_str(arena, h)?;
                Self::from_str(arena, &s)
            }
        }
    }

    /// Append `s`, growing (2x) through handle reassignment when capacity
    /// runs out. Returns false on allocation failure.
    pub fn append(&mut self, arena: &ManagedArena, s: &str) -> bool {
        let needed = self.len + s.len();
        if needed > self.cap {
            let new_cap = (self.cap * 2).max(needed);
            let current = match arena.read_payload(self.handle) {
                Some(bytes) => bytes,
                None => return false,
            };
            let new_handle = arena.alloc(self.handle, new_cap + 1);
            if new_handle.is_null() {
                return false;
            }
            let Some(mut lease) = arena.lease(new_handle) else {
                return false;
            };
            lease.write(&current[..self.len]);
            drop(lease);
            self.handle = new_handle;
            self.cap = new_cap;
        }
        let Some(mut lease) = arena.lease(self.handle) else {
            return false;
        };
        lease.write_at(self.len, s.as_bytes());
        lease.write_at(self.len + s.len(), &[0]);
        self.len += s.len();
        true
    }

    /// The underlying handle.
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Current length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Remaining capacity before the next growth.
    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Copy the contents out as an owned `String`.
    pub fn to_string(&self, arena: &ManagedArena) -> Option<String> {
        let lease = arena.lease(self.handle)?;
        let bytes = &lease.bytes()[..self.len];
        Some(String::from_utf8_lossy(bytes).into_owned())
    }
}

/// Read a NUL-terminated string payload.
pub fn read_str(arena: &ManagedArena, h: Handle) -> Option<String> {
    let lease = arena.lease(h)?;
    Some(String::from_utf8_lossy(lease.c_str()).into_owned())
}

/// Concatenate two strings into a fresh immutable payload.
pub fn str_concat(arena: &ManagedArena, a: &str, b: &str) -> Handle {
    let mut joined = String::with_capacity(a.len() + b.len());
    joined.push_str(a);
    joined.push_str(b);
    arena.strdup(Handle::NULL, &joined)
}

/// Split `s` by `delimiter` into string handles.
///
/// An empty delimiter splits into individual characters; an empty input with
/// an empty delimiter yields no parts.
pub fn str_split(arena: &ManagedArena, s: &str, delimiter: &str) -> Vec<Handle> {
    if delimiter.is_empty() {
        return s
            .chars()
            .map(|c| arena.strdup(Handle::NULL, &c.to_string()))
            .collect();
    }
    s.split(delimiter)
        .map(|part| arena.strdup(Handle::NULL, part))
        .collect()
}

/// Split with a limit: at most `limit` parts, the last carrying the
/// unsplit remainder. A non-positive limit behaves like [`str_split`].
pub fn str_split_n(arena: &ManagedArena, s: &str, delimiter: &str, limit: i64) -> Vec<Handle> {
    if limit <= 0 || delimiter.is_empty() {
        return str_split(arena, s, delimiter);
    }
    s.splitn(limit as usize, delimiter)
        .map(|part| arena.strdup(Handle::NULL, part))
        .collect()
}

/// Join string handles with `delimiter` into a fresh payload.
pub fn str_join(arena: &ManagedArena, parts: &[Handle], delimiter: &str) -> Handle {
    let mut joined = String::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            joined.push_str(delimiter);
        }
        if let Some(s) = read_str(arena, *part) {
            joined.push_str(&s);
        }
    }
    arena.strdup(Handle::NULL, &joined)
}
