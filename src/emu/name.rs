//! Process-wide string interning for device, signal and event identifiers.

use std::fmt;
use std::sync::{Mutex, OnceLock};

use rustc_hash::FxHashMap;

#[derive(Default)]
struct Interner {
    ids: FxHashMap<&'static str, u32>,
    names: Vec<&'static str>,
}

impl Interner {
    fn intern(&mut self, s: &str) -> u32 {
        if let Some(&id) = self.ids.get(s) {
            return id;
        }
        // Interned strings live for the whole process; leaking keeps lookups borrow-free.
        let leaked: &'static str = Box::leak(s.to_owned().into_boxed_str());
        let id = self.names.len() as u32;
        self.names.push(leaked);
        self.ids.insert(leaked, id);
        id
    }
}

fn interner() -> &'static Mutex<Interner> {
    static INTERNER: OnceLock<Mutex<Interner>> = OnceLock::new();
    INTERNER.get_or_init(|| Mutex::new(Interner::default()))
}

/// An interned string. Comparison, ordering and hashing only look at the integer id.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Name(u32);

impl Name {
    /// Interns `s`, returning the same [`Name`] for every equal string.
    pub fn new(s: &str) -> Self {
        let mut table = interner().lock().unwrap_or_else(|e| e.into_inner());
        Self(table.intern(s))
    }

    pub fn as_str(self) -> &'static str {
        let table = interner().lock().unwrap_or_else(|e| e.into_inner());
        table.names[self.0 as usize]
    }

    pub fn id(self) -> u32 {
        self.0
    }
}

impl From<&str> for Name {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({:?})", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_string_same_name() {
        let a = Name::new("cpu");
        let b = Name::from("cpu");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "cpu");
        assert_ne!(a, Name::new("ram"));
    }

    #[test]
    fn test_display() {
        assert_eq!(Name::new("video").to_string(), "video");
    }
}
