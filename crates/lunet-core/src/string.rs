/// String interning for identifiers, constants and runtime strings.
///
/// Every string is deduplicated, so two `StringId`s compare equal exactly
/// when their contents do. Strings are never freed.
use std::collections::HashMap;
use std::fmt;

/// An opaque handle to a string in the interner.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct StringId(pub u32);

impl fmt::Display for StringId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Lua-style string hash (luaS_hash stepping).
pub fn lua_hash(bytes: &[u8]) -> u32 {
    let len = bytes.len();
    let mut h = len as u32;
    // Long strings only sample every `step`-th byte.
    let step = (len >> 5) + 1;
    let mut i = len;
    while i >= step {
        h ^= (h << 5).wrapping_add(h >> 2).wrapping_add(bytes[i - 1] as u32);
        i -= step;
    }
    h
}

/// Owns all strings and hands out stable ids.
#[derive(Debug, Default)]
pub struct StringInterner {
    strings: Vec<Box<[u8]>>,
    /// hash -> ids with that hash
    lookup: HashMap<u32, Vec<u32>>,
}

impl StringInterner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `bytes`, returning the existing id if already present.
    pub fn intern(&mut self, bytes: &[u8]) -> StringId {
        let hash = lua_hash(bytes);
        if let Some(ids) = self.lookup.get(&hash) {
            for &id in ids {
                if &*self.strings[id as usize] == bytes {
                    return StringId(id);
                }
            }
        }
        let id = self.strings.len() as u32;
        self.strings.push(bytes.into());
        self.lookup.entry(hash).or_default().push(id);
        StringId(id)
    }

    /// Look up `bytes` without interning.
    pub fn find(&self, bytes: &[u8]) -> Option<StringId> {
        let ids = self.lookup.get(&lua_hash(bytes))?;
        ids.iter()
            .copied()
            .find(|&id| &*self.strings[id as usize] == bytes)
            .map(StringId)
    }

    pub fn get_bytes(&self, id: StringId) -> &[u8] {
        &self.strings[id.0 as usize]
    }

    /// Lossy UTF-8 view, for messages and disassembly.
    pub fn display(&self, id: StringId) -> String {
        String::from_utf8_lossy(self.get_bytes(id)).into_owned()
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}
