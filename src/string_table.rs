/// A SHELF string table: NUL-terminated strings, starting with a NUL byte
/// so that offset 0 resolves to the empty name.
#[derive(Default)]
#[cfg_attr(test, derive(PartialEq, Eq, Debug))]
pub struct StringTable(Vec<u8>);

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a string and return its offset, reusing an existing
    /// occurrence when the table already contains it.
    pub fn insert(&mut self, string: &str) -> u32 {
        if let Some(offset) = self.get_offset(string) {
            return offset;
        }
        if self.0.is_empty() {
            // String tables always start with a NUL byte.
            self.0.push(0);
        }
        let offset = self.0.len() as u32;
        self.0.extend_from_slice(string.as_bytes());
        self.0.push(0);
        offset
    }

    pub fn get_offset(&self, string: &str) -> Option<u32> {
        let mut needle = string.as_bytes().to_vec();
        needle.push(0);
        if self.0.len() < needle.len() {
            return None;
        }
        self.0
            .windows(needle.len())
            .position(|window| window == needle)
            .map(|offset| offset as u32)
    }

    /// The string starting at `offset`, or `None` when the offset is out
    /// of bounds or the bytes up to the next NUL are not UTF-8.
    pub fn get(&self, offset: u32) -> Option<&str> {
        let bytes = self.0.get(offset as usize..)?;
        let end = bytes.iter().position(|b| *b == 0)?;
        std::str::from_utf8(&bytes[..end]).ok()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for StringTable {
    fn from(strings: Vec<u8>) -> Self {
        Self(strings)
    }
}

impl AsRef<[u8]> for StringTable {
    fn as_ref(&self) -> &[u8] {
        &self.0[..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_offset() {
        assert_eq!(
            Some(0),
            StringTable(b"hello\0".to_vec()).get_offset("hello")
        );
        assert_eq!(
            Some(1),
            StringTable(b"\0hello\0".to_vec()).get_offset("hello")
        );
        assert_eq!(
            Some(7),
            StringTable(b"\0first\0hello\0".to_vec()).get_offset("hello")
        );
        assert_eq!(None, StringTable(b"".to_vec()).get_offset("hello"));
        assert_eq!(None, StringTable(b"".to_vec()).get_offset(""));
        assert_eq!(Some(0), StringTable(b"\0123".to_vec()).get_offset(""));
    }

    #[test]
    fn test_insert_dedups() {
        let mut table = StringTable::new();
        let text = table.insert(".text");
        let data = table.insert(".data");
        assert_ne!(text, data);
        assert_eq!(text, table.insert(".text"));
        assert_eq!(Some(".text"), table.get(text));
        assert_eq!(Some(".data"), table.get(data));
    }

    #[test]
    fn test_empty_name() {
        let mut table = StringTable::new();
        let offset = table.insert("");
        assert_eq!(Some(""), table.get(offset));
    }

    #[test]
    fn test_symmetry() {
        let mut table = StringTable::new();
        for name in ["", ".text", ".rela.text", ".symtab", "x"] {
            let offset = table.insert(name);
            assert_eq!(Some(name), table.get(offset));
        }
    }
}
