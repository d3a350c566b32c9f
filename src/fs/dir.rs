//! Directory records.
//!
//! Block 0 of a directory inode stores a whitespace-separated textual record:
//! the directory's own inode number and name, then one `inum name` pair per
//! entry. Names therefore must be non-empty and free of whitespace.

use super::Inum;

/// One directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub inum: Inum,
    pub name: String,
}

/// A decoded directory record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct DirRecord {
    pub inum: Inum,
    pub name: String,
    pub entries: Vec<DirEntry>,
}

/// The stored bytes do not parse as a directory record.
#[derive(Debug, PartialEq, Eq)]
pub(super) struct MalformedRecord;

/// Whether `name` can live in a record without breaking the field framing.
pub(super) fn valid_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(char::is_whitespace)
}

impl DirRecord {
    pub fn new(inum: Inum, name: impl Into<String>) -> Self {
        Self { inum, name: name.into(), entries: Vec::new() }
    }

    pub fn parse(raw: &[u8]) -> Result<Self, MalformedRecord> {
        let text = std::str::from_utf8(raw).map_err(|_| MalformedRecord)?;
        let mut fields = text.split_whitespace();

        let inum = fields.next().ok_or(MalformedRecord)?.parse().map_err(|_| MalformedRecord)?;
        let name = fields.next().ok_or(MalformedRecord)?.to_owned();

        let mut entries = Vec::new();
        while let Some(field) = fields.next() {
            let child = field.parse().map_err(|_| MalformedRecord)?;
            let child_name = fields.next().ok_or(MalformedRecord)?.to_owned();
            entries.push(DirEntry { inum: child, name: child_name });
        }
        Ok(Self { inum, name, entries })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = format!("{} {}", self.inum, self.name);
        for entry in &self.entries {
            out.push(' ');
            out.push_str(&entry.inum.to_string());
            out.push(' ');
            out.push_str(&entry.name);
        }
        out.into_bytes()
    }

    /// Inode of the entry called `name`, if present.
    pub fn find(&self, name: &str) -> Option<Inum> {
        self.entries.iter().find(|entry| entry.name == name).map(|entry| entry.inum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_directory_roundtrips() {
        let record = DirRecord::new(1, "root");
        assert_eq!(record.encode(), b"1 root");
        assert_eq!(DirRecord::parse(b"1 root").expect("parse"), record);
    }

    #[test]
    fn entries_roundtrip_in_order() {
        let mut record = DirRecord::new(1, "root");
        record.entries.push(DirEntry { inum: 0x8000_0001, name: "notes.txt".into() });
        record.entries.push(DirEntry { inum: 42, name: "sub".into() });

        let parsed = DirRecord::parse(&record.encode()).expect("parse");
        assert_eq!(parsed, record);
        assert_eq!(parsed.find("sub"), Some(42));
        assert_eq!(parsed.find("missing"), None);
    }

    #[test]
    fn odd_trailing_field_is_malformed() {
        assert_eq!(DirRecord::parse(b"1 root 42"), Err(MalformedRecord));
    }

    #[test]
    fn non_numeric_inode_is_malformed() {
        assert_eq!(DirRecord::parse(b"one root"), Err(MalformedRecord));
        assert_eq!(DirRecord::parse(b"1 root x y"), Err(MalformedRecord));
        assert_eq!(DirRecord::parse(b""), Err(MalformedRecord));
    }

    #[test]
    fn name_validity() {
        assert!(valid_name("notes.txt"));
        assert!(!valid_name(""));
        assert!(!valid_name("two words"));
        assert!(!valid_name("tab\there"));
    }
}
