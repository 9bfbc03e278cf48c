//! Character set names and their default collation indexes

/// (name, default collation index)
const CHARSETS: &[(&str, u8)] = &[
    ("big5", 1),
    ("latin2", 9),
    ("dec8", 3),
    ("cp850", 4),
    ("hp8", 6),
    ("koi8r", 7),
    ("latin1", 8),
    ("swe7", 10),
    ("ascii", 11),
    ("ujis", 12),
    ("sjis", 13),
    ("hebrew", 16),
    ("tis620", 18),
    ("euckr", 19),
    ("koi8u", 22),
    ("gb2312", 24),
    ("greek", 25),
    ("cp1250", 26),
    ("gbk", 28),
    ("latin5", 30),
    ("armscii8", 32),
    ("utf8", 33),
    ("utf8mb3", 33),
    ("ucs2", 35),
    ("cp866", 36),
    ("keybcs2", 37),
    ("macce", 38),
    ("macroman", 39),
    ("cp852", 40),
    ("latin7", 41),
    ("utf8mb4", 45),
    ("cp1251", 51),
    ("utf16", 54),
    ("utf16le", 56),
    ("cp1256", 57),
    ("cp1257", 59),
    ("utf32", 60),
    ("binary", 63),
    ("geostd8", 92),
    ("cp932", 95),
    ("eucjpms", 97),
    ("gb18030", 248),
];

/// Collation index for a character set name (case-insensitive)
pub fn index_of(name: &str) -> Option<u8> {
    CHARSETS
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, index)| *index)
}

/// Character set name for a collation index, if it is a default collation
pub fn name_of(index: u8) -> Option<&'static str> {
    CHARSETS
        .iter()
        .find(|(_, i)| *i == index)
        .map(|(name, _)| *name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_charsets() {
        assert_eq!(index_of("utf8"), Some(33));
        assert_eq!(index_of("UTF8MB4"), Some(45));
        assert_eq!(index_of("latin1"), Some(8));
        assert_eq!(index_of("binary"), Some(63));
        assert_eq!(index_of("klingon"), None);
    }

    #[test]
    fn test_name_of_prefers_first_alias() {
        assert_eq!(name_of(33), Some("utf8"));
        assert_eq!(name_of(45), Some("utf8mb4"));
        assert_eq!(name_of(200), None);
    }
}
