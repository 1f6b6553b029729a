//! Filename sanitization
//!
//! Strips Unicode bidirectional-control characters from untrusted filenames so
//! that a right-to-left override cannot make `evil\u{202E}gpj.exe` render as
//! `evilexe.jpg`. The characters are removed outright; directionality is
//! never reinterpreted.

use std::collections::HashSet;
use std::path::{Component, Path};

/// Default denylist: the full bidi-control class.
pub const BIDI_CONTROL_CHARACTERS: &[char] = &[
    // Arabic letter mark
    '\u{061C}',
    // Left-to-right / right-to-left marks
    '\u{200E}',
    '\u{200F}',
    // Embeddings, pop directional formatting, overrides
    '\u{202A}',
    '\u{202B}',
    '\u{202C}',
    '\u{202D}',
    '\u{202E}',
    // Isolates and pop directional isolate
    '\u{2066}',
    '\u{2067}',
    '\u{2068}',
    '\u{2069}',
];

const FALLBACK_NAME: &str = "download";

#[derive(Debug, Clone)]
pub struct FilenameSanitizer {
    denylist: HashSet<char>,
}

impl FilenameSanitizer {
    pub fn new() -> Self {
        Self::with_denylist(BIDI_CONTROL_CHARACTERS.iter().copied())
    }

    /// Build a sanitizer that strips exactly the given characters
    pub fn with_denylist<I>(characters: I) -> Self
    where
        I: IntoIterator<Item = char>,
    {
        Self {
            denylist: characters.into_iter().collect(),
        }
    }

    pub fn strips(&self, c: char) -> bool {
        self.denylist.contains(&c)
    }

    /// Remove every denylisted character, leaving all other code points in
    /// their original order. Never fails and is idempotent.
    pub fn sanitize(&self, raw_name: &str) -> String {
        raw_name.chars().filter(|c| !self.strips(*c)).collect()
    }

    /// Name used on disk: the sanitized name reduced to its last path
    /// component, so a suggested `../../etc/passwd` cannot escape the
    /// download directories.
    pub fn storage_name(&self, raw_name: &str) -> String {
        let sanitized = self.sanitize(raw_name);
        let unified = sanitized.replace('\\', "/");

        let name = match Path::new(&unified).components().next_back() {
            Some(Component::Normal(name)) => name.to_str().unwrap_or_default().trim(),
            _ => "",
        };

        match name {
            "" | "." | ".." => FALLBACK_NAME.to_string(),
            name => name.to_string(),
        }
    }
}

impl Default for FilenameSanitizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_rtl_override() {
        let sanitizer = FilenameSanitizer::new();
        assert_eq!(sanitizer.sanitize("test.\u{202E}gpj\u{202C}"), "test.gpj");
    }

    #[test]
    fn test_strips_full_bidi_class() {
        let sanitizer = FilenameSanitizer::new();
        let spoofed: String = BIDI_CONTROL_CHARACTERS
            .iter()
            .flat_map(|c| [*c, 'a'])
            .collect();

        assert_eq!(sanitizer.sanitize(&spoofed), "a".repeat(BIDI_CONTROL_CHARACTERS.len()));
    }

    #[test]
    fn test_leaves_other_code_points_alone() {
        let sanitizer = FilenameSanitizer::new();
        for name in ["", "README", "report.pdf", "отчёт 2024.tar.gz", "تقرير.pdf", "a\u{200B}b"] {
            assert_eq!(sanitizer.sanitize(name), name);
        }
    }

    #[test]
    fn test_idempotent() {
        let sanitizer = FilenameSanitizer::new();
        for name in ["test.\u{202E}gpj\u{202C}", "\u{202E}\u{202E}", "plain.txt", ""] {
            let once = sanitizer.sanitize(name);
            assert_eq!(sanitizer.sanitize(&once), once);

            let stored = sanitizer.storage_name(name);
            assert_eq!(sanitizer.storage_name(&stored), stored);
        }
    }

    #[test]
    fn test_custom_denylist() {
        let sanitizer = FilenameSanitizer::with_denylist(['\u{202E}']);
        assert_eq!(sanitizer.sanitize("a\u{202E}b\u{202C}"), "ab\u{202C}");
        assert!(!sanitizer.strips('\u{202C}'));
    }

    #[test]
    fn test_storage_name_keeps_last_component() {
        let sanitizer = FilenameSanitizer::new();
        assert_eq!(sanitizer.storage_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitizer.storage_name("C:\\Users\\me\\a.exe"), "a.exe");
        assert_eq!(sanitizer.storage_name("  notes.txt  "), "notes.txt");
    }

    #[test]
    fn test_storage_name_fallback() {
        let sanitizer = FilenameSanitizer::new();
        assert_eq!(sanitizer.storage_name(""), "download");
        assert_eq!(sanitizer.storage_name(".."), "download");
        assert_eq!(sanitizer.storage_name("a/ .. "), "download");
        assert_eq!(sanitizer.storage_name("dir/"), "dir");
        assert_eq!(sanitizer.storage_name("\u{202E}\u{202C}"), "download");
    }
}
