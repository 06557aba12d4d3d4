//! `.env` override file loading.
//!
//! The file sits at the installation root and holds one `KEY=VALUE`
//! assignment per line. Its entries override the inherited environment of
//! every child but never the computed ports.

use std::path::Path;

use crate::environment::EnvironmentSet;

/// File name looked up at the installation root.
pub const ENV_FILE_NAME: &str = ".env";

/// Parses `.env` content. Malformed lines are skipped.
pub fn parse(content: &str) -> EnvironmentSet {
    let mut vars = EnvironmentSet::new();
    for line in content.lines() {
        if let Some((key, value)) = parse_line(line) {
            vars.insert(key, value);
        }
    }
    vars
}

fn parse_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let idx = line.find('=').filter(|idx| *idx > 0)?;
    let key = line[..idx].trim();
    if key.is_empty() {
        return None;
    }
    let value = unquote(line[idx + 1..].trim());
    Some((key.to_string(), value.to_string()))
}

fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        if (first == b'"' || first == b'\'') && bytes[bytes.len() - 1] == first {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Loads the file at `path`.
///
/// Returns `None` when the file is absent or unreadable; the launcher runs
/// fine without it.
pub fn load(path: &Path) -> Option<EnvironmentSet> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "failed to read env file");
            return None;
        }
    };
    let vars = parse(&content);
    if !vars.is_empty() {
        tracing::info!(
            "Loaded {} environment variables from {}",
            vars.len(),
            path.display()
        );
    }
    Some(vars)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_matching_quotes() {
        let vars = parse("FOO=\"bar baz\"\nSINGLE='x y'\nMIXED=\"oops'\n");
        assert_eq!(vars.get("FOO"), Some("bar baz"));
        assert_eq!(vars.get("SINGLE"), Some("x y"));
        assert_eq!(vars.get("MIXED"), Some("\"oops'"));
    }

    #[test]
    fn skips_comments_blank_and_malformed_lines() {
        let vars = parse("# comment\n\n   \n  # indented comment\nNOEQUALS\n=novalue\nOK=1\n");
        assert_eq!(vars.len(), 1);
        assert_eq!(vars.get("OK"), Some("1"));
    }

    #[test]
    fn trims_keys_and_values_and_keeps_inner_equals() {
        let vars = parse("  KEY  =  a=b  \nEMPTY=\n");
        assert_eq!(vars.get("KEY"), Some("a=b"));
        assert_eq!(vars.get("EMPTY"), Some(""));
    }

    #[test]
    fn later_duplicates_win() {
        let vars = parse("A=1\nB=2\nA=3\n");
        assert_eq!(vars.get("A"), Some("3"));
        let keys: Vec<_> = vars.iter().map(|(k, _)| k.to_os_string()).collect();
        assert_eq!(keys, vec!["A", "B"]);
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(&dir.path().join(ENV_FILE_NAME)).is_none());
    }

    #[test]
    fn loads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(ENV_FILE_NAME);
        std::fs::write(&path, "API_URL=\"http://localhost\"\n# note\nDEBUG=1\n").unwrap();
        let vars = load(&path).unwrap();
        assert_eq!(vars.len(), 2);
        assert_eq!(vars.get("API_URL"), Some("http://localhost"));
    }
}
