use std::fs;
use std::io;
use std::path::Path;

/// One configuration stanza: a top-level line plus its indented child lines.
///
/// The "show-run" format is line-oriented. A line without leading whitespace
/// opens a new stanza; every following indented line belongs to it. Children
/// are kept as flat trimmed strings, deeper indentation is not tracked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Stanza {
    pub text: String,
    pub children: Vec<String>,
}

impl Stanza {
    pub fn new(text: impl Into<String>, children: Vec<String>) -> Self {
        Stanza {
            text: text.into(),
            children,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ShowRun {
    stanzas: Vec<Stanza>,
}

impl ShowRun {
    pub fn parse(input: &str) -> Self {
        let mut stanzas: Vec<Stanza> = Vec::new();
        for line in input.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let indented = line.starts_with(' ') || line.starts_with('\t');
            if indented {
                if let Some(current) = stanzas.last_mut() {
                    current.children.push(line.trim().to_string());
                }
                // indented line before any stanza opened, nothing to attach to
                continue;
            }
            stanzas.push(Stanza::new(line.trim_end(), Vec::new()));
        }
        ShowRun { stanzas }
    }

    pub fn from_file(path: &Path) -> Result<Self, io::Error> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    pub fn len(&self) -> usize {
        self.stanzas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stanzas.is_empty()
    }

    /// All stanzas whose header starts with `prefix`.
    pub fn matching(&self, prefix: &str) -> Vec<Stanza> {
        self.stanzas
            .iter()
            .filter(|s| s.text.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Stanzas matching `prefix` with no child line starting with `child_prefix`.
    pub fn matching_without_child(&self, prefix: &str, child_prefix: &str) -> Vec<Stanza> {
        self.stanzas
            .iter()
            .filter(|s| s.text.starts_with(prefix) && !s.children.iter().any(|c| c.starts_with(child_prefix)))
            .cloned()
            .collect()
    }

    /// Stanzas matching `prefix` with at least one child line starting with `child_prefix`.
    pub fn matching_with_child(&self, prefix: &str, child_prefix: &str) -> Vec<Stanza> {
        self.stanzas
            .iter()
            .filter(|s| s.text.starts_with(prefix) && s.children.iter().any(|c| c.starts_with(child_prefix)))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::ShowRun;

    const SAMPLE: &str = "\
address-object ipv4 \"Web Server\"
  host 10.0.0.5
  zone LAN
address-group ipv4 Servers
  address-object ipv4 \"Web Server\"
address-group ipv4 Nested
  address-group ipv4 Servers

service-object HTTP TCP 80 80
";

    #[test]
    fn test_parse_headers_and_children() {
        let run = ShowRun::parse(SAMPLE);
        assert_eq!(run.len(), 4);
        let objects = run.matching("address-object ipv4");
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].text, "address-object ipv4 \"Web Server\"");
        assert_eq!(objects[0].children, vec!["host 10.0.0.5", "zone LAN"]);
    }

    #[test]
    fn test_matching_with_and_without_child() {
        let run = ShowRun::parse(SAMPLE);
        let flat = run.matching_without_child("address-group ipv4", "address-group ipv4");
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0].text, "address-group ipv4 Servers");

        let nested = run.matching_with_child("address-group ipv4", "address-group ipv4");
        assert_eq!(nested.len(), 1);
        assert_eq!(nested[0].text, "address-group ipv4 Nested");
    }

    #[test]
    fn test_blank_lines_and_leading_indent_ignored() {
        let run = ShowRun::parse("  orphan child\n\nservice-object DNS UDP 53 53\n");
        assert_eq!(run.len(), 1);
        assert!(run.matching("service-object")[0].children.is_empty());
    }
}
