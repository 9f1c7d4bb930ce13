use crate::show_run::Stanza;

/// Normalize an identifier the way the Dashboard accepts it: surrounding and
/// embedded quotes are stripped, `.`, `:` and `*` become `_`. Applied at every
/// definition and lookup site so quoted and unquoted spellings match.
pub fn sanitize_name(raw: &str) -> String {
    raw.trim()
        .replace('"', "")
        .replace(['.', ':', '*'], "_")
}

/// Stanza categories the splitter knows how to reconstruct headers for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StanzaKind {
    Ipv4Object,
    Ipv6Object,
    FqdnObject,
    Ipv4Group,
    Ipv6Group,
    Rule,
}

impl StanzaKind {
    fn header(&self, original: &str, ident: &str) -> String {
        match self {
            StanzaKind::Ipv4Object => format!("address-object ipv4 {ident}"),
            StanzaKind::Ipv6Object => format!("address-object ipv6 {ident}"),
            StanzaKind::FqdnObject => format!("address-object fqdn {ident}"),
            StanzaKind::Ipv4Group => format!("address-group ipv4 {ident}"),
            StanzaKind::Ipv6Group => format!("address-group ipv6 {ident}"),
            StanzaKind::Rule => format!("{original} (Sub Rule)"),
        }
    }
}

/// SonicWall sometimes collapses several definitions into one stanza, with
/// `exit` lines separating them. Split the child list at each `exit`
/// boundary: the first partition stays on the original stanza, every later
/// partition becomes a synthetic stanza whose header is rebuilt from the
/// partition's leading `name <ident>` line.
pub fn split_on_exit(stanza: &mut Stanza, kind: StanzaKind) -> Vec<Stanza> {
    let boundaries: Vec<usize> = stanza
        .children
        .iter()
        .enumerate()
        .filter(|(_, child)| child.contains("exit"))
        .map(|(idx, _)| idx + 1)
        .collect();

    if boundaries.is_empty() || boundaries == [stanza.children.len()] {
        return Vec::new();
    }

    let mut partitions: Vec<Vec<String>> = Vec::new();
    let mut start = 0;
    for &end in &boundaries {
        partitions.push(stanza.children[start..end].to_vec());
        start = end;
    }
    if start < stanza.children.len() {
        partitions.push(stanza.children[start..].to_vec());
    }

    let mut split: Vec<Stanza> = Vec::new();
    for partition in partitions.iter().skip(1) {
        let ident = partition
            .first()
            .map(|line| line.trim().replace("name ", ""))
            .unwrap_or_default();
        if ident.is_empty() && kind != StanzaKind::Rule {
            continue;
        }
        let header = kind.header(&stanza.text, ident.trim());
        tracing::debug!(header = %header, "broke apart new sub element");
        split.push(Stanza::new(header, partition.clone()));
    }

    stanza.children = partitions.remove(0);
    split
}

/// Run the splitter over a whole pass worth of stanzas, appending the
/// synthetic entries after the originals.
pub fn split_all(stanzas: &mut Vec<Stanza>, kind: StanzaKind) {
    let mut synthetic: Vec<Stanza> = Vec::new();
    for stanza in stanzas.iter_mut() {
        synthetic.extend(split_on_exit(stanza, kind));
    }
    stanzas.extend(synthetic);
}

#[cfg(test)]
mod tests {
    use super::{StanzaKind, sanitize_name, split_all, split_on_exit};
    use crate::show_run::Stanza;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("\"Web Server\""), "Web Server");
        assert_eq!(sanitize_name("web.internal:8080"), "web_internal_8080");
        assert_eq!(sanitize_name("*.example.com"), "__example_com");
        assert_eq!(sanitize_name("  LAN-Hosts "), "LAN-Hosts");
    }

    #[test]
    fn test_split_without_exit_is_noop() {
        let mut stanza = Stanza::new("address-object ipv4 A", vec!["host 10.0.0.1".into()]);
        let split = split_on_exit(&mut stanza, StanzaKind::Ipv4Object);
        assert!(split.is_empty());
        assert_eq!(stanza.children, vec!["host 10.0.0.1"]);
    }

    #[test]
    fn test_split_trailing_exit_only() {
        let mut stanza = Stanza::new(
            "address-object ipv4 A",
            vec!["host 10.0.0.1".into(), "exit".into()],
        );
        let split = split_on_exit(&mut stanza, StanzaKind::Ipv4Object);
        assert!(split.is_empty());
        assert_eq!(stanza.children.len(), 2);
    }

    #[test]
    fn test_split_creates_synthetic_stanza_per_partition() {
        let mut stanza = Stanza::new(
            "address-object ipv4 A",
            vec![
                "host 10.0.0.1".into(),
                "exit".into(),
                "name B".into(),
                "host 10.0.0.2".into(),
                "exit".into(),
                "name C".into(),
                "host 10.0.0.3".into(),
            ],
        );
        let split = split_on_exit(&mut stanza, StanzaKind::Ipv4Object);
        assert_eq!(stanza.children, vec!["host 10.0.0.1", "exit"]);
        assert_eq!(split.len(), 2);
        assert_eq!(split[0].text, "address-object ipv4 B");
        assert_eq!(split[0].children[1], "host 10.0.0.2");
        assert_eq!(split[1].text, "address-object ipv4 C");
    }

    #[test]
    fn test_split_rule_header_marks_sub_rule() {
        let mut stanza = Stanza::new(
            "access-rule ipv4 from LAN to WAN",
            vec![
                "action allow".into(),
                "exit".into(),
                "action deny".into(),
                "source address any".into(),
            ],
        );
        let split = split_on_exit(&mut stanza, StanzaKind::Rule);
        assert_eq!(split.len(), 1);
        assert_eq!(split[0].text, "access-rule ipv4 from LAN to WAN (Sub Rule)");
    }

    #[test]
    fn test_split_all_appends_entries() {
        let mut stanzas = vec![Stanza::new(
            "address-group ipv4 G",
            vec![
                "address-object ipv4 A".into(),
                "exit".into(),
                "name H".into(),
                "address-object ipv4 B".into(),
            ],
        )];
        split_all(&mut stanzas, StanzaKind::Ipv4Group);
        assert_eq!(stanzas.len(), 2);
        assert_eq!(stanzas[1].text, "address-group ipv4 H");
    }
}
