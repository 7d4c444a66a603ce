//! Runtime container names.
//!
//! Pod identity lives only in the runtime's container name:
//! `k8s--<container>.<fingerprint hex>--<pod full name>--<random hex>`.
//! Dashes inside a component are escaped as `_-_` so `--` only ever
//! separates components.

use pod_types::PodFullName;

/// First component of every name the agent creates
pub const CONTAINER_NAME_PREFIX: &str = "k8s";

/// Components decoded from a managed container's name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedContainerName {
    pub pod_full_name: PodFullName,
    pub container_name: String,
    /// `0` when the name carries no readable fingerprint
    pub fingerprint: u32,
}

fn escape_dash(s: &str) -> String {
    s.replace('-', "_-_")
}

fn unescape_dash(s: &str) -> String {
    s.replace("_-_", "-")
}

/// Build a fresh runtime name. The random suffix keeps a recreated container
/// from colliding with its not-yet-removed predecessor.
pub fn build_container_name(pod_full_name: &PodFullName, container_name: &str, fingerprint: u32) -> String {
    format!(
        "{}--{}.{:x}--{}--{:08x}",
        CONTAINER_NAME_PREFIX,
        escape_dash(container_name),
        fingerprint,
        escape_dash(pod_full_name.as_str()),
        random_suffix()
    )
}

fn random_suffix() -> u32 {
    // Low 32 bits of a v4 uuid are random.
    (uuid::Uuid::new_v4().as_u128() & u128::from(u32::MAX)) as u32
}

/// Decode a runtime name, with or without the runtime's leading `/`.
///
/// Returns `None` for containers the agent did not create.
pub fn parse_container_name(name: &str) -> Option<ParsedContainerName> {
    let name = name.strip_prefix('/').unwrap_or(name);
    let parts: Vec<&str> = name.split("--").collect();
    if parts.len() < 3 || parts[0] != CONTAINER_NAME_PREFIX {
        return None;
    }

    let (container, fingerprint) = match parts[1].rsplit_once('.') {
        Some((container, hash)) => (container, u32::from_str_radix(hash, 16).unwrap_or(0)),
        None => (parts[1], 0),
    };
    if container.is_empty() || parts[2].is_empty() {
        return None;
    }

    Some(ParsedContainerName {
        pod_full_name: PodFullName::from_raw(unescape_dash(parts[2])),
        container_name: unescape_dash(container),
        fingerprint,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_then_parse() {
        let pod = PodFullName::new("my-web", "team-a");
        let name = build_container_name(&pod, "side-car", 0xdead_beef);
        assert!(name.starts_with("k8s--side_-_car.deadbeef--my_-_web.team_-_a--"));

        let parsed = parse_container_name(&format!("/{name}")).unwrap();
        assert_eq!(parsed.pod_full_name, pod);
        assert_eq!(parsed.container_name, "side-car");
        assert_eq!(parsed.fingerprint, 0xdead_beef);
    }

    #[test]
    fn test_names_are_unique() {
        let pod = PodFullName::new("web", "default");
        assert_ne!(build_container_name(&pod, "c", 1), build_container_name(&pod, "c", 1));
    }

    #[test]
    fn test_missing_or_bad_fingerprint_is_zero() {
        let parsed = parse_container_name("k8s--web--nginx.default--0000beef").unwrap();
        assert_eq!(parsed.container_name, "web");
        assert_eq!(parsed.fingerprint, 0);

        let parsed = parse_container_name("k8s--web.zz--nginx.default--0000beef").unwrap();
        assert_eq!(parsed.fingerprint, 0);
    }

    #[test]
    fn test_foreign_names_are_rejected() {
        assert!(parse_container_name("/nginx").is_none());
        assert!(parse_container_name("/registry--web.1--x.default--1").is_none());
        assert!(parse_container_name("k8s--web.1").is_none());
        assert!(parse_container_name("").is_none());
    }
}
