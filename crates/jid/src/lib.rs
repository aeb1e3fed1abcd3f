//! JID parsing and comparison (component B).
//!
//! The parse algorithm below follows `original_source/mcabber/libjabber/
//! jid.c`'s `jid_new()` exactly: the resource is whatever follows the
//! *first* `/`; an optional `scheme:` prefix preceding that `/` is
//! recognised and discarded; what remains is split on the first `@` into
//! node and domain. See SPEC_FULL.md §3's `[SUPPLEMENT]` note.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JidError {
    #[error("JID has no domain part")]
    EmptyDomain,
    #[error("node failed stringprep: {0}")]
    InvalidNode(String),
    #[error("domain failed stringprep: {0}")]
    InvalidDomain(String),
    #[error("resource failed stringprep: {0}")]
    InvalidResource(String),
}

/// A parsed, stringprep-normalised Jabber ID.
#[derive(Debug, Clone, Eq)]
pub struct Jid {
    pub node: Option<String>,
    pub domain: String,
    pub resource: Option<String>,
}

/// Which components [`Jid::equal_mask`] should compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JidMask {
    pub node: bool,
    pub domain: bool,
    pub resource: bool,
}

impl JidMask {
    pub const BARE: JidMask = JidMask {
        node: true,
        domain: true,
        resource: false,
    };
    pub const FULL: JidMask = JidMask {
        node: true,
        domain: true,
        resource: true,
    };
}

const STRINGPREP_CACHE_TTL: Duration = Duration::from_secs(15 * 60);

static STRINGPREP_CACHE: Mutex<Option<HashMap<String, (String, Instant)>>> = Mutex::new(None);

fn cached_stringprep<F>(input: &str, profile: F) -> Result<String, String>
where
    F: FnOnce(&str) -> Result<String, String>,
{
    let now = Instant::now();
    {
        let mut guard = STRINGPREP_CACHE.lock().unwrap();
        let cache = guard.get_or_insert_with(HashMap::new);
        cache.retain(|_, (_, inserted)| now.duration_since(*inserted) < STRINGPREP_CACHE_TTL);
        if let Some((value, _)) = cache.get(input) {
            return Ok(value.clone());
        }
    }

    let value = profile(input)?;

    let mut guard = STRINGPREP_CACHE.lock().unwrap();
    guard
        .get_or_insert_with(HashMap::new)
        .insert(input.to_string(), (value.clone(), now));
    Ok(value)
}

fn nodeprep(input: &str) -> Result<String, String> {
    cached_stringprep(input, |s| {
        stringprep::nodeprep(s)
            .map(|cow| cow.into_owned())
            .map_err(|e| format!("{e:?}"))
    })
}

fn nameprep(input: &str) -> Result<String, String> {
    cached_stringprep(input, |s| {
        stringprep::nameprep(s)
            .map(|cow| cow.into_owned())
            .map_err(|e| format!("{e:?}"))
    })
}

fn resourceprep(input: &str) -> Result<String, String> {
    cached_stringprep(input, |s| {
        stringprep::resourceprep(s)
            .map(|cow| cow.into_owned())
            .map_err(|e| format!("{e:?}"))
    })
}

impl Jid {
    /// Parse `text` following mcabber's `jid_new()` algorithm, then
    /// normalise each part through stringprep.
    pub fn parse(text: &str) -> Result<Self, JidError> {
        let mut rest = text;
        let mut resource: Option<&str> = None;

        if let Some(slash) = memchr::memchr(b'/', rest.as_bytes()) {
            let (head, tail) = rest.split_at(slash);
            let after = &tail[1..];
            if !after.is_empty() {
                resource = Some(after);
            }
            rest = head;
        }

        // A `scheme:` prefix is recognised only if it occurs within the
        // part preceding the resource (it has already been stripped above).
        if let Some(colon) = memchr::memchr(b':', rest.as_bytes()) {
            rest = &rest[colon + 1..];
        }

        let (node, domain) = match memchr::memchr(b'@', rest.as_bytes()) {
            Some(at) => {
                let (node_part, domain_part) = rest.split_at(at);
                let domain_part = &domain_part[1..];
                if node_part.is_empty() {
                    (None, domain_part)
                } else {
                    (Some(node_part), domain_part)
                }
            }
            None => (None, rest),
        };

        if domain.is_empty() {
            return Err(JidError::EmptyDomain);
        }

        let node = node
            .map(nodeprep)
            .transpose()
            .map_err(JidError::InvalidNode)?;
        let domain = nameprep(domain).map_err(JidError::InvalidDomain)?;
        let resource = resource
            .map(resourceprep)
            .transpose()
            .map_err(JidError::InvalidResource)?;

        Ok(Jid {
            node,
            domain,
            resource,
        })
    }

    /// The `node@domain` part, with no resource.
    pub fn bare(&self) -> String {
        match &self.node {
            Some(node) => format!("{node}@{}", self.domain),
            None => self.domain.clone(),
        }
    }

    /// Full serialised form, `node@domain/resource`.
    pub fn full(&self) -> String {
        match &self.resource {
            Some(resource) => format!("{}/{resource}", self.bare()),
            None => self.bare(),
        }
    }

    pub fn equal(&self, other: &Jid) -> bool {
        self.equal_mask(other, JidMask::FULL)
    }

    pub fn equal_mask(&self, other: &Jid, mask: JidMask) -> bool {
        (!mask.node || self.node == other.node)
            && (!mask.domain || self.domain == other.domain)
            && (!mask.resource || self.resource == other.resource)
    }

    /// Append `other` to `list` if it is not already present (by full JID
    /// equality), mirroring the original's `jid_append_list` dedup rule.
    pub fn append_list(list: &mut Vec<Jid>, other: Jid) {
        if !list.iter().any(|j| j.equal(&other)) {
            list.push(other);
        }
    }

    /// Interpret `resource` as `res?k=v&k=v` query parameters (used by a
    /// handful of legacy extensions), returning the plain resource name
    /// and the parsed key/value pairs.
    pub fn resource_query_parse(&self) -> Option<(&str, Vec<(&str, &str)>)> {
        let resource = self.resource.as_deref()?;
        let (name, query) = resource.split_once('?')?;
        let pairs = query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .collect();
        Some((name, pairs))
    }
}

impl PartialEq for Jid {
    fn eq(&self, other: &Self) -> bool {
        self.equal(other)
    }
}

impl std::fmt::Display for Jid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.full())
    }
}

impl std::str::FromStr for Jid {
    type Err = JidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Jid::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_jid() {
        let jid = Jid::parse("user@example.com").unwrap();
        assert_eq!(jid.node.as_deref(), Some("user"));
        assert_eq!(jid.domain, "example.com");
        assert_eq!(jid.resource, None);
    }

    #[test]
    fn parses_full_jid_with_resource() {
        let jid = Jid::parse("user@example.com/Work").unwrap();
        assert_eq!(jid.node.as_deref(), Some("user"));
        assert_eq!(jid.domain, "example.com");
        assert_eq!(jid.resource.as_deref(), Some("Work"));
    }

    #[test]
    fn parses_domain_only_jid() {
        let jid = Jid::parse("example.com").unwrap();
        assert_eq!(jid.node, None);
        assert_eq!(jid.domain, "example.com");
    }

    #[test]
    fn strips_ignored_scheme_prefix() {
        let jid = Jid::parse("xmpp:user@example.com/Work").unwrap();
        assert_eq!(jid.node.as_deref(), Some("user"));
        assert_eq!(jid.domain, "example.com");
        assert_eq!(jid.resource.as_deref(), Some("Work"));
    }

    #[test]
    fn scheme_prefix_after_resource_slash_is_not_stripped() {
        // A ':' appearing only inside the resource must not be treated as
        // a scheme separator, per jid_new()'s `type < resource` check.
        let jid = Jid::parse("user@example.com/a:b").unwrap();
        assert_eq!(jid.node.as_deref(), Some("user"));
        assert_eq!(jid.resource.as_deref(), Some("a:b"));
    }

    #[test]
    fn case_insensitive_node_and_domain_compare_equal() {
        let a = Jid::parse("User@Example.COM").unwrap();
        let b = Jid::parse("user@example.com").unwrap();
        assert!(a.equal(&b));
    }

    #[test]
    fn resource_comparison_is_case_sensitive() {
        let a = Jid::parse("user@example.com/Work").unwrap();
        let b = Jid::parse("user@example.com/work").unwrap();
        assert!(!a.equal(&b));
    }

    #[test]
    fn jid_round_trip_normalises_case() {
        let jid = Jid::parse("User@Example.COM/Work").unwrap();
        let reparsed = Jid::parse(&jid.full()).unwrap();
        assert!(jid.equal(&reparsed));
    }

    #[test]
    fn empty_domain_rejected() {
        assert_eq!(Jid::parse("user@").unwrap_err(), JidError::EmptyDomain);
        assert_eq!(Jid::parse("").unwrap_err(), JidError::EmptyDomain);
    }

    #[test]
    fn equal_mask_can_ignore_resource() {
        let a = Jid::parse("user@example.com/one").unwrap();
        let b = Jid::parse("user@example.com/two").unwrap();
        assert!(!a.equal(&b));
        assert!(a.equal_mask(&b, JidMask::BARE));
    }

    #[test]
    fn append_list_deduplicates() {
        let mut list = Vec::new();
        Jid::append_list(&mut list, Jid::parse("user@example.com").unwrap());
        Jid::append_list(&mut list, Jid::parse("USER@EXAMPLE.COM").unwrap());
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn resource_query_parse_extracts_pairs() {
        let jid = Jid::parse("room@conference.example.com/nick?foo=bar&baz=qux").unwrap();
        let (name, pairs) = jid.resource_query_parse().unwrap();
        assert_eq!(name, "nick");
        assert_eq!(pairs, vec![("foo", "bar"), ("baz", "qux")]);
    }

    #[test]
    fn resource_without_query_returns_none() {
        let jid = Jid::parse("user@example.com/plain").unwrap();
        assert!(jid.resource_query_parse().is_none());
    }
}
