use crate::core::parser::parse_descriptor;
use crate::domain::model::{ActiveProfileProxy, ProfileRecord};
use std::collections::HashSet;

/// Request-scoped view of the endpoints other active profiles are using.
///
/// The list is small (one entry per open profile) so lookups are linear scans.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    entries: Vec<ActiveProfileProxy>,
}

impl Snapshot {
    /// Parses every profile's descriptor. Empty or malformed entries are
    /// skipped; one bad peer never fails the resolution.
    pub fn build(profiles: &[ProfileRecord]) -> Self {
        let mut entries = Vec::with_capacity(profiles.len());

        for profile in profiles {
            let Some(raw) = profile.proxy.as_deref().map(str::trim) else {
                continue;
            };
            if raw.is_empty() {
                continue;
            }

            match parse_descriptor(raw) {
                Ok(parsed) => entries.push(ActiveProfileProxy {
                    descriptor: parsed.descriptor,
                }),
                Err(e) => tracing::debug!("Skipping malformed active profile proxy: {}", e),
            }
        }

        Self { entries }
    }

    pub fn from_entries(entries: Vec<ActiveProfileProxy>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[ActiveProfileProxy] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn claims_port(&self, port: u16) -> bool {
        self.entries.iter().any(|e| e.local_port() == port)
    }

    pub fn entries_on_port(&self, port: u16) -> impl Iterator<Item = &ActiveProfileProxy> {
        self.entries.iter().filter(move |e| e.local_port() == port)
    }

    /// Lower-cased upstream hosts currently being served.
    pub fn active_upstream_hosts(&self) -> HashSet<String> {
        self.entries
            .iter()
            .map(|e| e.descriptor.upstream_host.to_ascii_lowercase())
            .filter(|host| !host.is_empty())
            .collect()
    }
}
