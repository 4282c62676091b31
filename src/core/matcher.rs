use crate::core::parser::ParsedRequest;
use crate::core::snapshot::Snapshot;
use crate::domain::model::{ActiveProfileProxy, ProxyDescriptor};

/// Outcome of classifying a request against the active snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The requested endpoint already exists; hand it back unchanged.
    Reuse(ProxyDescriptor),
    /// The same explicit upstream runs on another local port.
    Redirect(ProxyDescriptor),
    /// The requested port serves a different upstream.
    Reassign {
        requested_port: u16,
        occupant: ProxyDescriptor,
    },
    /// Nothing in the snapshot matches.
    CreateNew { requested_port: u16 },
}

impl Decision {
    pub fn kind(&self) -> &'static str {
        match self {
            Decision::Reuse(_) => "reuse",
            Decision::Redirect(_) => "redirect",
            Decision::Reassign { .. } => "reassign",
            Decision::CreateNew { .. } => "create",
        }
    }
}

/// First match wins: exact, cross-port (explicit targets only), same-port
/// conflict, then create.
pub fn decide(request: &ParsedRequest, snapshot: &Snapshot) -> Decision {
    let wanted = &request.descriptor;
    let port = wanted.local_port;

    if let Some(entry) = snapshot
        .entries()
        .iter()
        .find(|e| e.local_port() == port && e.descriptor.same_upstream(wanted))
    {
        return Decision::Reuse(entry.descriptor.clone());
    }

    if request.target.is_explicit() && wanted.has_qualified_upstream() {
        if let Some(entry) = snapshot
            .entries()
            .iter()
            .find(|e| is_cross_port_match(e, wanted))
        {
            // 沿用請求的 scheme 與 host，只換成已在執行的埠號與上游
            return Decision::Redirect(ProxyDescriptor {
                local_port: entry.local_port(),
                upstream_host: entry.descriptor.upstream_host.clone(),
                upstream_port: entry.descriptor.upstream_port,
                ..wanted.clone()
            });
        }
    }

    if let Some(entry) = snapshot.entries_on_port(port).next() {
        return Decision::Reassign {
            requested_port: port,
            occupant: entry.descriptor.clone(),
        };
    }

    Decision::CreateNew {
        requested_port: port,
    }
}

fn is_cross_port_match(entry: &ActiveProfileProxy, wanted: &ProxyDescriptor) -> bool {
    entry.local_port() != wanted.local_port
        && entry.descriptor.has_qualified_upstream()
        && entry.descriptor.same_upstream(wanted)
}
