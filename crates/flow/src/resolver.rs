//! Canonical identity resolution for session endpoints.
//!
//! The logical key is the endpoint's network-layer address. The physical key
//! is the observed hardware address when link-layer visibility exists, and
//! otherwise falls back to the network address wrapped in an explicit
//! "inferred" marker so downstream consumers never mistake a derived
//! identity for an observed one.

use remora_common::{
    EndpointRole, LogicalKey, PhysicalKey, RemoraError, RemoraResult, Session,
};

pub struct IdentityResolver;

impl IdentityResolver {
    pub fn logical_key(session: &Session, role: EndpointRole) -> RemoraResult<LogicalKey> {
        let ep = session.endpoint(role);
        if ep.addr.is_unspecified() {
            return Err(RemoraError::UnresolvableIdentity);
        }
        Ok(LogicalKey(ep.addr))
    }

    pub fn physical_key(session: &Session, role: EndpointRole) -> RemoraResult<PhysicalKey> {
        let ep = session.endpoint(role);
        if let Some(mac) = ep.mac {
            return Ok(PhysicalKey::Observed(mac));
        }
        if ep.addr.is_unspecified() {
            return Err(RemoraError::UnresolvableIdentity);
        }
        Ok(PhysicalKey::Inferred(ep.addr))
    }
}
