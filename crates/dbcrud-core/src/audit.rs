//! Audit stamping: fills `CreatedOn`/`CreatedBy`/`LastUpdatedOn`/`LastUpdatedBy`
//! columns (see [`crate::typemap::AuditRole`]) on insert/update without the
//! table gateway hardcoding a clock or a notion of "current user".
//!
//! No teacher counterpart exists (`ouroboros-postgres` leaves timestamping to
//! callers); modeled as an external collaborator trait the same way
//! [`crate::driver::DriverFactory`] abstracts the wire protocol, so a host
//! application supplies its own clock and principal source.

use crate::value::SqlValue;
use chrono::{DateTime, Utc};

/// One resolved audit value pair for an insert or update.
#[derive(Debug, Clone)]
pub struct AuditStamp {
    pub on: DateTime<Utc>,
    pub by: Option<SqlValue>,
}

/// Supplies the "when" and "who" a [`crate::gateway::TableGateway`] writes
/// into audit columns. Implementations are expected to be cheap and
/// synchronous: reading a clock and a request-scoped principal, not making a
/// network call.
pub trait AuditValueResolver: Send + Sync {
    /// Called once per insert, to stamp `CreatedOn`/`CreatedBy`.
    fn on_create(&self) -> AuditStamp;

    /// Called once per update, to stamp `LastUpdatedOn`/`LastUpdatedBy`.
    fn on_update(&self) -> AuditStamp;
}

/// An [`AuditValueResolver`] that stamps the current UTC time and never
/// supplies a principal. Used when a caller registers audit columns but has
/// no per-user identity to attach (batch jobs, migrations).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClockResolver;

impl AuditValueResolver for SystemClockResolver {
    fn on_create(&self) -> AuditStamp {
        AuditStamp { on: Utc::now(), by: None }
    }

    fn on_update(&self) -> AuditStamp {
        AuditStamp { on: Utc::now(), by: None }
    }
}

/// An [`AuditValueResolver`] that stamps a fixed principal alongside the
/// current UTC time, for hosts that resolve "current user" once per request
/// or per gateway instance rather than per call.
#[derive(Debug, Clone)]
pub struct FixedPrincipalResolver {
    principal: SqlValue,
}

impl FixedPrincipalResolver {
    pub fn new(principal: SqlValue) -> Self {
        Self { principal }
    }
}

impl AuditValueResolver for FixedPrincipalResolver {
    fn on_create(&self) -> AuditStamp {
        AuditStamp {
            on: Utc::now(),
            by: Some(self.principal.clone()),
        }
    }

    fn on_update(&self) -> AuditStamp {
        AuditStamp {
            on: Utc::now(),
            by: Some(self.principal.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_resolver_never_supplies_a_principal() {
        let resolver = SystemClockResolver;
        assert!(resolver.on_create().by.is_none());
        assert!(resolver.on_update().by.is_none());
    }

    #[test]
    fn fixed_principal_resolver_repeats_the_same_principal() {
        let resolver = FixedPrincipalResolver::new(SqlValue::String("svc-migrator".to_string()));
        let create = resolver.on_create();
        let update = resolver.on_update();
        assert_eq!(create.by, Some(SqlValue::String("svc-migrator".to_string())));
        assert_eq!(update.by, Some(SqlValue::String("svc-migrator".to_string())));
    }
}
