//! Service Reconciler
//!
//! Brings units to a desired enablement state. The current state is read
//! first; units already where they should be are left alone.

use crate::error::{ProvisionError, Result};
use crate::system::{ServiceManager, UnitState};
use tracing::{debug, info, warn};

/// What reconciling a unit did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    Changed,
    AlreadyInState,
}

/// Ensure `unit` starts at boot. A unit that does not exist is an error.
pub fn ensure_enabled(services: &dyn ServiceManager, unit: &str) -> Result<Reconciled> {
    let state = services.state(unit)?;
    debug!("{} is {}", unit, state);

    match state {
        s if s.counts_as_enabled() => Ok(Reconciled::AlreadyInState),
        UnitState::NotFound => Err(ProvisionError::execution(
            format!("systemctl enable {unit}"),
            None,
            format!("unit {unit} not found"),
        )),
        _ => {
            services.enable(unit)?;
            info!("Enabled {}", unit);
            Ok(Reconciled::Changed)
        }
    }
}

/// Ensure `unit` does not start at boot. Absent and indirect units need
/// nothing; generated and transient units are left as they are.
pub fn ensure_disabled(services: &dyn ServiceManager, unit: &str) -> Result<Reconciled> {
    let state = services.state(unit)?;
    debug!("{} is {}", unit, state);

    match state {
        s if s.counts_as_disabled() => return Ok(Reconciled::AlreadyInState),
        UnitState::Other => {
            warn!("{} has no unit file systemctl can disable, leaving it", unit);
            return Ok(Reconciled::AlreadyInState);
        }
        _ => {}
    }
    services.disable(unit)?;
    info!("Disabled {}", unit);
    Ok(Reconciled::Changed)
}
