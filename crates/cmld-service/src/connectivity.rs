//! Connectivity bridge between the container and the companion agent.
//!
//! The container is the authority on connectivity. Whenever it notifies
//! its observers, the engine compares the authoritative value with the one
//! it last exchanged with the agent and pushes the difference. A failed push
//! is only logged; the next notification or an explicit
//! [`ServiceEngine::reconcile_connectivity`] retries.

use std::rc::Weak;

use tracing::{trace, warn};

use cmld_core::{Container, ContainerObserver, Result};

use crate::engine::{ServiceEngine, Shared};

/// Observer registered with the container in the pre-exec phase.
pub(crate) fn observer(shared: Weak<Shared>) -> ContainerObserver {
    Box::new(move |container: &dyn Container| {
        if let Some(shared) = shared.upgrade() {
            if let Err(e) = shared.bridge_connectivity(container) {
                warn!(
                    container = %container.description(),
                    error = %e,
                    "Failed to send connectivity to companion agent"
                );
            }
        }
    })
}

impl Shared {
    /// Push the container's connectivity if the agent's view differs.
    ///
    /// Returns true if a message was sent.
    pub(crate) fn bridge_connectivity(&self, container: &dyn Container) -> Result<bool> {
        let authoritative = container.connectivity();
        if authoritative == self.connectivity.get() {
            trace!(connectivity = %authoritative, "Connectivity already in sync");
            return Ok(false);
        }

        self.send_connectivity(authoritative)?;
        Ok(true)
    }
}

impl ServiceEngine {
    /// Bring the agent's connectivity in line with the container's.
    ///
    /// Returns true if a CONNECTIVITY_CHANGE message was sent.
    pub fn reconcile_connectivity(&self) -> Result<bool> {
        let container = self.shared.container()?;
        self.shared.bridge_connectivity(&*container)
    }
}
