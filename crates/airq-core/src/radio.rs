//! The seam between the engine and a platform BLE stack.

use crate::error::Result;
use crate::events::RadioCommand;

/// Outbound half of a platform radio layer.
///
/// Commands are fire-and-forget: `submit` only queues the request, and its
/// outcome is reported later as a [`RadioEvent`](crate::events::RadioEvent).
///
/// Implemented by [`BtleRadio`](crate::btle::BtleRadio) for real hardware and
/// [`MockRadio`](crate::mock::MockRadio) for tests.
pub trait RadioLink: Send {
    /// Whether the radio layer knows a peripheral with this identifier.
    fn resolve(&self, id: &str) -> bool;

    /// Queue a command.
    fn submit(&self, command: RadioCommand) -> Result<()>;
}

impl<R: RadioLink + Sync> RadioLink for std::sync::Arc<R> {
    fn resolve(&self, id: &str) -> bool {
        (**self).resolve(id)
    }

    fn submit(&self, command: RadioCommand) -> Result<()> {
        (**self).submit(command)
    }
}
