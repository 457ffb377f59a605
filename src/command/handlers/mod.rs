//! Directive handlers
//!
//! Handlers only decide. They read the radio plane and return a
//! `CommandResult`; the dispatcher owns timers, pending state and channels.

mod control_radio;
mod data_radio;
mod network;
mod release;

pub use control_radio::handle_prepare_control_radio;
pub use data_radio::{handle_disable_data_radio, handle_enable_data_radio};
pub use network::handle_join_network;
pub use release::handle_release;

use crate::radio::RadioPlane;
use fieldlink_shared::Directive;

/// Context passed to directive handlers
pub struct HandlerContext<'a> {
    pub radios: &'a dyn RadioPlane,
    pub directive: &'a Directive,
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::HandlerContext;
    use crate::radio::RadioPlane;
    use fieldlink_shared::Directive;

    pub fn ctx<'a>(radios: &'a dyn RadioPlane, directive: &'a Directive) -> HandlerContext<'a> {
        HandlerContext { radios, directive }
    }
}
