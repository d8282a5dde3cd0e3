//! Analytics events: exposures, custom events and their delivery.
mod event;
mod event_logger;
mod exposure_dedupe;

pub(crate) use event::Event;
pub(crate) use event_logger::{EventLogger, EventLoggerConfig};
pub(crate) use exposure_dedupe::{config_key, gate_key, layer_key, ExposureDedupe};
