//! Listener that writes every discovery event to the log.

use lookout_discovery::{DiscoveryEvent, DiscoveryListener};

pub struct LogListener;

fn log_event(event: &DiscoveryEvent) {
    for r in &event.registrars {
        tracing::info!(
            event = event.kind.as_str(),
            service_id = %r.service_id,
            locator = %r.locator,
            groups = ?r.groups,
            "registrar"
        );
    }
}

impl DiscoveryListener for LogListener {
    fn discovered(&self, event: &DiscoveryEvent) {
        log_event(event);
    }

    fn discarded(&self, event: &DiscoveryEvent) {
        log_event(event);
    }

    fn changed(&self, event: &DiscoveryEvent) {
        log_event(event);
    }

    fn wants_changes(&self) -> bool {
        true
    }
}
