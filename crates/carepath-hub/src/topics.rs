use crate::request::Action;

/// Immutable topic table built once from the namespace root and shared by
/// listener, router, and dispatcher.
///
/// Inbound requests live under `<ns>/request/<action>`; replies embed the
/// requester's correlation id: `<ns>/response/<kind>/<id>/response`.
#[derive(Debug, Clone)]
pub struct Topics {
    namespace: String,
    pub request_filter: String,
    pub new_device: String,
    pub store_event: String,
    pub emergency: String,
    pub store_user: String,
    pub store_product: String,
    pub get_events: String,
    pub get_emergencies: String,
    pub valid_user: String,
    response_valid: String,
    response_send_events: String,
    response_emergency: String,
}

impl Topics {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            request_filter: format!("{namespace}/request/#"),
            new_device: format!("{namespace}/request/new_device"),
            store_event: format!("{namespace}/request/store_event"),
            emergency: format!("{namespace}/request/emergency"),
            store_user: format!("{namespace}/request/store_user"),
            store_product: format!("{namespace}/request/store_product"),
            get_events: format!("{namespace}/request/get_events"),
            get_emergencies: format!("{namespace}/request/get_emergencies"),
            valid_user: format!("{namespace}/request/valid_user"),
            response_valid: format!("{namespace}/response/valid"),
            response_send_events: format!("{namespace}/response/send_events"),
            response_emergency: format!("{namespace}/response/emergency"),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Resolve an inbound topic to its action. `None` means the message is
    /// unroutable and must be dropped with a warning.
    pub fn action_for(&self, topic: &str) -> Option<Action> {
        if topic == self.new_device {
            Some(Action::NewDevice)
        } else if topic == self.store_event {
            Some(Action::StoreJourney)
        } else if topic == self.emergency {
            Some(Action::StoreEmergency)
        } else if topic == self.store_user {
            Some(Action::StoreUser)
        } else if topic == self.store_product {
            Some(Action::StoreProduct)
        } else if topic == self.get_events {
            Some(Action::GetJourneys)
        } else if topic == self.get_emergencies {
            Some(Action::GetEmergencies)
        } else if topic == self.valid_user {
            Some(Action::ValidateUser)
        } else {
            None
        }
    }

    /// Every request topic, in the order used for the retained-clear publish
    /// after a disconnect.
    pub fn request_topics(&self) -> [&str; 8] {
        [
            &self.new_device,
            &self.store_event,
            &self.emergency,
            &self.store_user,
            &self.store_product,
            &self.get_events,
            &self.get_emergencies,
            &self.valid_user,
        ]
    }

    pub fn valid_response(&self, correlation_id: &str) -> String {
        format!("{}/{}/response", self.response_valid, correlation_id)
    }

    pub fn send_events_response(&self, username: &str) -> String {
        format!("{}/{}/response", self.response_send_events, username)
    }

    pub fn emergency_response(&self, username: &str) -> String {
        format!("{}/{}/response", self.response_emergency, username)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_resolve_from_topics() {
        let topics = Topics::new("carepath");
        assert_eq!(
            topics.action_for("carepath/request/new_device"),
            Some(Action::NewDevice)
        );
        assert_eq!(
            topics.action_for("carepath/request/store_event"),
            Some(Action::StoreJourney)
        );
        assert_eq!(
            topics.action_for("carepath/request/valid_user"),
            Some(Action::ValidateUser)
        );
        assert_eq!(topics.action_for("carepath/request/bogus"), None);
        assert_eq!(topics.action_for("other/request/store_event"), None);
    }

    #[test]
    fn reply_topics_embed_correlation_id() {
        let topics = Topics::new("carepath");
        assert_eq!(
            topics.valid_response("web-17"),
            "carepath/response/valid/web-17/response"
        );
        assert_eq!(
            topics.send_events_response("alice"),
            "carepath/response/send_events/alice/response"
        );
        assert_eq!(
            topics.emergency_response("alice"),
            "carepath/response/emergency/alice/response"
        );
    }

    #[test]
    fn request_filter_covers_all_request_topics() {
        let topics = Topics::new("carepath");
        for topic in topics.request_topics() {
            assert!(carepath_bus::topic_matches(&topics.request_filter, topic));
        }
    }
}
