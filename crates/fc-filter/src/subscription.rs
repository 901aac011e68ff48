//! Subscription value (§4.B): an immutable record naming a subscriber's
//! interest in one event type's fields.

use fc_common::SubscriberId;
use fc_filter_config::FieldValue;
use std::collections::HashMap;

/// `(subscriber_endpoint, event_type, constraints)`. Cloned freely — a
/// `Subscription` carries no handle, just the filter criteria.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    pub subscriber: SubscriberId,
    pub event_type: String,
    pub constraints: Vec<(String, FieldValue)>,
}

impl Subscription {
    pub fn new(
        subscriber: SubscriberId,
        event_type: impl Into<String>,
        constraints: Vec<(String, FieldValue)>,
    ) -> Self {
        Self {
            subscriber,
            event_type: event_type.into(),
            constraints,
        }
    }

    /// True when every constraint's `field_name` is a key of `field_map`.
    /// Called once at refresh time (§3 invariant); a subscription that
    /// fails this is rejected outright, not merely left inert.
    pub fn fields_known(&self, field_map: &fc_filter_config::FieldMap) -> bool {
        self.constraints
            .iter()
            .all(|(field_name, _)| field_map.contains_key(field_name))
    }
}

/// Groups subscriptions by event type, as the supervisor does before
/// fanning refreshes out to each type's worker (§4.D).
pub fn group_by_event_type(subs: Vec<Subscription>) -> HashMap<String, Vec<Subscription>> {
    let mut grouped: HashMap<String, Vec<Subscription>> = HashMap::new();
    for sub in subs {
        grouped.entry(sub.event_type.clone()).or_default().push(sub);
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_known_accepts_empty_constraints() {
        let sub = Subscription::new(SubscriberId::new("s1"), "order.created", vec![]);
        let field_map = fc_filter_config::FieldMap::new();
        assert!(sub.fields_known(&field_map));
    }

    #[test]
    fn fields_known_rejects_unknown_field() {
        let sub = Subscription::new(
            SubscriberId::new("s1"),
            "order.created",
            vec![("region".to_string(), FieldValue::Str("EU".to_string()))],
        );
        let field_map = fc_filter_config::FieldMap::new();
        assert!(!sub.fields_known(&field_map));
    }

    #[test]
    fn group_by_event_type_splits_mixed_subs() {
        let subs = vec![
            Subscription::new(SubscriberId::new("s1"), "order.created", vec![]),
            Subscription::new(SubscriberId::new("s1"), "order.paid", vec![]),
            Subscription::new(SubscriberId::new("s2"), "order.created", vec![]),
        ];
        let grouped = group_by_event_type(subs);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped["order.created"].len(), 2);
        assert_eq!(grouped["order.paid"].len(), 1);
    }
}
