//! Ultralight 2.0 text encoding of device measurements.
//!
//! A measurement group `{t: 21, h: 40}` encodes as `t|21|h|40`; groups sent
//! together are joined with `#`.

use std::fmt::Display;

/// Attribute readings taken together, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeasurementGroup(Vec<(String, String)>);

impl MeasurementGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a reading, builder style.
    #[must_use]
    pub fn with(mut self, attribute: impl Into<String>, value: impl Display) -> Self {
        self.0.push((attribute.into(), value.to_string()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn encode(&self) -> String {
        self.0
            .iter()
            .map(|(attribute, value)| format!("{attribute}|{value}"))
            .collect::<Vec<_>>()
            .join("|")
    }
}

impl<K: Into<String>, V: Display> FromIterator<(K, V)> for MeasurementGroup {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::new(), |group, (attribute, value)| group.with(attribute, value))
    }
}

/// Encode one or more groups into a single Ultralight payload.
pub fn encode(groups: &[MeasurementGroup]) -> String {
    groups
        .iter()
        .map(MeasurementGroup::encode)
        .collect::<Vec<_>>()
        .join("#")
}

/// Join command parameter values the way the IoT agent expects them.
pub fn join_values<V: Display>(values: &[V]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("|")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_group() {
        let group = MeasurementGroup::new().with("l", 80);
        assert_eq!(encode(&[group]), "l|80");
    }

    #[test]
    fn two_groups_are_joined_with_hash() {
        let groups = [MeasurementGroup::new().with("l", 80), MeasurementGroup::new().with("t", 30)];
        assert_eq!(encode(&groups), "l|80#t|30");
    }

    #[test]
    fn pairs_in_one_group_keep_order() {
        let group: MeasurementGroup = [("t", 21.5), ("h", 40.0)].into_iter().collect();
        assert_eq!(group.encode(), "t|21.5|h|40");
    }

    #[test]
    fn no_groups_encode_empty() {
        assert_eq!(encode(&[]), "");
        assert!(MeasurementGroup::new().is_empty());
    }

    #[test]
    fn command_values() {
        assert_eq!(join_values(&["on", "50"]), "on|50");
        assert_eq!(join_values::<&str>(&[]), "");
    }
}
