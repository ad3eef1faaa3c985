//! Segment evaluation: walks a parsed criterion tree against concrete
//! installation and event data and produces a match verdict.

use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use pushpulse_core::GeoLocation;

use crate::ast::{Comparator, CriterionKind, CriterionNode, SubscriptionStatus, ValueKind, ValueNode};
use crate::data_source::DataSource;
use crate::error::ParseResult;
use crate::parser::SegmentationDslParser;

/// A presence window reported by the host SDK, all epoch milliseconds
/// (elapsed time in plain milliseconds).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceInfo {
    pub from_date: i64,
    pub until_date: i64,
    pub elapsed_time: i64,
}

impl PresenceInfo {
    pub fn new(from_date: i64, until_date: i64, elapsed_time: i64) -> Self {
        Self {
            from_date,
            until_date,
            elapsed_time,
        }
    }
}

/// The complete evaluation input, assembled fresh per evaluation call and
/// read-only afterwards.
#[derive(Debug, Clone)]
pub struct SegmenterData {
    pub installation: Value,
    pub all_events: Vec<Value>,
    pub presence_info: Option<PresenceInfo>,
    pub last_app_open_date: i64,
}

impl SegmenterData {
    pub fn new(
        installation: Value,
        all_events: Vec<Value>,
        presence_info: Option<PresenceInfo>,
        last_app_open_date: i64,
    ) -> Self {
        Self {
            installation,
            all_events,
            presence_info,
            last_app_open_date,
        }
    }
}

pub struct Segmenter {
    data: SegmenterData,
}

impl Segmenter {
    pub fn new(data: SegmenterData) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &SegmenterData {
        &self.data
    }

    /// Parse a raw segment definition with the default lenient parser,
    /// rooted at the installation.
    pub fn parse_installation_segment(input: &Value) -> ParseResult<CriterionNode> {
        SegmentationDslParser::default_parser().parse(input, DataSource::Installation)
    }

    /// Evaluate a parsed segment at the current instant.
    pub fn parsed_segment_matches_installation(&self, segment: &CriterionNode) -> bool {
        self.matches_at(segment, Utc::now().timestamp_millis())
    }

    /// Evaluate at a fixed reference instant. The walk is a deterministic
    /// pure function of (segment, data, now).
    pub fn matches_at(&self, segment: &CriterionNode, now_ms: i64) -> bool {
        Evaluator::installation(&self.data, now_ms).matches(segment)
    }
}

/// Single-pass recursive evaluator. `event` scopes field resolution to
/// one concrete event document; without it the installation document is
/// the scope.
struct Evaluator<'a> {
    data: &'a SegmenterData,
    event: Option<&'a Value>,
    now_ms: i64,
}

impl<'a> Evaluator<'a> {
    fn installation(data: &'a SegmenterData, now_ms: i64) -> Self {
        Self {
            data,
            event: None,
            now_ms,
        }
    }

    fn event(data: &'a SegmenterData, event: &'a Value, now_ms: i64) -> Self {
        Self {
            data,
            event: Some(event),
            now_ms,
        }
    }

    fn matches(&self, node: &CriterionNode) -> bool {
        match &node.kind {
            CriterionKind::MatchAll => true,
            CriterionKind::Unknown { key, .. } => {
                debug!(key, "unknown criterion never matches");
                false
            }
            CriterionKind::And(children) => children.iter().all(|child| self.matches(child)),
            CriterionKind::Or(children) => children.iter().any(|child| self.matches(child)),
            CriterionKind::Not(child) => !self.matches(child),
            CriterionKind::Eq(value) => self
                .resolve(&node.context.data_source)
                .iter()
                .any(|field| self.value_equals(field, value)),
            CriterionKind::Any(values) => {
                let fields = self.resolve(&node.context.data_source);
                values
                    .iter()
                    .any(|value| fields.iter().any(|field| self.value_equals(field, value)))
            }
            CriterionKind::All(values) => {
                let fields = self.resolve(&node.context.data_source);
                values
                    .iter()
                    .all(|value| fields.iter().any(|field| self.value_equals(field, value)))
            }
            CriterionKind::Comparison { comparator, value } => self
                .resolve(&node.context.data_source)
                .iter()
                .any(|field| self.compare(field, *comparator, value)),
            CriterionKind::Prefix(value) => {
                let ValueKind::String(prefix) = &value.kind else {
                    return false;
                };
                self.resolve(&node.context.data_source)
                    .iter()
                    .any(|field| {
                        field
                            .as_str()
                            .is_some_and(|s| s.starts_with(prefix.as_str()))
                    })
            }
            CriterionKind::Inside(area) => self
                .resolve_locations(&node.context.data_source)
                .iter()
                .any(|location| area_contains(area, location)),
            CriterionKind::LastActivityDate { date_comparison } => match date_comparison {
                Some(comparison) => self.matches(comparison),
                None => self.last_activity_date().is_some(),
            },
            CriterionKind::Presence {
                present,
                since_date,
                elapsed_time,
            } => self.matches_presence(*present, since_date.as_deref(), elapsed_time.as_deref()),
            CriterionKind::Geo {
                location_comparison,
                date_comparison,
            } => {
                location_comparison
                    .as_deref()
                    .map_or(true, |comparison| self.matches(comparison))
                    && date_comparison
                        .as_deref()
                        .map_or(true, |comparison| self.matches(comparison))
            }
            CriterionKind::SubscriptionStatus(status) => self.matches_subscription_status(*status),
            CriterionKind::Join(child) => self.matches_join(child),
        }
    }

    fn matches_presence(
        &self,
        present: bool,
        since_date: Option<&CriterionNode>,
        elapsed_time: Option<&CriterionNode>,
    ) -> bool {
        let Some(info) = &self.data.presence_info else {
            return false;
        };
        let currently_present = info.from_date <= self.now_ms && self.now_ms <= info.until_date;
        if currently_present != present {
            return false;
        }
        if let Some(comparison) = since_date {
            if !self.matches(comparison) {
                return false;
            }
        }
        if let Some(comparison) = elapsed_time {
            if !self.matches(comparison) {
                return false;
            }
        }
        true
    }

    fn matches_subscription_status(&self, target: SubscriptionStatus) -> bool {
        self.data
            .installation
            .get("preferences")
            .and_then(|preferences| preferences.get("subscriptionStatus"))
            .and_then(Value::as_str)
            .and_then(SubscriptionStatus::parse)
            .is_some_and(|status| status == target)
    }

    /// Joins re-scope evaluation to the child's data-source root. A join
    /// into events is existential: one matching event suffices.
    fn matches_join(&self, child: &CriterionNode) -> bool {
        match child.context.data_source.root() {
            DataSource::Event => match self.event {
                Some(event) => Evaluator::event(self.data, event, self.now_ms).matches(child),
                None => self
                    .data
                    .all_events
                    .iter()
                    .any(|event| Evaluator::event(self.data, event, self.now_ms).matches(child)),
            },
            DataSource::Installation => {
                Evaluator::installation(self.data, self.now_ms).matches(child)
            }
            // No user document is available client-side.
            _ => false,
        }
    }

    /// Resolve a data-source chain to the flat collection of values it
    /// addresses in the current scope. Missing data resolves to nothing.
    fn resolve(&self, source: &DataSource) -> Vec<Value> {
        match source {
            DataSource::Installation => vec![self.data.installation.clone()],
            DataSource::User => Vec::new(),
            DataSource::Event => match self.event {
                Some(event) => vec![event.clone()],
                None => self.data.all_events.clone(),
            },
            DataSource::Field { parent, path } => {
                let mut matched = Vec::new();
                for value in self.resolve(parent) {
                    navigate(&value, &path.parts, &mut matched);
                }
                matched
            }
            DataSource::LastActivityDate { .. } => self
                .last_activity_date()
                .map(|ms| vec![Value::from(ms)])
                .unwrap_or_default(),
            DataSource::PresenceSinceDate { present, .. } => self
                .presence_since_date(*present)
                .map(|ms| vec![Value::from(ms)])
                .unwrap_or_default(),
            DataSource::PresenceElapsedTime { present, .. } => self
                .presence_elapsed_time(*present)
                .map(|ms| vec![Value::from(ms)])
                .unwrap_or_default(),
            DataSource::GeoLocation { .. } => self
                .geo_field("location")
                .map(|location| vec![location.clone()])
                .unwrap_or_default(),
            DataSource::GeoDate { .. } => self
                .geo_field("date")
                .map(|date| vec![date.clone()])
                .unwrap_or_default(),
        }
    }

    fn resolve_locations(&self, source: &DataSource) -> Vec<GeoLocation> {
        self.resolve(source)
            .iter()
            .filter_map(value_to_location)
            .collect()
    }

    /// Most recent of the last app open and every event timestamp.
    fn last_activity_date(&self) -> Option<i64> {
        let mut latest = (self.data.last_app_open_date > 0).then_some(self.data.last_app_open_date);
        for event in &self.data.all_events {
            let timestamp = event
                .get("actionDate")
                .and_then(Value::as_i64)
                .or_else(|| event.get("creationDate").and_then(Value::as_i64));
            if let Some(timestamp) = timestamp {
                latest = Some(latest.map_or(timestamp, |current| current.max(timestamp)));
            }
        }
        latest
    }

    fn presence_since_date(&self, present: bool) -> Option<i64> {
        let info = self.data.presence_info.as_ref()?;
        Some(if present {
            info.from_date
        } else {
            info.until_date
        })
    }

    fn presence_elapsed_time(&self, present: bool) -> Option<i64> {
        let info = self.data.presence_info.as_ref()?;
        Some(if present {
            info.elapsed_time
        } else {
            self.now_ms - info.until_date
        })
    }

    fn geo_field(&self, field: &str) -> Option<&Value> {
        self.data.installation.get("geo")?.get(field)
    }

    /// Equality between a resolved field value and a value node, with
    /// dates normalized to epoch milliseconds.
    fn value_equals(&self, field: &Value, value: &ValueNode) -> bool {
        match &value.kind {
            ValueKind::Null => field.is_null(),
            ValueKind::Boolean(b) => field.as_bool() == Some(*b),
            ValueKind::Number(n) => numbers_equal(field, n.as_f64()),
            ValueKind::String(s) => field.as_str() == Some(s.as_str()),
            ValueKind::Date(ms) => field_epoch_ms(field) == Some(*ms as f64),
            ValueKind::RelativeDate(duration) => {
                field_epoch_ms(field) == Some(duration.apply_to(self.now_ms) as f64)
            }
            ValueKind::Duration(duration) => {
                numbers_equal(field, Some(self.duration_ms(duration) as f64))
            }
            ValueKind::Unknown { value, .. } => field == value,
            // Geographic values have no equality against field data.
            ValueKind::GeoLocation(_)
            | ValueKind::GeoBox(_)
            | ValueKind::GeoCircle(_)
            | ValueKind::GeoPolygon(_) => false,
        }
    }

    /// Ordered comparison between a resolved field value and a value
    /// node. Non-orderable pairs never match.
    fn compare(&self, field: &Value, comparator: Comparator, value: &ValueNode) -> bool {
        let ordering = match &value.kind {
            ValueKind::Number(n) => order_f64(field.as_f64(), n.as_f64()),
            ValueKind::Date(ms) => order_f64(field_epoch_ms(field), Some(*ms as f64)),
            ValueKind::RelativeDate(duration) => order_f64(
                field_epoch_ms(field),
                Some(duration.apply_to(self.now_ms) as f64),
            ),
            ValueKind::Duration(duration) => {
                order_f64(field.as_f64(), Some(self.duration_ms(duration) as f64))
            }
            ValueKind::String(s) => field.as_str().map(|f| f.cmp(s.as_str())),
            _ => None,
        };
        ordering.is_some_and(|ordering| comparator.accepts(ordering))
    }

    /// Length of a duration in milliseconds, measured from "now" so
    /// calendar-sized components stay calendar-aware.
    fn duration_ms(&self, duration: &pushpulse_core::Iso8601Duration) -> i64 {
        duration.apply_to(self.now_ms) - self.now_ms
    }
}

/// Walk one path segment at a time through mappings. Missing keys and
/// non-mapping intermediates are absent; a terminal array flattens to its
/// elements.
fn navigate(value: &Value, parts: &[String], matched: &mut Vec<Value>) {
    let Some((head, rest)) = parts.split_first() else {
        match value {
            Value::Array(items) => matched.extend(items.iter().cloned()),
            other => matched.push(other.clone()),
        }
        return;
    };
    if let Value::Object(object) = value {
        if let Some(child) = object.get(head) {
            navigate(child, rest, matched);
        }
    }
}

fn value_to_location(value: &Value) -> Option<GeoLocation> {
    Some(GeoLocation::new(
        value.get("lat")?.as_f64()?,
        value.get("lon")?.as_f64()?,
    ))
}

fn area_contains(area: &ValueNode, location: &GeoLocation) -> bool {
    match &area.kind {
        ValueKind::GeoBox(geo_box) => geo_box.contains(location),
        ValueKind::GeoCircle(circle) => circle.contains(location),
        ValueKind::GeoPolygon(polygon) => polygon.contains(location),
        _ => false,
    }
}

/// A date-valued field: numbers are epoch milliseconds already, strings
/// go through the absolute-date formats.
fn field_epoch_ms(field: &Value) -> Option<f64> {
    match field {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => crate::grammar::parse_absolute_date(s).map(|ms| ms as f64),
        _ => None,
    }
}

fn numbers_equal(field: &Value, target: Option<f64>) -> bool {
    match (field.as_f64(), target) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn order_f64(field: Option<f64>, target: Option<f64>) -> Option<std::cmp::Ordering> {
    match (field, target) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NOW: i64 = 1_600_000_000_000;
    const DAY_MS: i64 = 86_400_000;

    fn segmenter(installation: Value, all_events: Vec<Value>) -> Segmenter {
        Segmenter::new(SegmenterData::new(installation, all_events, None, 0))
    }

    fn parse(input: Value) -> CriterionNode {
        Segmenter::parse_installation_segment(&input).unwrap()
    }

    fn matches(segmenter: &Segmenter, input: Value) -> bool {
        segmenter.matches_at(&parse(input), NOW)
    }

    #[test]
    fn test_match_all_and_boolean_algebra() {
        let s = segmenter(json!({}), Vec::new());
        assert!(matches(&s, json!({})));
        assert!(matches(&s, json!({"and": []})));
        assert!(!matches(&s, json!({"or": []})));
        assert!(!matches(&s, json!({"not": {}})));
        assert!(matches(&s, json!({"or": [{"or": []}, {}]})));
    }

    #[test]
    fn test_unknown_criterion_never_matches() {
        let s = segmenter(json!({}), Vec::new());
        assert!(!matches(&s, json!({"futureCriterion": {"whatever": 1}})));
        assert!(matches(&s, json!({"not": {"futureCriterion": 1}})));
    }

    #[test]
    fn test_eq_over_scalar_field() {
        let s = segmenter(json!({"custom": {"string_foo": "bar"}}), Vec::new());
        assert!(matches(&s, json!({".custom.string_foo": {"eq": "bar"}})));
        assert!(!matches(&s, json!({".custom.string_foo": {"eq": "baz"}})));
        assert!(!matches(&s, json!({".custom.missing": {"eq": "bar"}})));
    }

    #[test]
    fn test_eq_over_array_field_is_existential() {
        let s = segmenter(json!({"custom": {"tags": ["v", "w"]}}), Vec::new());
        assert!(matches(&s, json!({".custom.tags": {"eq": "v"}})));
        assert!(!matches(&s, json!({".custom.tags": {"eq": "x"}})));
    }

    #[test]
    fn test_eq_null_requires_explicit_null() {
        let s = segmenter(json!({"custom": {"cleared": null}}), Vec::new());
        assert!(matches(&s, json!({".custom.cleared": {"eq": null}})));
        assert!(!matches(&s, json!({".custom.absent": {"eq": null}})));
    }

    #[test]
    fn test_numeric_equality_across_representations() {
        let s = segmenter(json!({"custom": {"n": 5.0}}), Vec::new());
        assert!(matches(&s, json!({".custom.n": {"eq": 5}})));
    }

    #[test]
    fn test_any_intersects_and_all_requires_every_value() {
        let s = segmenter(json!({"custom": {"tags": ["a", "b"]}}), Vec::new());
        assert!(matches(&s, json!({".custom.tags": {"any": ["b", "z"]}})));
        assert!(!matches(&s, json!({".custom.tags": {"any": ["y", "z"]}})));
        assert!(matches(&s, json!({".custom.tags": {"all": ["a", "b"]}})));
        assert!(!matches(&s, json!({".custom.tags": {"all": ["a", "z"]}})));
    }

    #[test]
    fn test_comparison_against_field_values() {
        let s = segmenter(json!({"custom": {"score": 10}}), Vec::new());
        assert!(matches(&s, json!({".custom.score": {"gte": 10}})));
        assert!(!matches(&s, json!({".custom.score": {"gt": 10}})));
        assert!(!matches(&s, json!({".custom.score": {"gte": 11}})));
        assert!(matches(&s, json!({".custom.score": {"lt": 11}})));
        // Missing fields never satisfy a comparison.
        assert!(!matches(&s, json!({".custom.absent": {"gte": 9}})));
    }

    #[test]
    fn test_comparison_against_lesser_value() {
        let s = segmenter(json!({"custom": {"score": 9}}), Vec::new());
        assert!(!matches(&s, json!({".custom.score": {"gte": 10}})));
    }

    #[test]
    fn test_string_comparison_is_lexicographic() {
        let s = segmenter(json!({"custom": {"tier": "gold"}}), Vec::new());
        assert!(matches(&s, json!({".custom.tier": {"gte": "bronze"}})));
        assert!(!matches(&s, json!({".custom.tier": {"gte": "silver"}})));
        // Mixed string/number pairs are not orderable.
        assert!(!matches(&s, json!({".custom.tier": {"gte": 1}})));
    }

    #[test]
    fn test_prefix_matches_any_string_value() {
        let s = segmenter(json!({"custom": {"tags": ["unit_a", "other"]}}), Vec::new());
        assert!(matches(&s, json!({".custom.tags": {"prefix": "unit_"}})));
        assert!(!matches(&s, json!({".custom.tags": {"prefix": "x_"}})));
    }

    #[test]
    fn test_relative_date_resolves_against_now() {
        let s = segmenter(
            json!({"custom": {"lastSeenDate": NOW - 3 * DAY_MS}}),
            Vec::new(),
        );
        assert!(matches(
            &s,
            json!({".custom.lastSeenDate": {"gte": {"relativeDate": "-P7D"}}})
        ));
        assert!(!matches(
            &s,
            json!({".custom.lastSeenDate": {"gte": {"relativeDate": "-P1D"}}})
        ));
    }

    #[test]
    fn test_date_field_strings_are_coerced() {
        let s = segmenter(json!({"custom": {"signup": "2020-01-15"}}), Vec::new());
        assert!(matches(
            &s,
            json!({".custom.signup": {"gte": {"date": "2020-01-01"}}})
        ));
        assert!(!matches(
            &s,
            json!({".custom.signup": {"gte": {"date": "2020-02-01"}}})
        ));
    }

    #[test]
    fn test_join_into_events_is_existential() {
        let s = segmenter(
            json!({}),
            vec![
                json!({"type": "purchase", "amount": 5}),
                json!({"type": "purchase", "amount": 50}),
            ],
        );
        assert!(matches(
            &s,
            json!({"event": {".type": {"eq": "purchase"}, ".amount": {"gte": 10}}})
        ));
        assert!(!matches(
            &s,
            json!({"event": {".type": {"eq": "purchase"}, ".amount": {"gte": 100}}})
        ));
        // No events at all.
        let empty = segmenter(json!({}), Vec::new());
        assert!(!matches(&empty, json!({"event": {".type": {"eq": "purchase"}}})));
    }

    #[test]
    fn test_join_back_to_installation_from_event_scope() {
        let s = segmenter(
            json!({"custom": {"plan": "pro"}}),
            vec![json!({"type": "upgrade"})],
        );
        assert!(matches(
            &s,
            json!({"event": {
                ".type": {"eq": "upgrade"},
                "installation": {".custom.plan": {"eq": "pro"}},
            }})
        ));
    }

    #[test]
    fn test_user_join_never_matches() {
        let s = segmenter(json!({}), Vec::new());
        assert!(!matches(&s, json!({"user": {}})));
    }

    #[test]
    fn test_subscription_status_states_are_distinct() {
        for (stored, target, expected) in [
            ("optIn", "optIn", true),
            ("optOut", "optIn", false),
            ("softOptOut", "optIn", false),
            ("softOptOut", "softOptOut", true),
            ("softOptOut", "optOut", false),
        ] {
            let s = segmenter(
                json!({"preferences": {"subscriptionStatus": stored}}),
                Vec::new(),
            );
            assert_eq!(
                matches(&s, json!({ "subscriptionStatus": target })),
                expected,
                "stored {stored}, target {target}"
            );
        }
        let missing = segmenter(json!({}), Vec::new());
        assert!(!matches(&missing, json!({"subscriptionStatus": "optIn"})));
    }

    #[test]
    fn test_presence_requires_info_and_matching_state() {
        let present_info = PresenceInfo::new(NOW - 10_000, NOW + 10_000, 10_000);
        let s = Segmenter::new(SegmenterData::new(
            json!({}),
            Vec::new(),
            Some(present_info),
            0,
        ));
        assert!(matches(&s, json!({"presence": {"present": true}})));
        assert!(!matches(&s, json!({"presence": {"present": false}})));

        let absent_info = PresenceInfo::new(NOW - 60_000, NOW - 30_000, 30_000);
        let gone = Segmenter::new(SegmenterData::new(
            json!({}),
            Vec::new(),
            Some(absent_info),
            0,
        ));
        assert!(matches(&gone, json!({"presence": {"present": false}})));

        let no_info = segmenter(json!({}), Vec::new());
        assert!(!matches(&no_info, json!({"presence": {"present": false}})));
    }

    #[test]
    fn test_presence_sub_comparisons_all_must_pass() {
        let info = PresenceInfo::new(NOW - 10_000, NOW + 10_000, 10_000);
        let s = Segmenter::new(SegmenterData::new(json!({}), Vec::new(), Some(info), 0));
        assert!(matches(
            &s,
            json!({"presence": {
                "present": true,
                "sinceDate": {"lte": {"relativeDate": "-PT5S"}},
                "elapsedTime": {"gte": {"duration": "PT5S"}},
            }})
        ));
        assert!(!matches(
            &s,
            json!({"presence": {
                "present": true,
                "sinceDate": {"lte": {"relativeDate": "-PT5S"}},
                "elapsedTime": {"gte": {"duration": "PT1H"}},
            }})
        ));
    }

    #[test]
    fn test_last_activity_date_takes_most_recent_source() {
        let s = Segmenter::new(SegmenterData::new(
            json!({}),
            vec![json!({"type": "purchase", "actionDate": NOW - 2 * DAY_MS})],
            None,
            NOW - 5 * DAY_MS,
        ));
        assert!(matches(
            &s,
            json!({"lastActivityDate": {"gte": {"relativeDate": "-P3D"}}})
        ));

        let stale = Segmenter::new(SegmenterData::new(json!({}), Vec::new(), None, NOW - 5 * DAY_MS));
        assert!(!matches(
            &stale,
            json!({"lastActivityDate": {"gte": {"relativeDate": "-P3D"}}})
        ));

        let no_data = segmenter(json!({}), Vec::new());
        assert!(!matches(&no_data, json!({"lastActivityDate": {"gte": {"date": 0}}})));
    }

    #[test]
    fn test_event_creation_date_is_a_fallback_timestamp() {
        let s = Segmenter::new(SegmenterData::new(
            json!({}),
            vec![json!({"type": "open", "creationDate": NOW - DAY_MS})],
            None,
            0,
        ));
        assert!(matches(
            &s,
            json!({"lastActivityDate": {"gte": {"relativeDate": "-P2D"}}})
        ));
    }

    #[test]
    fn test_geo_location_inside_area() {
        let s = segmenter(
            json!({"geo": {"location": {"lat": 5.0, "lon": 5.0}, "date": NOW - 1_000}}),
            Vec::new(),
        );
        assert!(matches(
            &s,
            json!({"geo": {"location": {"inside": {"geobox": {
                "top": 10.0, "right": 10.0, "bottom": 0.0, "left": 0.0
            }}}}})
        ));
        assert!(!matches(
            &s,
            json!({"geo": {"location": {"inside": {"geobox": {
                "top": 30.0, "right": 30.0, "bottom": 20.0, "left": 20.0
            }}}}})
        ));
        assert!(matches(
            &s,
            json!({"geo": {"date": {"gte": {"relativeDate": "-P1D"}}}})
        ));
        // Both axes must pass when both are supplied.
        assert!(!matches(
            &s,
            json!({"geo": {
                "location": {"inside": {"geobox": {
                    "top": 10.0, "right": 10.0, "bottom": 0.0, "left": 0.0
                }}},
                "date": {"gte": {"relativeDate": "PT1S"}},
            }})
        ));
    }

    #[test]
    fn test_geo_without_data_never_matches_location() {
        let s = segmenter(json!({}), Vec::new());
        assert!(!matches(
            &s,
            json!({"geo": {"location": {"inside": {"geobox": {
                "top": 10.0, "right": 10.0, "bottom": 0.0, "left": 0.0
            }}}}})
        ));
        // A geo criterion with no sub-comparisons is vacuously true.
        assert!(matches(&s, json!({"geo": {}})));
    }

    #[test]
    fn test_evaluation_is_deterministic_for_fixed_now() {
        let s = segmenter(
            json!({"custom": {"lastSeenDate": NOW - 3 * DAY_MS}}),
            Vec::new(),
        );
        let segment = parse(json!({".custom.lastSeenDate": {"gte": {"relativeDate": "-P7D"}}}));
        let first = s.matches_at(&segment, NOW);
        for _ in 0..10 {
            assert_eq!(s.matches_at(&segment, NOW), first);
        }
    }

    #[test]
    fn test_nested_field_sources_concatenate_paths() {
        let s = segmenter(json!({"custom": {"nested": {"deep": 7}}}), Vec::new());
        assert!(matches(
            &s,
            json!({".custom": {".nested.deep": {"eq": 7}}})
        ));
    }
}
