//! The default DSL grammar: every criterion and value key the platform
//! dashboard can emit, registered into configurable parser registries.

use std::sync::Arc;

use serde_json::{Map, Value};

use pushpulse_core::geo::geohash;
use pushpulse_core::{FieldPath, GeoBox, GeoCircle, GeoLocation, GeoPolygon, Iso8601Duration};

use crate::ast::{Comparator, CriterionKind, CriterionNode, SubscriptionStatus, ValueKind, ValueNode};
use crate::data_source::DataSource;
use crate::error::{ParseError, ParseResult};
use crate::parser::{
    ConfigurableCriterionNodeParser, ConfigurableValueNodeParser, ParserConfig, ParsingContext,
    SegmentationDslParser, UnknownPolicy,
};

/// Build a parser configuration over the default grammar with the given
/// unknown-key policy.
pub fn default_config(policy: UnknownPolicy) -> ParserConfig {
    ParserConfig::new(
        Arc::new(default_criterion_parser()),
        Arc::new(default_value_parser()),
        policy,
        policy,
    )
}

pub fn default_criterion_parser() -> ConfigurableCriterionNodeParser {
    let mut registry = ConfigurableCriterionNodeParser::new();

    registry.register_exact_name_parser("and", Box::new(parse_and));
    registry.register_exact_name_parser("or", Box::new(parse_or));
    registry.register_exact_name_parser("not", Box::new(parse_not));

    registry.register_exact_name_parser("eq", Box::new(parse_eq));
    registry.register_exact_name_parser("any", Box::new(parse_any));
    registry.register_exact_name_parser("all", Box::new(parse_all));
    for comparator in ["gt", "gte", "lt", "lte"] {
        registry.register_exact_name_parser(comparator, Box::new(parse_comparison));
    }
    registry.register_exact_name_parser("prefix", Box::new(parse_prefix));
    registry.register_exact_name_parser("inside", Box::new(parse_inside));

    registry.register_exact_name_parser("lastActivityDate", Box::new(parse_last_activity_date));
    registry.register_exact_name_parser("presence", Box::new(parse_presence));
    registry.register_exact_name_parser("geo", Box::new(parse_geo));
    registry.register_exact_name_parser("subscriptionStatus", Box::new(parse_subscription_status));

    registry.register_exact_name_parser("installation", Box::new(parse_join_installation));
    registry.register_exact_name_parser("user", Box::new(parse_join_user));
    registry.register_exact_name_parser("event", Box::new(parse_join_event));

    registry.register_dynamic_name_parser(Box::new(parse_field_access));
    registry
}

pub fn default_value_parser() -> ConfigurableValueNodeParser {
    let mut registry = ConfigurableValueNodeParser::new();
    registry.register_exact_name_parser("date", Box::new(parse_date));
    registry.register_exact_name_parser("relativeDate", Box::new(parse_relative_date));
    registry.register_exact_name_parser("duration", Box::new(parse_duration));
    registry.register_exact_name_parser("geolocation", Box::new(parse_geolocation));
    registry.register_exact_name_parser("geobox", Box::new(parse_geobox));
    registry.register_exact_name_parser("geocircle", Box::new(parse_geocircle));
    registry.register_exact_name_parser("geopolygon", Box::new(parse_geopolygon));
    registry
}

// === Criterion parsers ===

fn parse_and(
    parser: &SegmentationDslParser,
    context: &ParsingContext,
    key: &str,
    input: &Value,
) -> ParseResult<Option<CriterionNode>> {
    let children = parse_criterion_list(parser, context, key, input)?;
    Ok(Some(CriterionNode::new(
        context.clone(),
        CriterionKind::And(children),
    )))
}

fn parse_or(
    parser: &SegmentationDslParser,
    context: &ParsingContext,
    key: &str,
    input: &Value,
) -> ParseResult<Option<CriterionNode>> {
    let children = parse_criterion_list(parser, context, key, input)?;
    Ok(Some(CriterionNode::new(
        context.clone(),
        CriterionKind::Or(children),
    )))
}

fn parse_not(
    parser: &SegmentationDslParser,
    context: &ParsingContext,
    key: &str,
    input: &Value,
) -> ParseResult<Option<CriterionNode>> {
    let object = expect_object(key, input)?;
    let child = parser.parse_criterion(context, object)?;
    Ok(Some(CriterionNode::new(
        context.clone(),
        CriterionKind::Not(Box::new(child)),
    )))
}

fn parse_eq(
    parser: &SegmentationDslParser,
    context: &ParsingContext,
    _key: &str,
    input: &Value,
) -> ParseResult<Option<CriterionNode>> {
    let value = parser.parse_value(context, input)?;
    Ok(Some(CriterionNode::new(
        context.clone(),
        CriterionKind::Eq(value),
    )))
}

fn parse_any(
    parser: &SegmentationDslParser,
    context: &ParsingContext,
    key: &str,
    input: &Value,
) -> ParseResult<Option<CriterionNode>> {
    let values = parse_value_list(parser, context, key, input)?;
    Ok(Some(CriterionNode::new(
        context.clone(),
        CriterionKind::Any(values),
    )))
}

fn parse_all(
    parser: &SegmentationDslParser,
    context: &ParsingContext,
    key: &str,
    input: &Value,
) -> ParseResult<Option<CriterionNode>> {
    let values = parse_value_list(parser, context, key, input)?;
    Ok(Some(CriterionNode::new(
        context.clone(),
        CriterionKind::All(values),
    )))
}

fn parse_comparison(
    parser: &SegmentationDslParser,
    context: &ParsingContext,
    key: &str,
    input: &Value,
) -> ParseResult<Option<CriterionNode>> {
    let comparator = Comparator::from_key(key)
        .ok_or_else(|| ParseError::BadInput(format!("invalid comparator: {key}")))?;
    let value = parser.parse_value(context, input)?;
    Ok(Some(CriterionNode::new(
        context.clone(),
        CriterionKind::Comparison { comparator, value },
    )))
}

fn parse_prefix(
    parser: &SegmentationDslParser,
    context: &ParsingContext,
    key: &str,
    input: &Value,
) -> ParseResult<Option<CriterionNode>> {
    let value = parser.parse_value(context, input)?;
    if !matches!(value.kind, ValueKind::String(_)) {
        return Err(ParseError::BadInput(format!(
            "{key} expects a string value, got {}",
            value.kind.name()
        )));
    }
    Ok(Some(CriterionNode::new(
        context.clone(),
        CriterionKind::Prefix(value),
    )))
}

fn parse_inside(
    parser: &SegmentationDslParser,
    context: &ParsingContext,
    key: &str,
    input: &Value,
) -> ParseResult<Option<CriterionNode>> {
    let value = parser.parse_value(context, input)?;
    if !value.kind.is_geo_area() {
        return Err(ParseError::BadInput(format!(
            "{key} expects a geographic area value, got {}",
            value.kind.name()
        )));
    }
    Ok(Some(CriterionNode::new(
        context.clone(),
        CriterionKind::Inside(value),
    )))
}

fn parse_last_activity_date(
    parser: &SegmentationDslParser,
    context: &ParsingContext,
    key: &str,
    input: &Value,
) -> ParseResult<Option<CriterionNode>> {
    let date_comparison = match input {
        Value::Null => None,
        _ => {
            let object = expect_object(key, input)?;
            let child_context = context.with_data_source(DataSource::last_activity_date(
                context.data_source.clone(),
            ));
            Some(Box::new(parser.parse_criterion(&child_context, object)?))
        }
    };
    Ok(Some(CriterionNode::new(
        context.clone(),
        CriterionKind::LastActivityDate { date_comparison },
    )))
}

fn parse_presence(
    parser: &SegmentationDslParser,
    context: &ParsingContext,
    key: &str,
    input: &Value,
) -> ParseResult<Option<CriterionNode>> {
    if !matches!(context.data_source.root(), DataSource::Installation) {
        return Err(ParseError::BadInput(format!(
            "{key} criteria only apply to installation data"
        )));
    }
    let object = expect_object(key, input)?;
    let present = object
        .get("present")
        .and_then(Value::as_bool)
        .ok_or_else(|| {
            ParseError::BadInput(format!("{key} requires a boolean \"present\" flag"))
        })?;

    let since_date = parse_presence_comparison(
        parser,
        context,
        object,
        "sinceDate",
        DataSource::presence_since_date(context.data_source.clone(), present),
    )?;
    let elapsed_time = parse_presence_comparison(
        parser,
        context,
        object,
        "elapsedTime",
        DataSource::presence_elapsed_time(context.data_source.clone(), present),
    )?;

    Ok(Some(CriterionNode::new(
        context.clone(),
        CriterionKind::Presence {
            present,
            since_date,
            elapsed_time,
        },
    )))
}

fn parse_presence_comparison(
    parser: &SegmentationDslParser,
    context: &ParsingContext,
    object: &Map<String, Value>,
    field: &str,
    source: DataSource,
) -> ParseResult<Option<Box<CriterionNode>>> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(comparison) => {
            let comparison_object = expect_object(field, comparison)?;
            let child_context = context.with_data_source(source);
            let node = parser.parse_criterion(&child_context, comparison_object)?;
            Ok(Some(Box::new(node)))
        }
    }
}

fn parse_geo(
    parser: &SegmentationDslParser,
    context: &ParsingContext,
    key: &str,
    input: &Value,
) -> ParseResult<Option<CriterionNode>> {
    let object = expect_object(key, input)?;

    let location_comparison = match object.get("location") {
        None | Some(Value::Null) => None,
        Some(comparison) => {
            let comparison_object = expect_object("location", comparison)?;
            let child_context = context
                .with_data_source(DataSource::geo_location(context.data_source.clone()));
            Some(Box::new(parser.parse_criterion(&child_context, comparison_object)?))
        }
    };
    let date_comparison = match object.get("date") {
        None | Some(Value::Null) => None,
        Some(comparison) => {
            let comparison_object = expect_object("date", comparison)?;
            let child_context =
                context.with_data_source(DataSource::geo_date(context.data_source.clone()));
            Some(Box::new(parser.parse_criterion(&child_context, comparison_object)?))
        }
    };

    Ok(Some(CriterionNode::new(
        context.clone(),
        CriterionKind::Geo {
            location_comparison,
            date_comparison,
        },
    )))
}

fn parse_subscription_status(
    _parser: &SegmentationDslParser,
    context: &ParsingContext,
    key: &str,
    input: &Value,
) -> ParseResult<Option<CriterionNode>> {
    let token = expect_string(key, input)?;
    let status = SubscriptionStatus::parse(token).ok_or_else(|| {
        ParseError::BadInput(format!("invalid subscription status: {token}"))
    })?;
    Ok(Some(CriterionNode::new(
        context.clone(),
        CriterionKind::SubscriptionStatus(status),
    )))
}

fn parse_join_installation(
    parser: &SegmentationDslParser,
    context: &ParsingContext,
    key: &str,
    input: &Value,
) -> ParseResult<Option<CriterionNode>> {
    parse_join(parser, context, key, input, DataSource::Installation)
}

fn parse_join_user(
    parser: &SegmentationDslParser,
    context: &ParsingContext,
    key: &str,
    input: &Value,
) -> ParseResult<Option<CriterionNode>> {
    parse_join(parser, context, key, input, DataSource::User)
}

fn parse_join_event(
    parser: &SegmentationDslParser,
    context: &ParsingContext,
    key: &str,
    input: &Value,
) -> ParseResult<Option<CriterionNode>> {
    parse_join(parser, context, key, input, DataSource::Event)
}

fn parse_join(
    parser: &SegmentationDslParser,
    context: &ParsingContext,
    key: &str,
    input: &Value,
    target: DataSource,
) -> ParseResult<Option<CriterionNode>> {
    let object = expect_object(key, input)?;
    let child_context = context.with_data_source(target);
    let child = parser.parse_criterion(&child_context, object)?;
    Ok(Some(CriterionNode::new(
        context.clone(),
        CriterionKind::Join(Box::new(child)),
    )))
}

/// Dynamic fallback: keys starting with `.` address a field of the
/// current data source; the nested object is parsed in that field scope.
fn parse_field_access(
    parser: &SegmentationDslParser,
    context: &ParsingContext,
    key: &str,
    input: &Value,
) -> ParseResult<Option<CriterionNode>> {
    let Some(path) = key.strip_prefix('.') else {
        return Ok(None);
    };
    let object = expect_object(key, input)?;
    let source = DataSource::field(context.data_source.clone(), FieldPath::parse(path));
    let child_context = context.with_data_source(source);
    parser.parse_criterion(&child_context, object).map(Some)
}

// === Value parsers ===

fn parse_date(
    _parser: &SegmentationDslParser,
    context: &ParsingContext,
    key: &str,
    input: &Value,
) -> ParseResult<Option<ValueNode>> {
    let epoch_ms = match input {
        Value::Number(n) => number_to_epoch_ms(key, n)?,
        Value::String(s) => parse_absolute_date(s)
            .ok_or_else(|| ParseError::BadInput(format!("unparseable date: {s}")))?,
        _ => {
            return Err(ParseError::BadInput(format!(
                "{key} expects an epoch-milliseconds number or a date string"
            )))
        }
    };
    Ok(Some(ValueNode::new(
        context.clone(),
        ValueKind::Date(epoch_ms),
    )))
}

fn parse_relative_date(
    _parser: &SegmentationDslParser,
    context: &ParsingContext,
    key: &str,
    input: &Value,
) -> ParseResult<Option<ValueNode>> {
    let token = expect_string(key, input)?;
    let duration = Iso8601Duration::parse(token)?;
    Ok(Some(ValueNode::new(
        context.clone(),
        ValueKind::RelativeDate(duration),
    )))
}

fn parse_duration(
    _parser: &SegmentationDslParser,
    context: &ParsingContext,
    key: &str,
    input: &Value,
) -> ParseResult<Option<ValueNode>> {
    let duration = match input {
        Value::String(s) => Iso8601Duration::parse(s)?,
        Value::Number(n) => Iso8601Duration::from_millis(n.as_f64().unwrap_or(0.0)),
        _ => {
            return Err(ParseError::BadInput(format!(
                "{key} expects an ISO 8601 string or a number of milliseconds"
            )))
        }
    };
    Ok(Some(ValueNode::new(
        context.clone(),
        ValueKind::Duration(duration),
    )))
}

fn parse_geolocation(
    _parser: &SegmentationDslParser,
    context: &ParsingContext,
    key: &str,
    input: &Value,
) -> ParseResult<Option<ValueNode>> {
    let location = parse_geolocation_shape(key, input)?;
    Ok(Some(ValueNode::new(
        context.clone(),
        ValueKind::GeoLocation(location),
    )))
}

fn parse_geobox(
    _parser: &SegmentationDslParser,
    context: &ParsingContext,
    key: &str,
    input: &Value,
) -> ParseResult<Option<ValueNode>> {
    let geo_box = match input {
        Value::Object(object) => GeoBox::new(
            field_f64(key, object, "top")?,
            field_f64(key, object, "right")?,
            field_f64(key, object, "bottom")?,
            field_f64(key, object, "left")?,
        ),
        Value::String(hash) => geohash::decode(hash)?,
        _ => {
            return Err(ParseError::BadInput(format!(
                "{key} expects top/right/bottom/left bounds or a geohash string"
            )))
        }
    };
    Ok(Some(ValueNode::new(
        context.clone(),
        ValueKind::GeoBox(geo_box),
    )))
}

fn parse_geocircle(
    _parser: &SegmentationDslParser,
    context: &ParsingContext,
    key: &str,
    input: &Value,
) -> ParseResult<Option<ValueNode>> {
    let object = expect_object(key, input)?;
    let radius = field_f64(key, object, "radius")?;
    let center_input = object
        .get("center")
        .ok_or_else(|| ParseError::BadInput(format!("{key} requires a center")))?;
    let center = parse_geolocation_shape(key, center_input)?;
    Ok(Some(ValueNode::new(
        context.clone(),
        ValueKind::GeoCircle(GeoCircle::new(center, radius)),
    )))
}

fn parse_geopolygon(
    _parser: &SegmentationDslParser,
    context: &ParsingContext,
    key: &str,
    input: &Value,
) -> ParseResult<Option<ValueNode>> {
    let items = expect_array(key, input)?;
    if items.len() < 3 {
        return Err(ParseError::BadInput(format!(
            "{key} requires at least 3 vertices, got {}",
            items.len()
        )));
    }
    let points = items
        .iter()
        .map(|item| parse_geolocation_shape(key, item))
        .collect::<ParseResult<Vec<_>>>()?;
    Ok(Some(ValueNode::new(
        context.clone(),
        ValueKind::GeoPolygon(GeoPolygon::new(points)),
    )))
}

// === Shared helpers ===

fn parse_criterion_list(
    parser: &SegmentationDslParser,
    context: &ParsingContext,
    key: &str,
    input: &Value,
) -> ParseResult<Vec<CriterionNode>> {
    let items = expect_array(key, input)?;
    items
        .iter()
        .map(|item| {
            let object = expect_object(key, item)?;
            parser.parse_criterion(context, object)
        })
        .collect()
}

fn parse_value_list(
    parser: &SegmentationDslParser,
    context: &ParsingContext,
    key: &str,
    input: &Value,
) -> ParseResult<Vec<ValueNode>> {
    let items = expect_array(key, input)?;
    items
        .iter()
        .map(|item| parser.parse_value(context, item))
        .collect()
}

fn parse_geolocation_shape(key: &str, input: &Value) -> ParseResult<GeoLocation> {
    match input {
        Value::Object(object) => Ok(GeoLocation::new(
            field_f64(key, object, "lat")?,
            field_f64(key, object, "lon")?,
        )),
        Value::String(hash) => {
            let geo_box = geohash::decode(hash)?;
            Ok(GeoLocation::new(geo_box.center_lat(), geo_box.center_lon()))
        }
        _ => Err(ParseError::BadInput(format!(
            "{key} expects an object with lat/lon or a geohash string"
        ))),
    }
}

fn expect_object<'a>(key: &str, input: &'a Value) -> ParseResult<&'a Map<String, Value>> {
    input
        .as_object()
        .ok_or_else(|| ParseError::BadInput(format!("{key} expects an object, got: {input}")))
}

fn expect_array<'a>(key: &str, input: &'a Value) -> ParseResult<&'a Vec<Value>> {
    input
        .as_array()
        .ok_or_else(|| ParseError::BadInput(format!("{key} expects an array, got: {input}")))
}

fn expect_string<'a>(key: &str, input: &'a Value) -> ParseResult<&'a str> {
    input
        .as_str()
        .ok_or_else(|| ParseError::BadInput(format!("{key} expects a string, got: {input}")))
}

fn field_f64(key: &str, object: &Map<String, Value>, field: &str) -> ParseResult<f64> {
    object
        .get(field)
        .and_then(Value::as_f64)
        .ok_or_else(|| ParseError::BadInput(format!("{key} requires a numeric {field}")))
}

fn number_to_epoch_ms(key: &str, n: &serde_json::Number) -> ParseResult<i64> {
    n.as_i64()
        .or_else(|| n.as_f64().map(|f| f.round() as i64))
        .ok_or_else(|| ParseError::BadInput(format!("{key} expects a numeric timestamp")))
}

/// Parse the truncated ISO 8601 date family: `yyyy`, `yyyy-MM`,
/// `yyyy-MM-dd`, `yyyy-MM-ddTHH`, down to milliseconds, with an optional
/// trailing `Z` or numeric UTC offset. Missing components default to the
/// start of the period, a missing zone to UTC.
pub fn parse_absolute_date(input: &str) -> Option<i64> {
    const TEMPLATE: &str = "1970-01-01T00:00:00.000";
    const VALID_LENGTHS: [usize; 9] = [4, 7, 10, 13, 16, 19, 21, 22, 23];

    let (body, offset_minutes) = split_zone(input)?;
    if !VALID_LENGTHS.contains(&body.len()) {
        return None;
    }
    let padded = format!("{body}{}", &TEMPLATE[body.len()..]);
    let naive = chrono::NaiveDateTime::parse_from_str(&padded, "%Y-%m-%dT%H:%M:%S%.3f").ok()?;
    Some(naive.and_utc().timestamp_millis() - offset_minutes * 60_000)
}

fn split_zone(input: &str) -> Option<(&str, i64)> {
    if let Some(body) = input.strip_suffix('Z') {
        return Some((body, 0));
    }
    // A numeric offset can only follow the time part; the date part's
    // dashes must not be mistaken for a sign.
    if let Some(t_pos) = input.find('T') {
        if let Some(sign_rel) = input[t_pos..].rfind(['+', '-']) {
            if sign_rel > 0 {
                let sign_pos = t_pos + sign_rel;
                let offset = parse_zone_offset(&input[sign_pos..])?;
                return Some((&input[..sign_pos], offset));
            }
        }
    }
    Some((input, 0))
}

fn parse_zone_offset(zone: &str) -> Option<i64> {
    let (sign, rest) = match zone.strip_prefix('+') {
        Some(rest) => (1, rest),
        None => (-1, zone.strip_prefix('-')?),
    };
    let digits = rest.replace(':', "");
    let (hours, minutes): (i64, i64) = match digits.len() {
        2 => (digits.parse().ok()?, 0),
        4 => (digits[..2].parse().ok()?, digits[2..].parse().ok()?),
        _ => return None,
    };
    if hours > 14 || minutes > 59 {
        return None;
    }
    Some(sign * (hours * 60 + minutes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn strict() -> &'static SegmentationDslParser {
        SegmentationDslParser::default_throwing_parser()
    }

    fn parse(input: Value) -> ParseResult<CriterionNode> {
        strict().parse(&input, DataSource::Installation)
    }

    #[test]
    fn test_and_or_not_shapes() {
        let node = parse(json!({"and": [{}, {}]})).unwrap();
        assert!(matches!(node.kind, CriterionKind::And(children) if children.len() == 2));

        let node = parse(json!({"or": []})).unwrap();
        assert!(matches!(node.kind, CriterionKind::Or(children) if children.is_empty()));

        let node = parse(json!({"not": {}})).unwrap();
        assert!(matches!(node.kind, CriterionKind::Not(_)));

        assert!(matches!(
            parse(json!({"and": {}})),
            Err(ParseError::BadInput(_))
        ));
        assert!(matches!(
            parse(json!({"not": [1]})),
            Err(ParseError::BadInput(_))
        ));
    }

    #[test]
    fn test_field_access_scopes_context() {
        let node = parse(json!({".custom.string_foo": {"eq": "bar"}})).unwrap();
        match &node.kind {
            CriterionKind::Eq(value) => {
                assert!(matches!(&value.kind, ValueKind::String(s) if s == "bar"));
            }
            other => panic!("expected eq node, got {}", other.name()),
        }
        assert_eq!(
            node.context.data_source.full_path().parts,
            vec!["custom", "string_foo"]
        );
        assert_eq!(node.context.data_source.root(), &DataSource::Installation);
    }

    #[test]
    fn test_field_criterion_requires_object_input() {
        assert!(matches!(
            parse(json!({".field": "scalar"})),
            Err(ParseError::BadInput(_))
        ));
    }

    #[test]
    fn test_comparators_parse_and_unknown_key_fails() {
        for key in ["gt", "gte", "lt", "lte"] {
            let node = parse(json!({ key: 10 })).unwrap();
            match node.kind {
                CriterionKind::Comparison { comparator, .. } => {
                    assert_eq!(comparator.as_str(), key);
                }
                other => panic!("expected comparison, got {}", other.name()),
            }
        }
        // Not part of the comparator token set.
        assert!(matches!(
            parse(json!({"geq": 10})),
            Err(ParseError::UnknownCriterion(_))
        ));
    }

    #[test]
    fn test_prefix_requires_string_value() {
        assert!(parse(json!({"prefix": "unit_"})).is_ok());
        assert!(matches!(
            parse(json!({"prefix": 12})),
            Err(ParseError::BadInput(_))
        ));
    }

    #[test]
    fn test_inside_requires_area_value() {
        let node = parse(json!({"inside": {"geobox": {
            "top": 1.0, "right": 1.0, "bottom": 0.0, "left": 0.0
        }}}))
        .unwrap();
        assert!(matches!(node.kind, CriterionKind::Inside(_)));

        assert!(matches!(
            parse(json!({"inside": {"geolocation": {"lat": 0.0, "lon": 0.0}}})),
            Err(ParseError::BadInput(_))
        ));
        assert!(matches!(
            parse(json!({"inside": 42})),
            Err(ParseError::BadInput(_))
        ));
    }

    #[test]
    fn test_subscription_status_tokens() {
        for (token, status) in [
            ("optIn", SubscriptionStatus::OptIn),
            ("optOut", SubscriptionStatus::OptOut),
            ("softOptOut", SubscriptionStatus::SoftOptOut),
        ] {
            let node = parse(json!({ "subscriptionStatus": token })).unwrap();
            assert!(matches!(
                node.kind,
                CriterionKind::SubscriptionStatus(s) if s == status
            ));
        }
        assert!(matches!(
            parse(json!({"subscriptionStatus": "optin"})),
            Err(ParseError::BadInput(_))
        ));
    }

    #[test]
    fn test_presence_parses_axes() {
        let node = parse(json!({"presence": {
            "present": true,
            "sinceDate": {"gte": {"date": 1_600_000_000_000_i64}},
        }}))
        .unwrap();
        match node.kind {
            CriterionKind::Presence {
                present,
                since_date,
                elapsed_time,
            } => {
                assert!(present);
                assert!(since_date.is_some());
                assert!(elapsed_time.is_none());
            }
            other => panic!("expected presence, got {}", other.name()),
        }

        assert!(matches!(
            parse(json!({"presence": {}})),
            Err(ParseError::BadInput(_))
        ));
    }

    #[test]
    fn test_presence_rejected_outside_installation_scope() {
        let result = strict().parse(
            &json!({"event": {"presence": {"present": true}}}),
            DataSource::Installation,
        );
        assert!(matches!(result, Err(ParseError::BadInput(_))));
    }

    #[test]
    fn test_geo_criterion_wires_sub_sources() {
        let node = parse(json!({"geo": {
            "location": {"inside": {"geocircle": {
                "radius": 1000.0, "center": {"lat": 48.85, "lon": 2.35}
            }}},
            "date": {"gte": {"relativeDate": "-P7D"}},
        }}))
        .unwrap();
        match &node.kind {
            CriterionKind::Geo {
                location_comparison,
                date_comparison,
            } => {
                let location = location_comparison.as_ref().unwrap();
                assert!(matches!(
                    location.context.data_source,
                    DataSource::GeoLocation { .. }
                ));
                let date = date_comparison.as_ref().unwrap();
                assert!(matches!(
                    date.context.data_source,
                    DataSource::GeoDate { .. }
                ));
            }
            other => panic!("expected geo, got {}", other.name()),
        }
    }

    #[test]
    fn test_join_wraps_child_with_new_root() {
        let node = parse(json!({"event": {".type": {"eq": "purchase"}}})).unwrap();
        match &node.kind {
            CriterionKind::Join(child) => {
                assert_eq!(child.context.data_source.root(), &DataSource::Event);
            }
            other => panic!("expected join, got {}", other.name()),
        }
    }

    #[test]
    fn test_last_activity_date_sub_comparison() {
        let node = parse(json!({"lastActivityDate": {"gte": {"date": "2020-01-01"}}})).unwrap();
        match &node.kind {
            CriterionKind::LastActivityDate { date_comparison } => {
                let comparison = date_comparison.as_ref().unwrap();
                assert!(matches!(
                    comparison.context.data_source,
                    DataSource::LastActivityDate { .. }
                ));
            }
            other => panic!("expected lastActivityDate, got {}", other.name()),
        }
    }

    #[test]
    fn test_date_value_forms() {
        let node = parse(json!({"eq": {"date": 1_600_000_000_000_i64}})).unwrap();
        match &node.kind {
            CriterionKind::Eq(value) => {
                assert!(matches!(value.kind, ValueKind::Date(1_600_000_000_000)));
            }
            other => panic!("expected eq, got {}", other.name()),
        }

        assert!(matches!(
            parse(json!({"eq": {"date": "not a date"}})),
            Err(ParseError::BadInput(_))
        ));
    }

    #[test]
    fn test_relative_date_and_duration_values() {
        let node = parse(json!({"gte": {"relativeDate": "-P7D"}})).unwrap();
        match &node.kind {
            CriterionKind::Comparison { value, .. } => {
                assert!(matches!(value.kind, ValueKind::RelativeDate(_)));
            }
            other => panic!("expected comparison, got {}", other.name()),
        }

        let node = parse(json!({"lt": {"duration": "PT1H"}})).unwrap();
        assert!(matches!(
            node.kind,
            CriterionKind::Comparison { value: ValueNode { kind: ValueKind::Duration(_), .. }, .. }
        ));

        let node = parse(json!({"lt": {"duration": 1500}})).unwrap();
        match node.kind {
            CriterionKind::Comparison { value, .. } => match value.kind {
                ValueKind::Duration(d) => assert_eq!(d.apply_to(0), 1_500),
                other => panic!("expected duration, got {}", other.name()),
            },
            other => panic!("expected comparison, got {}", other.name()),
        }

        assert!(matches!(
            parse(json!({"gte": {"relativeDate": "P"}})),
            Err(ParseError::BadInput(_))
        ));
    }

    #[test]
    fn test_geobox_value_from_geohash() {
        let node = parse(json!({"inside": {"geobox": "ezs42"}})).unwrap();
        match &node.kind {
            CriterionKind::Inside(value) => match &value.kind {
                ValueKind::GeoBox(b) => assert!(b.top > b.bottom),
                other => panic!("expected geobox, got {}", other.name()),
            },
            other => panic!("expected inside, got {}", other.name()),
        }

        assert!(matches!(
            parse(json!({"inside": {"geobox": "ilo"}})),
            Err(ParseError::BadInput(_))
        ));
    }

    #[test]
    fn test_geopolygon_requires_three_vertices() {
        assert!(parse(json!({"inside": {"geopolygon": [
            {"lat": 0.0, "lon": 0.0},
            {"lat": 0.0, "lon": 10.0},
            {"lat": 10.0, "lon": 10.0},
        ]}}))
        .is_ok());
        assert!(matches!(
            parse(json!({"inside": {"geopolygon": [
                {"lat": 0.0, "lon": 0.0},
                {"lat": 0.0, "lon": 10.0},
            ]}})),
            Err(ParseError::BadInput(_))
        ));
    }

    #[test]
    fn test_parse_absolute_date_truncated_forms() {
        let full = parse_absolute_date("2020-02-03T04:05:06.007Z").unwrap();
        assert_eq!(full, 1_580_702_706_007);

        assert_eq!(parse_absolute_date("2020").unwrap(), 1_577_836_800_000);
        assert_eq!(parse_absolute_date("2020-02").unwrap(), 1_580_515_200_000);
        assert_eq!(
            parse_absolute_date("2020-02-03").unwrap(),
            1_580_688_000_000
        );
        assert_eq!(
            parse_absolute_date("2020-02-03T04").unwrap(),
            1_580_702_400_000
        );
        // Fractional seconds pad to milliseconds.
        assert_eq!(
            parse_absolute_date("2020-02-03T04:05:06.5").unwrap(),
            1_580_702_706_500
        );
    }

    #[test]
    fn test_parse_absolute_date_with_offsets() {
        let utc = parse_absolute_date("2020-02-03T04:05:06Z").unwrap();
        assert_eq!(parse_absolute_date("2020-02-03T06:05:06+02:00").unwrap(), utc);
        assert_eq!(parse_absolute_date("2020-02-03T06:05:06+0200").unwrap(), utc);
        assert_eq!(parse_absolute_date("2020-02-03T02:05:06-02").unwrap(), utc);
    }

    #[test]
    fn test_parse_absolute_date_rejects_garbage() {
        for input in ["", "20", "2020-13-01", "not a date", "2020-02-03T25", "2020Z0"] {
            assert!(parse_absolute_date(input).is_none(), "{input:?} parsed");
        }
    }
}
