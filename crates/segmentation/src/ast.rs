//! Typed AST for segment definitions: boolean-producing criterion nodes
//! and the literal or derived values they operate on.

use pushpulse_core::{GeoBox, GeoCircle, GeoLocation, GeoPolygon, Iso8601Duration};
use serde_json::Value;

use crate::parser::ParsingContext;

/// A value operand. The context records which data-source scope the node
/// was parsed under.
#[derive(Debug, Clone)]
pub struct ValueNode {
    pub context: ParsingContext,
    pub kind: ValueKind,
}

impl ValueNode {
    pub fn new(context: ParsingContext, kind: ValueKind) -> Self {
        Self { context, kind }
    }
}

#[derive(Debug, Clone)]
pub enum ValueKind {
    /// A syntactically well-formed value the grammar does not recognize.
    /// Preserved verbatim for forward compatibility.
    Unknown { key: String, value: Value },
    Null,
    Boolean(bool),
    Number(serde_json::Number),
    String(String),
    /// Absolute instant, epoch milliseconds.
    Date(i64),
    /// A duration offset resolved against "now" at evaluation time.
    RelativeDate(Iso8601Duration),
    Duration(Iso8601Duration),
    GeoLocation(GeoLocation),
    GeoBox(GeoBox),
    GeoCircle(GeoCircle),
    GeoPolygon(GeoPolygon),
}

impl ValueKind {
    pub fn name(&self) -> &'static str {
        match self {
            ValueKind::Unknown { .. } => "unknown",
            ValueKind::Null => "null",
            ValueKind::Boolean(_) => "boolean",
            ValueKind::Number(_) => "number",
            ValueKind::String(_) => "string",
            ValueKind::Date(_) => "date",
            ValueKind::RelativeDate(_) => "relativeDate",
            ValueKind::Duration(_) => "duration",
            ValueKind::GeoLocation(_) => "geolocation",
            ValueKind::GeoBox(_) => "geobox",
            ValueKind::GeoCircle(_) => "geocircle",
            ValueKind::GeoPolygon(_) => "geopolygon",
        }
    }

    /// Whether this value is one of the geographic area types accepted by
    /// the `inside` criterion.
    pub fn is_geo_area(&self) -> bool {
        matches!(
            self,
            ValueKind::GeoBox(_) | ValueKind::GeoCircle(_) | ValueKind::GeoPolygon(_)
        )
    }
}

/// A boolean-producing node of the segmentation AST.
#[derive(Debug, Clone)]
pub struct CriterionNode {
    pub context: ParsingContext,
    pub kind: CriterionKind,
}

impl CriterionNode {
    pub fn new(context: ParsingContext, kind: CriterionKind) -> Self {
        Self { context, kind }
    }
}

#[derive(Debug, Clone)]
pub enum CriterionKind {
    MatchAll,
    /// Unrecognized criterion key, kept for introspection. Always
    /// evaluates to false.
    Unknown { key: String, value: Value },
    And(Vec<CriterionNode>),
    Or(Vec<CriterionNode>),
    Not(Box<CriterionNode>),
    /// Existential equality over the resolved field values.
    Eq(ValueNode),
    /// Set intersection between resolved field values and the given set.
    Any(Vec<ValueNode>),
    /// Every given value must be present among the resolved field values.
    All(Vec<ValueNode>),
    Comparison {
        comparator: Comparator,
        value: ValueNode,
    },
    Prefix(ValueNode),
    Inside(ValueNode),
    LastActivityDate {
        date_comparison: Option<Box<CriterionNode>>,
    },
    Presence {
        present: bool,
        since_date: Option<Box<CriterionNode>>,
        elapsed_time: Option<Box<CriterionNode>>,
    },
    Geo {
        location_comparison: Option<Box<CriterionNode>>,
        date_comparison: Option<Box<CriterionNode>>,
    },
    SubscriptionStatus(SubscriptionStatus),
    /// Re-scopes evaluation to the child's data-source root, e.g. from
    /// the installation to each of its events.
    Join(Box<CriterionNode>),
}

impl CriterionKind {
    pub fn name(&self) -> &'static str {
        match self {
            CriterionKind::MatchAll => "matchAll",
            CriterionKind::Unknown { .. } => "unknown",
            CriterionKind::And(_) => "and",
            CriterionKind::Or(_) => "or",
            CriterionKind::Not(_) => "not",
            CriterionKind::Eq(_) => "eq",
            CriterionKind::Any(_) => "any",
            CriterionKind::All(_) => "all",
            CriterionKind::Comparison { comparator, .. } => comparator.as_str(),
            CriterionKind::Prefix(_) => "prefix",
            CriterionKind::Inside(_) => "inside",
            CriterionKind::LastActivityDate { .. } => "lastActivityDate",
            CriterionKind::Presence { .. } => "presence",
            CriterionKind::Geo { .. } => "geo",
            CriterionKind::SubscriptionStatus(_) => "subscriptionStatus",
            CriterionKind::Join(_) => "join",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Comparator {
    /// Case-sensitive exact match; anything else is not a comparator.
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "gt" => Some(Comparator::Gt),
            "gte" => Some(Comparator::Gte),
            "lt" => Some(Comparator::Lt),
            "lte" => Some(Comparator::Lte),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Comparator::Gt => "gt",
            Comparator::Gte => "gte",
            Comparator::Lt => "lt",
            Comparator::Lte => "lte",
        }
    }

    pub fn accepts(&self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            Comparator::Gt => ordering == Greater,
            Comparator::Gte => ordering != Less,
            Comparator::Lt => ordering == Less,
            Comparator::Lte => ordering != Greater,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    OptIn,
    OptOut,
    /// Subscribed but muted; distinct from both full opt-in and opt-out.
    SoftOptOut,
}

impl SubscriptionStatus {
    pub fn parse(input: &str) -> Option<Self> {
        match input {
            "optIn" => Some(SubscriptionStatus::OptIn),
            "optOut" => Some(SubscriptionStatus::OptOut),
            "softOptOut" => Some(SubscriptionStatus::SoftOptOut),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::OptIn => "optIn",
            SubscriptionStatus::OptOut => "optOut",
            SubscriptionStatus::SoftOptOut => "softOptOut",
        }
    }
}
