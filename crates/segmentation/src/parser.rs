//! Table-driven DSL parsing: a registry of exact-key and dynamic-fallback
//! parser functions, assembled once into an immutable configuration and
//! shared across threads.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::ast::{CriterionKind, CriterionNode, ValueKind, ValueNode};
use crate::data_source::DataSource;
use crate::error::{ParseError, ParseResult};
use crate::grammar;

/// The scope a node is being parsed under. Contexts are immutable and
/// copied at every descent; the active parser is threaded alongside as an
/// argument instead of being stored here.
#[derive(Debug, Clone)]
pub struct ParsingContext {
    pub parent: Option<Box<ParsingContext>>,
    pub data_source: DataSource,
}

impl ParsingContext {
    pub fn root(data_source: DataSource) -> Self {
        Self {
            parent: None,
            data_source,
        }
    }

    /// Child context used when descending into a join or nested field.
    pub fn with_data_source(&self, data_source: DataSource) -> Self {
        Self {
            parent: Some(Box::new(self.clone())),
            data_source,
        }
    }
}

pub type CriterionParserFn = Box<
    dyn Fn(
            &SegmentationDslParser,
            &ParsingContext,
            &str,
            &Value,
        ) -> ParseResult<Option<CriterionNode>>
        + Send
        + Sync,
>;

pub type ValueParserFn = Box<
    dyn Fn(&SegmentationDslParser, &ParsingContext, &str, &Value) -> ParseResult<Option<ValueNode>>
        + Send
        + Sync,
>;

/// Criterion registry: exact-key parsers first, then dynamic fallbacks in
/// registration order. Exact match always wins over dynamic fallback.
#[derive(Default)]
pub struct ConfigurableCriterionNodeParser {
    exact: HashMap<String, CriterionParserFn>,
    dynamic: Vec<CriterionParserFn>,
}

impl ConfigurableCriterionNodeParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registering the same key twice is a programmer error.
    pub fn register_exact_name_parser(&mut self, key: &str, parser: CriterionParserFn) {
        let previous = self.exact.insert(key.to_string(), parser);
        debug_assert!(previous.is_none(), "duplicate criterion parser for {key}");
    }

    pub fn register_dynamic_name_parser(&mut self, parser: CriterionParserFn) {
        self.dynamic.push(parser);
    }

    /// Resolve one `(key, input)` pair. An exact parser's verdict is
    /// final, even when it declines; otherwise the first dynamic parser
    /// producing a node wins. `Ok(None)` means no parser recognized the
    /// key, and the caller decides whether that is an error.
    pub fn parse_criterion(
        &self,
        parser: &SegmentationDslParser,
        context: &ParsingContext,
        key: &str,
        input: &Value,
    ) -> ParseResult<Option<CriterionNode>> {
        if let Some(exact) = self.exact.get(key) {
            return exact(parser, context, key, input);
        }
        for dynamic in &self.dynamic {
            if let Some(node) = dynamic(parser, context, key, input)? {
                return Ok(Some(node));
            }
        }
        Ok(None)
    }
}

/// Value registry, symmetric to the criterion registry.
#[derive(Default)]
pub struct ConfigurableValueNodeParser {
    exact: HashMap<String, ValueParserFn>,
    dynamic: Vec<ValueParserFn>,
}

impl ConfigurableValueNodeParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_exact_name_parser(&mut self, key: &str, parser: ValueParserFn) {
        let previous = self.exact.insert(key.to_string(), parser);
        debug_assert!(previous.is_none(), "duplicate value parser for {key}");
    }

    pub fn register_dynamic_name_parser(&mut self, parser: ValueParserFn) {
        self.dynamic.push(parser);
    }

    pub fn parse_value(
        &self,
        parser: &SegmentationDslParser,
        context: &ParsingContext,
        key: &str,
        input: &Value,
    ) -> ParseResult<Option<ValueNode>> {
        if let Some(exact) = self.exact.get(key) {
            return exact(parser, context, key, input);
        }
        for dynamic in &self.dynamic {
            if let Some(node) = dynamic(parser, context, key, input)? {
                return Ok(Some(node));
            }
        }
        Ok(None)
    }
}

/// What to do with grammar the registries do not recognize. Production
/// uses `Lenient` so server-authored segments written against a newer
/// grammar degrade to non-matching instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownPolicy {
    Lenient,
    Strict,
}

/// Immutable parser configuration, built once at startup.
#[derive(Clone)]
pub struct ParserConfig {
    pub criterion_parser: Arc<ConfigurableCriterionNodeParser>,
    pub value_parser: Arc<ConfigurableValueNodeParser>,
    pub unknown_criterion_policy: UnknownPolicy,
    pub unknown_value_policy: UnknownPolicy,
}

impl ParserConfig {
    pub fn new(
        criterion_parser: Arc<ConfigurableCriterionNodeParser>,
        value_parser: Arc<ConfigurableValueNodeParser>,
        unknown_criterion_policy: UnknownPolicy,
        unknown_value_policy: UnknownPolicy,
    ) -> Self {
        Self {
            criterion_parser,
            value_parser,
            unknown_criterion_policy,
            unknown_value_policy,
        }
    }
}

pub struct SegmentationDslParser {
    pub config: ParserConfig,
}

impl SegmentationDslParser {
    pub fn new(config: ParserConfig) -> Self {
        Self { config }
    }

    /// Shared lenient parser over the default grammar.
    pub fn default_parser() -> &'static SegmentationDslParser {
        static PARSER: OnceLock<SegmentationDslParser> = OnceLock::new();
        PARSER.get_or_init(|| {
            SegmentationDslParser::new(grammar::default_config(UnknownPolicy::Lenient))
        })
    }

    /// Shared strict parser, for validation tooling and tests.
    pub fn default_throwing_parser() -> &'static SegmentationDslParser {
        static PARSER: OnceLock<SegmentationDslParser> = OnceLock::new();
        PARSER.get_or_init(|| {
            SegmentationDslParser::new(grammar::default_config(UnknownPolicy::Strict))
        })
    }

    /// Parse a top-level segment definition rooted at `data_source`. The
    /// input must be a JSON object whatever the unknown-key policy is.
    pub fn parse(&self, input: &Value, data_source: DataSource) -> ParseResult<CriterionNode> {
        let Value::Object(object) = input else {
            return Err(ParseError::BadInput(format!(
                "segment definition must be a JSON object, got: {input}"
            )));
        };
        let context = ParsingContext::root(data_source);
        self.parse_criterion(&context, object)
    }

    /// An empty object matches everything; an object with several keys is
    /// an implicit AND of its single-key criteria.
    pub fn parse_criterion(
        &self,
        context: &ParsingContext,
        object: &Map<String, Value>,
    ) -> ParseResult<CriterionNode> {
        match object.iter().next() {
            None => Ok(CriterionNode::new(context.clone(), CriterionKind::MatchAll)),
            Some((key, input)) if object.len() == 1 => {
                self.parse_criterion_entry(context, key, input)
            }
            Some(_) => {
                let children = object
                    .iter()
                    .map(|(key, input)| self.parse_criterion_entry(context, key, input))
                    .collect::<ParseResult<Vec<_>>>()?;
                Ok(CriterionNode::new(
                    context.clone(),
                    CriterionKind::And(children),
                ))
            }
        }
    }

    fn parse_criterion_entry(
        &self,
        context: &ParsingContext,
        key: &str,
        input: &Value,
    ) -> ParseResult<CriterionNode> {
        let parsed = self
            .config
            .criterion_parser
            .parse_criterion(self, context, key, input);
        match parsed {
            Ok(Some(node)) => Ok(node),
            Ok(None) => match self.config.unknown_criterion_policy {
                UnknownPolicy::Strict => Err(ParseError::UnknownCriterion(key.to_string())),
                UnknownPolicy::Lenient => {
                    debug!(key, "unrecognized criterion, keeping as inert node");
                    Ok(self.unknown_criterion(context, key, input))
                }
            },
            Err(err) => match self.config.unknown_criterion_policy {
                UnknownPolicy::Strict => Err(err),
                UnknownPolicy::Lenient => {
                    warn!(key, error = %err, "malformed criterion, keeping as inert node");
                    Ok(self.unknown_criterion(context, key, input))
                }
            },
        }
    }

    fn unknown_criterion(&self, context: &ParsingContext, key: &str, input: &Value) -> CriterionNode {
        CriterionNode::new(
            context.clone(),
            CriterionKind::Unknown {
                key: key.to_string(),
                value: input.clone(),
            },
        )
    }

    /// Parse a value operand: JSON scalars map directly, a single-key
    /// object goes through the value registry.
    pub fn parse_value(&self, context: &ParsingContext, input: &Value) -> ParseResult<ValueNode> {
        match input {
            Value::Null => Ok(ValueNode::new(context.clone(), ValueKind::Null)),
            Value::Bool(b) => Ok(ValueNode::new(context.clone(), ValueKind::Boolean(*b))),
            Value::Number(n) => Ok(ValueNode::new(
                context.clone(),
                ValueKind::Number(n.clone()),
            )),
            Value::String(s) => Ok(ValueNode::new(
                context.clone(),
                ValueKind::String(s.clone()),
            )),
            Value::Object(object) if object.len() == 1 => {
                let (key, value) = object.iter().next().expect("single-key object");
                self.parse_value_entry(context, key, value)
            }
            _ => match self.config.unknown_value_policy {
                UnknownPolicy::Strict => Err(ParseError::BadInput(format!(
                    "expected a scalar or single-key object value, got: {input}"
                ))),
                UnknownPolicy::Lenient => {
                    debug!("malformed value shape, keeping as opaque node");
                    Ok(self.unknown_value(context, "", input))
                }
            },
        }
    }

    fn parse_value_entry(
        &self,
        context: &ParsingContext,
        key: &str,
        input: &Value,
    ) -> ParseResult<ValueNode> {
        let parsed = self
            .config
            .value_parser
            .parse_value(self, context, key, input);
        match parsed {
            Ok(Some(node)) => Ok(node),
            Ok(None) => match self.config.unknown_value_policy {
                UnknownPolicy::Strict => Err(ParseError::UnknownValue(key.to_string())),
                UnknownPolicy::Lenient => {
                    debug!(key, "unrecognized value, keeping as opaque node");
                    Ok(self.unknown_value(context, key, input))
                }
            },
            Err(err) => match self.config.unknown_value_policy {
                UnknownPolicy::Strict => Err(err),
                UnknownPolicy::Lenient => {
                    warn!(key, error = %err, "malformed value, keeping as opaque node");
                    Ok(self.unknown_value(context, key, input))
                }
            },
        }
    }

    fn unknown_value(&self, context: &ParsingContext, key: &str, input: &Value) -> ValueNode {
        ValueNode::new(
            context.clone(),
            ValueKind::Unknown {
                key: key.to_string(),
                value: input.clone(),
            },
        )
    }
}
