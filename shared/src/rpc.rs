//! Named commands carried as text over the bus.
//!
//! A command is either `"<name> <verb> <arg>..."` or `"<name> {<patch>}"`.
//! Each device builds a [`DispatchTable`] declaring its verbs, their argument
//! schemas and the properties a patch may assign; the table rejects malformed
//! input at the message boundary so handlers only ever see typed arguments.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("empty message")]
    Empty,
    #[error("unknown verb '{0}'")]
    UnknownVerb(String),
    #[error("unknown property '{0}'")]
    UnknownProperty(String),
    #[error("'{verb}' takes {expected} argument(s), got {got}")]
    Arity {
        verb: String,
        expected: usize,
        got: usize,
    },
    #[error("'{verb}' argument {index}: expected {kind}, got '{value}'")]
    BadArgument {
        verb: String,
        index: usize,
        kind: ArgKind,
        value: String,
    },
    #[error("malformed patch: {0}")]
    MalformedPatch(String),
    #[error("'{0}' registered twice")]
    DuplicateVerb(String),
    #[error("'{0}': a trailing text argument must be last")]
    InvalidSchema(String),
    #[error("{0}")]
    Handler(String),
}

/// Expected type of one positional argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Int,
    /// Accepts integers too.
    Float,
    /// A float, or `None` / `nan` for "unset".
    OptFloat,
    /// Any single token.
    Text,
    /// `1/0/true/false`, any case.
    Bool,
    /// All remaining tokens joined by single spaces. Must be last.
    Rest,
}

impl fmt::Display for ArgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArgKind::Int => "integer",
            ArgKind::Float => "number",
            ArgKind::OptFloat => "number or None",
            ArgKind::Text => "text",
            ArgKind::Bool => "boolean",
            ArgKind::Rest => "text",
        };
        f.write_str(name)
    }
}

/// A validated argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Int(i64),
    Float(f64),
    OptFloat(Option<f64>),
    Text(String),
    Bool(bool),
}

impl ArgKind {
    fn convert(self, token: &str) -> Option<Arg> {
        match self {
            ArgKind::Int => token.parse().ok().map(Arg::Int),
            ArgKind::Float => token
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(Arg::Float),
            ArgKind::OptFloat => match token {
                "None" | "none" | "null" => Some(Arg::OptFloat(None)),
                _ => token
                    .parse::<f64>()
                    .ok()
                    .map(|v| Arg::OptFloat(Some(v).filter(|v| !v.is_nan()))),
            },
            ArgKind::Text | ArgKind::Rest => Some(Arg::Text(token.to_string())),
            ArgKind::Bool => match token.to_ascii_lowercase().as_str() {
                "1" | "true" => Some(Arg::Bool(true)),
                "0" | "false" => Some(Arg::Bool(false)),
                _ => None,
            },
        }
    }

    fn convert_json(self, value: &Value) -> Option<Arg> {
        match (self, value) {
            (ArgKind::Int, Value::Number(n)) => n.as_i64().map(Arg::Int),
            (ArgKind::Float, Value::Number(n)) => n.as_f64().map(Arg::Float),
            (ArgKind::OptFloat, Value::Number(n)) => Some(Arg::OptFloat(n.as_f64())),
            (ArgKind::OptFloat, Value::Null) => Some(Arg::OptFloat(None)),
            (ArgKind::Bool, Value::Bool(b)) => Some(Arg::Bool(*b)),
            (ArgKind::Text | ArgKind::Rest, Value::String(s)) => Some(Arg::Text(s.clone())),
            (ArgKind::Text | ArgKind::Rest, other) => Some(Arg::Text(other.to_string())),
            (kind, Value::String(s)) => kind.convert(s),
            (ArgKind::Bool, Value::Number(n)) => n.as_i64().and_then(|v| match v {
                0 => Some(Arg::Bool(false)),
                1 => Some(Arg::Bool(true)),
                _ => None,
            }),
            _ => None,
        }
    }
}

/// Validated positional arguments handed to a verb handler.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Args {
    verb: String,
    values: Vec<Arg>,
}

impl Args {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn get(&self, index: usize) -> Result<&Arg, ProtocolError> {
        self.values.get(index).ok_or_else(|| ProtocolError::Arity {
            verb: self.verb.clone(),
            expected: index + 1,
            got: self.values.len(),
        })
    }

    fn mismatch(&self, index: usize, kind: ArgKind) -> ProtocolError {
        ProtocolError::BadArgument {
            verb: self.verb.clone(),
            index,
            kind,
            value: format!("{:?}", self.values.get(index)),
        }
    }

    pub fn int(&self, index: usize) -> Result<i64, ProtocolError> {
        match self.get(index)? {
            Arg::Int(v) => Ok(*v),
            _ => Err(self.mismatch(index, ArgKind::Int)),
        }
    }

    pub fn float(&self, index: usize) -> Result<f64, ProtocolError> {
        match self.get(index)? {
            Arg::Float(v) => Ok(*v),
            Arg::Int(v) => Ok(*v as f64),
            _ => Err(self.mismatch(index, ArgKind::Float)),
        }
    }

    pub fn opt_float(&self, index: usize) -> Result<Option<f64>, ProtocolError> {
        match self.get(index)? {
            Arg::OptFloat(v) => Ok(*v),
            Arg::Float(v) => Ok(Some(*v)),
            _ => Err(self.mismatch(index, ArgKind::OptFloat)),
        }
    }

    pub fn text(&self, index: usize) -> Result<&str, ProtocolError> {
        match self.get(index)? {
            Arg::Text(v) => Ok(v),
            _ => Err(self.mismatch(index, ArgKind::Text)),
        }
    }

    pub fn bool(&self, index: usize) -> Result<bool, ProtocolError> {
        match self.get(index)? {
            Arg::Bool(v) => Ok(*v),
            _ => Err(self.mismatch(index, ArgKind::Bool)),
        }
    }
}

/// A decoded command before schema validation.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Call { verb: String, args: Vec<String> },
    Patch(serde_json::Map<String, Value>),
}

impl Message {
    /// Decode `raw`, optionally dropping the leading device-name token first.
    pub fn parse(raw: &str, strip_name: bool) -> Result<Message, ProtocolError> {
        let mut body = raw.trim();
        if strip_name {
            body = match body.split_once(char::is_whitespace) {
                Some((_, rest)) => rest.trim_start(),
                None => "",
            };
        }
        if body.is_empty() {
            return Err(ProtocolError::Empty);
        }
        if body.starts_with('{') {
            return parse_patch(body).map(Message::Patch);
        }
        let mut tokens = body.split_whitespace().map(str::to_string);
        let verb = tokens.next().ok_or(ProtocolError::Empty)?;
        Ok(Message::Call {
            verb,
            args: tokens.collect(),
        })
    }
}

/// Patches are JSON objects. Python-style literals (`'key'`, `True`, `None`)
/// are accepted as a fallback since operators type them by hand.
fn parse_patch(body: &str) -> Result<serde_json::Map<String, Value>, ProtocolError> {
    let parsed = serde_json::from_str::<Value>(body)
        .or_else(|_| serde_json::from_str::<Value>(&relax_literals(body)));
    match parsed {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ProtocolError::MalformedPatch(format!(
            "expected an object, got {}",
            other
        ))),
        Err(e) => Err(ProtocolError::MalformedPatch(e.to_string())),
    }
}

/// Rewrite Python literal syntax as JSON. Quoted strings are re-quoted with
/// `"` and copied otherwise unchanged; only bare `True`, `False` and `None`
/// words are replaced.
fn relax_literals(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {
                out.push('"');
                while let Some(s) = chars.next() {
                    match s {
                        '\\' => match chars.next() {
                            Some('\'') => out.push('\''),
                            Some(escaped) => {
                                out.push('\\');
                                out.push(escaped);
                            }
                            None => out.push('\\'),
                        },
                        s if s == c => break,
                        '"' => out.push_str("\\\""),
                        s => out.push(s),
                    }
                }
                out.push('"');
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut word = String::from(c);
                while let Some(&next) = chars.peek() {
                    if !(next.is_ascii_alphanumeric() || next == '_') {
                        break;
                    }
                    word.push(next);
                    chars.next();
                }
                out.push_str(match word.as_str() {
                    "True" => "true",
                    "False" => "false",
                    "None" => "null",
                    other => other,
                });
            }
            c => out.push(c),
        }
    }
    out
}

pub type VerbHandler<T> = fn(&mut T, &Args) -> Result<(), ProtocolError>;
pub type PropertySetter<T> = fn(&mut T, Arg) -> Result<(), ProtocolError>;

struct VerbEntry<T> {
    schema: &'static [ArgKind],
    handler: VerbHandler<T>,
}

struct PropertyEntry<T> {
    kind: ArgKind,
    setter: PropertySetter<T>,
}

/// Verb and property table for one device type.
pub struct DispatchTable<T> {
    strip_name: bool,
    verbs: HashMap<&'static str, VerbEntry<T>>,
    properties: HashMap<&'static str, PropertyEntry<T>>,
}

impl<T> DispatchTable<T> {
    /// Table for raw messages that start directly with the verb.
    pub fn new() -> Self {
        Self {
            strip_name: false,
            verbs: HashMap::new(),
            properties: HashMap::new(),
        }
    }

    /// Table for bus messages whose first token is the receiving device's name.
    pub fn addressed() -> Self {
        Self {
            strip_name: true,
            ..Self::new()
        }
    }

    pub fn register(
        &mut self,
        name: &'static str,
        schema: &'static [ArgKind],
        handler: VerbHandler<T>,
    ) -> Result<(), ProtocolError> {
        if let Some(pos) = schema.iter().position(|k| *k == ArgKind::Rest) {
            if pos + 1 != schema.len() {
                return Err(ProtocolError::InvalidSchema(name.to_string()));
            }
        }
        if self.verbs.contains_key(name) {
            return Err(ProtocolError::DuplicateVerb(name.to_string()));
        }
        self.verbs.insert(name, VerbEntry { schema, handler });
        Ok(())
    }

    pub fn register_property(
        &mut self,
        name: &'static str,
        kind: ArgKind,
        setter: PropertySetter<T>,
    ) -> Result<(), ProtocolError> {
        if self.properties.contains_key(name) {
            return Err(ProtocolError::DuplicateVerb(name.to_string()));
        }
        self.properties.insert(name, PropertyEntry { kind, setter });
        Ok(())
    }

    /// Builder form of [`DispatchTable::register`].
    pub fn verb(
        mut self,
        name: &'static str,
        schema: &'static [ArgKind],
        handler: VerbHandler<T>,
    ) -> Result<Self, ProtocolError> {
        self.register(name, schema, handler)?;
        Ok(self)
    }

    /// Builder form of [`DispatchTable::register_property`].
    pub fn property(
        mut self,
        name: &'static str,
        kind: ArgKind,
        setter: PropertySetter<T>,
    ) -> Result<Self, ProtocolError> {
        self.register_property(name, kind, setter)?;
        Ok(self)
    }

    pub fn has_verb(&self, name: &str) -> bool {
        self.verbs.contains_key(name)
    }

    /// Verb names, sorted, for help output.
    pub fn verbs(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.verbs.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Decode `raw` and invoke the matching handler on `target`.
    pub fn dispatch(&self, raw: &str, target: &mut T) -> Result<(), ProtocolError> {
        match Message::parse(raw, self.strip_name)? {
            Message::Call { verb, args } => self.call(&verb, &args, target),
            Message::Patch(map) => self.patch(map, target),
        }
    }

    fn call(&self, verb: &str, tokens: &[String], target: &mut T) -> Result<(), ProtocolError> {
        let entry = self
            .verbs
            .get(verb)
            .ok_or_else(|| ProtocolError::UnknownVerb(verb.to_string()))?;
        let args = validate(verb, entry.schema, tokens)?;
        (entry.handler)(target, &args)
    }

    fn patch(
        &self,
        map: serde_json::Map<String, Value>,
        target: &mut T,
    ) -> Result<(), ProtocolError> {
        // Validate everything before assigning anything.
        let mut staged = Vec::with_capacity(map.len());
        for (key, value) in &map {
            let entry = self
                .properties
                .get(key.as_str())
                .ok_or_else(|| ProtocolError::UnknownProperty(key.clone()))?;
            let arg = entry
                .kind
                .convert_json(value)
                .ok_or_else(|| ProtocolError::BadArgument {
                    verb: key.clone(),
                    index: 0,
                    kind: entry.kind,
                    value: value.to_string(),
                })?;
            staged.push((entry.setter, arg));
        }
        for (setter, arg) in staged {
            setter(target, arg)?;
        }
        Ok(())
    }
}

impl<T> Default for DispatchTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn validate(verb: &str, schema: &[ArgKind], tokens: &[String]) -> Result<Args, ProtocolError> {
    let has_rest = schema.last() == Some(&ArgKind::Rest);
    let fixed = if has_rest { schema.len() - 1 } else { schema.len() };
    let arity_ok = if has_rest {
        tokens.len() >= fixed
    } else {
        tokens.len() == fixed
    };
    if !arity_ok {
        return Err(ProtocolError::Arity {
            verb: verb.to_string(),
            expected: fixed,
            got: tokens.len(),
        });
    }

    let mut values = Vec::with_capacity(schema.len());
    for (index, (kind, token)) in schema[..fixed].iter().zip(tokens).enumerate() {
        let value = kind
            .convert(token)
            .ok_or_else(|| ProtocolError::BadArgument {
                verb: verb.to_string(),
                index,
                kind: *kind,
                value: token.clone(),
            })?;
        values.push(value);
    }
    if has_rest {
        values.push(Arg::Text(tokens[fixed..].join(" ")));
    }
    Ok(Args {
        verb: verb.to_string(),
        values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Device {
        velocity: i64,
        gain: f64,
        focus: Option<f64>,
        enabled: bool,
        note: String,
        calls: usize,
    }

    fn table() -> DispatchTable<Device> {
        DispatchTable::<Device>::addressed()
            .verb("movex", &[ArgKind::Int], |p, a| {
                p.velocity = a.int(0)?;
                p.calls += 1;
                Ok(())
            })
            .unwrap()
            .verb("set_gain", &[ArgKind::Float], |p, a| {
                p.gain = a.float(0)?;
                Ok(())
            })
            .unwrap()
            .verb("set_focus", &[ArgKind::OptFloat], |p, a| {
                p.focus = a.opt_float(0)?;
                Ok(())
            })
            .unwrap()
            .verb("enable", &[ArgKind::Bool], |p, a| {
                p.enabled = a.bool(0)?;
                Ok(())
            })
            .unwrap()
            .verb("log", &[ArgKind::Text, ArgKind::Rest], |p, a| {
                p.note = format!("{}|{}", a.text(0)?, a.text(1)?);
                Ok(())
            })
            .unwrap()
            .verb("fail", &[], |_, _| Err(ProtocolError::Handler("boom".into())))
            .unwrap()
            .property("gain", ArgKind::Float, |p, a| {
                if let Arg::Float(v) = a {
                    p.gain = v;
                }
                Ok(())
            })
            .unwrap()
            .property("enabled", ArgKind::Bool, |p, a| {
                if let Arg::Bool(v) = a {
                    p.enabled = v;
                }
                Ok(())
            })
            .unwrap()
    }

    #[test]
    fn test_parse_call_and_patch() {
        assert_eq!(
            Message::parse("stage movex 12", true).unwrap(),
            Message::Call {
                verb: "movex".into(),
                args: vec!["12".into()]
            }
        );
        assert_eq!(
            Message::parse("movex 12", false).unwrap(),
            Message::Call {
                verb: "movex".into(),
                args: vec!["12".into()]
            }
        );
        match Message::parse("stage {'gain': 2.5, 'enabled': True}", true).unwrap() {
            Message::Patch(map) => {
                assert_eq!(map["gain"], Value::from(2.5));
                assert_eq!(map["enabled"], Value::Bool(true));
            }
            other => panic!("expected patch, got {:?}", other),
        }
        assert_eq!(Message::parse("stage", true), Err(ProtocolError::Empty));
    }

    #[test]
    fn test_relaxed_patch_leaves_string_contents_alone() {
        let raw = "writer {'directory': 'NoneSuch', 'note': \"it's True\", 'enabled': True, 'gain': None}";
        match Message::parse(raw, true).unwrap() {
            Message::Patch(map) => {
                assert_eq!(map["directory"], Value::from("NoneSuch"));
                assert_eq!(map["note"], Value::from("it's True"));
                assert_eq!(map["enabled"], Value::Bool(true));
                assert_eq!(map["gain"], Value::Null);
            }
            other => panic!("expected patch, got {:?}", other),
        }
        assert_eq!(
            relax_literals(r#"{'say': 'a "quote"'}"#),
            r#"{"say": "a \"quote\""}"#
        );
    }

    #[test]
    fn test_typed_dispatch() {
        let table = table();
        let mut device = Device::default();

        table.dispatch("stage movex -30", &mut device).unwrap();
        table.dispatch("stage set_gain 3", &mut device).unwrap();
        table.dispatch("stage enable True", &mut device).unwrap();
        table.dispatch("stage set_focus None", &mut device).unwrap();
        assert_eq!(device.velocity, -30);
        assert_eq!(device.gain, 3.0);
        assert!(device.enabled);
        assert_eq!(device.focus, None);

        table.dispatch("stage set_focus 0.25", &mut device).unwrap();
        assert_eq!(device.focus, Some(0.25));
    }

    #[test]
    fn test_rest_collects_tail() {
        let table = table();
        let mut device = Device::default();
        table
            .dispatch("stage log tracker  found at  (3,4)", &mut device)
            .unwrap();
        assert_eq!(device.note, "tracker|found at (3,4)");
    }

    #[test]
    fn test_errors_leave_target_untouched() {
        let table = table();
        let mut device = Device::default();

        assert_eq!(
            table.dispatch("stage jump 1", &mut device),
            Err(ProtocolError::UnknownVerb("jump".into()))
        );
        assert!(matches!(
            table.dispatch("stage movex", &mut device),
            Err(ProtocolError::Arity {
                expected: 1,
                got: 0,
                ..
            })
        ));
        assert!(matches!(
            table.dispatch("stage movex 1 2", &mut device),
            Err(ProtocolError::Arity { .. })
        ));
        assert!(matches!(
            table.dispatch("stage movex fast", &mut device),
            Err(ProtocolError::BadArgument { index: 0, .. })
        ));
        assert!(matches!(
            table.dispatch("stage movex 1.5", &mut device),
            Err(ProtocolError::BadArgument { .. })
        ));
        assert!(matches!(
            table.dispatch("stage enable maybe", &mut device),
            Err(ProtocolError::BadArgument { .. })
        ));
        assert_eq!(
            table.dispatch("stage fail", &mut device),
            Err(ProtocolError::Handler("boom".into()))
        );
        assert_eq!(device.calls, 0);
    }

    #[test]
    fn test_patch_assigns_properties() {
        let table = table();
        let mut device = Device::default();
        table
            .dispatch(r#"stage {"gain": 1.5, "enabled": true}"#, &mut device)
            .unwrap();
        assert_eq!(device.gain, 1.5);
        assert!(device.enabled);
    }

    #[test]
    fn test_patch_is_all_or_nothing() {
        let table = table();
        let mut device = Device::default();
        assert_eq!(
            table.dispatch(r#"stage {"gain": 4.0, "speed": 1}"#, &mut device),
            Err(ProtocolError::UnknownProperty("speed".into()))
        );
        assert_eq!(device.gain, 0.0);
        assert!(matches!(
            table.dispatch("stage {gain: 4.0", &mut device),
            Err(ProtocolError::MalformedPatch(_))
        ));
    }

    #[test]
    fn test_duplicate_and_bad_schema_rejected() {
        let dup = DispatchTable::<Device>::new()
            .verb("start", &[], |_, _| Ok(()))
            .unwrap()
            .verb("start", &[ArgKind::Int], |_, _| Ok(()));
        assert!(matches!(dup, Err(ProtocolError::DuplicateVerb(v)) if v == "start"));

        let bad = DispatchTable::<Device>::new().verb(
            "log",
            &[ArgKind::Rest, ArgKind::Int],
            |_, _| Ok(()),
        );
        assert!(matches!(bad, Err(ProtocolError::InvalidSchema(_))));
    }

    #[test]
    fn test_unaddressed_table() {
        let table = DispatchTable::<Device>::new()
            .verb("movex", &[ArgKind::Int], |p, a| {
                p.velocity = a.int(0)?;
                Ok(())
            })
            .unwrap();
        let mut device = Device::default();
        table.dispatch("movex 7", &mut device).unwrap();
        assert_eq!(device.velocity, 7);
        assert!(table.has_verb("movex"));
        assert_eq!(table.verbs(), vec!["movex"]);
    }
}
