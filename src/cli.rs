//! Command lines built from a declarative argument table.
//!
//! A [`CliSpec`] is plain data (it deserializes from the `[cli]` section of
//! the TOML config) and is turned into a `clap::Command` at runtime:
//!
//! ```toml
//! [cli]
//! description = "This is what my tool does!"
//!
//! [[cli.args]]
//! flags = "--option,-O"
//! dest = "option_cool"
//! type = "float"
//! default = 0.0
//! help = "Please input the option value!"
//!
//! [[cli.args]]
//! flags = "--flag,-F"
//! dest = "mean_flag"
//! action = "store_true"
//! help = "Do you want to be mean??"
//! ```

use std::collections::HashSet;
use std::ffi::OsString;

use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use serde::Deserialize;
use serde_json::{Map, Number, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("invalid argument spec: {0}")]
    Spec(String),
    #[error(transparent)]
    Parse(#[from] clap::Error),
}

fn default_prog() -> String {
    "clint".to_string()
}

/// Whole-program description: name, about text and the argument table.
#[derive(Debug, Clone, Deserialize)]
pub struct CliSpec {
    #[serde(default = "default_prog")]
    pub prog: String,
    pub description: String,
    #[serde(default)]
    pub args: Vec<ArgSpec>,
}

/// Value type of an argument.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgKind {
    #[default]
    String,
    Int,
    Float,
    Bool,
}

/// What the parser does when it sees the argument.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreAction {
    #[default]
    Store,
    StoreTrue,
    StoreFalse,
    Append,
    Count,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArgSpec {
    /// Comma-separated names: `"--option,-O"` for options, `"url"` for a positional.
    pub flags: String,
    pub dest: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: ArgKind,
    #[serde(default)]
    pub action: StoreAction,
    pub default: Option<Value>,
    pub help: Option<String>,
    /// Positionals default to required, options to optional.
    pub required: Option<bool>,
    #[serde(default)]
    pub choices: Vec<String>,
    pub metavar: Option<String>,
}

/// Names split out of `ArgSpec::flags`.
struct FlagNames {
    longs: Vec<String>,
    shorts: Vec<char>,
    positional: Option<String>,
}

impl FlagNames {
    fn parse(flags: &str) -> Result<Self, CliError> {
        let mut names = FlagNames {
            longs: Vec::new(),
            shorts: Vec::new(),
            positional: None,
        };
        for raw in flags.split(',').map(str::trim) {
            if let Some(long) = raw.strip_prefix("--") {
                if long.is_empty() {
                    return Err(CliError::Spec(format!("empty long flag in '{flags}'")));
                }
                names.longs.push(long.to_string());
            } else if let Some(short) = raw.strip_prefix('-') {
                let mut chars = short.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => names.shorts.push(c),
                    _ => {
                        return Err(CliError::Spec(format!(
                            "short flag '{raw}' must be a single character"
                        )));
                    }
                }
            } else if raw.is_empty() {
                return Err(CliError::Spec(format!("empty name in '{flags}'")));
            } else if names.positional.replace(raw.to_string()).is_some() {
                return Err(CliError::Spec(format!("more than one positional name in '{flags}'")));
            }
        }
        if names.positional.is_some() && !(names.longs.is_empty() && names.shorts.is_empty()) {
            return Err(CliError::Spec(format!(
                "'{flags}' mixes a positional name with flags"
            )));
        }
        Ok(names)
    }

    /// Destination used when the spec names none: first long flag, else the
    /// positional, else the first short flag.
    fn default_dest(&self) -> Option<String> {
        self.longs
            .first()
            .map(|l| l.replace('-', "_"))
            .or_else(|| self.positional.clone())
            .or_else(|| self.shorts.first().map(char::to_string))
    }
}

impl ArgSpec {
    fn dest(&self, names: &FlagNames) -> Result<String, CliError> {
        self.dest
            .clone()
            .or_else(|| names.default_dest())
            .ok_or_else(|| CliError::Spec(format!("cannot derive a destination from '{}'", self.flags)))
    }

    fn to_arg(&self, names: &FlagNames) -> Result<(String, Arg), CliError> {
        let dest = self.dest(names)?;
        let positional = names.positional.is_some();
        if positional && !self.takes_value() {
            return Err(CliError::Spec(format!(
                "positional '{}' must use the store or append action",
                self.flags
            )));
        }
        let mut arg = Arg::new(dest.clone());

        if let Some((first, rest)) = names.longs.split_first() {
            arg = arg.long(first.clone());
            for alias in rest {
                arg = arg.visible_alias(alias.clone());
            }
        }
        if let Some((first, rest)) = names.shorts.split_first() {
            arg = arg.short(*first);
            for alias in rest {
                arg = arg.visible_short_alias(*alias);
            }
        }

        arg = match self.action {
            StoreAction::StoreTrue => arg.action(ArgAction::SetTrue),
            StoreAction::StoreFalse => arg.action(ArgAction::SetFalse),
            StoreAction::Count => arg.action(ArgAction::Count),
            StoreAction::Append => self.with_value_parser(arg.action(ArgAction::Append)),
            StoreAction::Store => self.with_value_parser(arg.action(ArgAction::Set)),
        };

        arg = arg.required(self.required.unwrap_or(positional));

        if let Some(help) = &self.help {
            arg = arg.help(help.clone());
        }
        if let Some(metavar) = &self.metavar {
            arg = arg.value_name(metavar.clone());
        }
        if let Some(default) = &self.default {
            arg = self.with_default(arg, default)?;
        }

        Ok((dest, arg))
    }

    fn takes_value(&self) -> bool {
        matches!(self.action, StoreAction::Store | StoreAction::Append)
    }

    fn with_value_parser(&self, arg: Arg) -> Arg {
        if !self.choices.is_empty() {
            return arg.value_parser(clap::builder::PossibleValuesParser::new(self.choices.clone()));
        }
        match self.kind {
            ArgKind::String => arg.value_parser(value_parser!(String)),
            ArgKind::Int => arg.value_parser(value_parser!(i64)),
            ArgKind::Float => arg.value_parser(value_parser!(f64)),
            ArgKind::Bool => arg.value_parser(value_parser!(bool)),
        }
    }

    fn with_default(&self, arg: Arg, default: &Value) -> Result<Arg, CliError> {
        let rendered = match default {
            Value::Array(items) if matches!(self.action, StoreAction::Append) => items
                .iter()
                .map(|v| self.render_default(v))
                .collect::<Result<Vec<_>, _>>()?,
            other => vec![self.render_default(other)?],
        };
        Ok(arg.default_values(rendered))
    }

    /// Render a default as the string clap will re-parse, checking it fits
    /// the argument's type.
    fn render_default(&self, value: &Value) -> Result<String, CliError> {
        let mismatch = || {
            CliError::Spec(format!(
                "default {value} does not fit argument '{}'",
                self.flags
            ))
        };
        if !self.takes_value() {
            return match (self.action, value) {
                (StoreAction::Count, Value::Number(n))
                    if n.as_u64().is_some_and(|c| c <= u64::from(u8::MAX)) =>
                {
                    Ok(n.to_string())
                }
                (StoreAction::StoreTrue | StoreAction::StoreFalse, Value::Bool(b)) => Ok(b.to_string()),
                _ => Err(mismatch()),
            };
        }
        let rendered = match (self.kind, value) {
            (ArgKind::String, Value::String(s)) => s.clone(),
            (ArgKind::String, Value::Number(n)) => n.to_string(),
            (ArgKind::Int, Value::Number(n)) if n.is_i64() || n.is_u64() => n.to_string(),
            (ArgKind::Float, Value::Number(n)) => n.to_string(),
            (ArgKind::Bool, Value::Bool(b)) => b.to_string(),
            _ => return Err(mismatch()),
        };
        if !self.choices.is_empty() && !self.choices.contains(&rendered) {
            return Err(CliError::Spec(format!(
                "default {value} of '{}' is not one of its choices",
                self.flags
            )));
        }
        Ok(rendered)
    }
}

/// Build the `clap::Command` described by `spec`.
pub fn build_command(spec: &CliSpec) -> Result<Command, CliError> {
    Ok(build(spec)?.0)
}

fn build(spec: &CliSpec) -> Result<(Command, Vec<(String, ArgSpec)>), CliError> {
    let mut command = Command::new(spec.prog.clone()).about(spec.description.clone());
    let mut seen = HashSet::new();
    // clap generates `--help` / `-h` itself.
    let mut longs = HashSet::from(["help".to_string()]);
    let mut shorts = HashSet::from(['h']);
    let mut optional_positional = None;
    let mut table = Vec::with_capacity(spec.args.len());

    for arg_spec in &spec.args {
        let names = FlagNames::parse(&arg_spec.flags)?;
        if let Some(long) = names.longs.iter().find(|l| !longs.insert((*l).clone())) {
            return Err(CliError::Spec(format!("duplicate flag '--{long}'")));
        }
        if let Some(short) = names.shorts.iter().find(|s| !shorts.insert(**s)) {
            return Err(CliError::Spec(format!("duplicate flag '-{short}'")));
        }
        if let Some(name) = &names.positional {
            match (arg_spec.required.unwrap_or(true), &optional_positional) {
                (true, Some(earlier)) => {
                    return Err(CliError::Spec(format!(
                        "required positional '{name}' follows optional positional '{earlier}'"
                    )));
                }
                (false, None) => optional_positional = Some(name.clone()),
                _ => {}
            }
        }
        let (dest, arg) = arg_spec.to_arg(&names)?;
        if !seen.insert(dest.clone()) {
            return Err(CliError::Spec(format!("duplicate destination '{dest}'")));
        }
        command = command.arg(arg);
        table.push((dest, arg_spec.clone()));
    }

    Ok((command, table))
}

/// Parse the process arguments against `spec`.
pub fn parse_args(spec: &CliSpec) -> Result<ParsedArgs, CliError> {
    parse_args_from(spec, std::env::args_os())
}

/// Parse an explicit argv (the first item is the program name).
pub fn parse_args_from<I, T>(spec: &CliSpec, argv: I) -> Result<ParsedArgs, CliError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let (command, table) = build(spec)?;
    let matches = command.try_get_matches_from(argv)?;
    Ok(ParsedArgs { matches, table })
}

/// Result of a parse, addressed by destination name.
#[derive(Debug, Clone)]
pub struct ParsedArgs {
    matches: ArgMatches,
    table: Vec<(String, ArgSpec)>,
}

impl ParsedArgs {
    /// `true` when the argument was given or has a default.
    pub fn contains(&self, dest: &str) -> bool {
        self.matches.try_contains_id(dest).unwrap_or(false)
    }

    pub fn get_str(&self, dest: &str) -> Option<&str> {
        self.one::<String>(dest).map(String::as_str)
    }

    pub fn get_int(&self, dest: &str) -> Option<i64> {
        self.one::<i64>(dest).copied()
    }

    pub fn get_float(&self, dest: &str) -> Option<f64> {
        self.one::<f64>(dest).copied()
    }

    /// Value of a `type = "bool"` argument that takes a value.
    pub fn get_bool(&self, dest: &str) -> Option<bool> {
        self.one::<bool>(dest).copied()
    }

    /// State of a `store_true` / `store_false` flag.
    pub fn get_flag(&self, dest: &str) -> bool {
        self.one::<bool>(dest).copied().unwrap_or(false)
    }

    pub fn get_count(&self, dest: &str) -> u8 {
        self.one::<u8>(dest).copied().unwrap_or(0)
    }

    /// All values of an `append` string argument.
    pub fn get_many(&self, dest: &str) -> Vec<&str> {
        self.matches
            .try_get_many::<String>(dest)
            .ok()
            .flatten()
            .map(|values| values.map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Every destination with its value, or `null` when absent.
    pub fn to_json(&self) -> Map<String, Value> {
        self.table
            .iter()
            .map(|(dest, spec)| (dest.clone(), self.value_of(dest, spec)))
            .collect()
    }

    fn one<T: Clone + Send + Sync + 'static>(&self, dest: &str) -> Option<&T> {
        self.matches.try_get_one::<T>(dest).ok().flatten()
    }

    fn value_of(&self, dest: &str, spec: &ArgSpec) -> Value {
        match spec.action {
            StoreAction::StoreTrue | StoreAction::StoreFalse => Value::Bool(self.get_flag(dest)),
            StoreAction::Count => Value::from(self.get_count(dest)),
            StoreAction::Append => Value::Array(self.many_json(dest, spec)),
            StoreAction::Store => self.many_json(dest, spec).into_iter().next().unwrap_or(Value::Null),
        }
    }

    fn many_json(&self, dest: &str, spec: &ArgSpec) -> Vec<Value> {
        if !spec.choices.is_empty() {
            return self.strings(dest);
        }
        match spec.kind {
            ArgKind::String => self.strings(dest),
            ArgKind::Int => self.typed::<i64>(dest).map(Value::from).collect(),
            ArgKind::Float => self
                .typed::<f64>(dest)
                .map(|f| Number::from_f64(f).map_or(Value::Null, Value::Number))
                .collect(),
            ArgKind::Bool => self.typed::<bool>(dest).map(Value::Bool).collect(),
        }
    }

    fn strings(&self, dest: &str) -> Vec<Value> {
        self.typed::<String>(dest).map(Value::String).collect()
    }

    fn typed<T: Clone + Send + Sync + 'static>(&self, dest: &str) -> impl Iterator<Item = T> + '_ {
        self.matches
            .try_get_many::<T>(dest)
            .ok()
            .flatten()
            .into_iter()
            .flatten()
            .cloned()
    }
}
