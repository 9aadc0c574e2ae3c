use std::fmt::{self, Debug, Formatter};

use crate::error::{Error, Result};
use crate::value::{FromValue, Value};

/// The arguments of a call: positional values followed by keyword values.
#[derive(Clone, Default)]
pub struct Args {
    positional: Vec<Value>,
    keywords: Vec<(String, Value)>,
}

impl Args {
    /// Create an empty argument list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Append a keyword argument.
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.keywords.push((name.into(), value.into()));
        self
    }

    /// Whether there are neither positional nor keyword arguments.
    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keywords.is_empty()
    }

    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    pub fn keywords(&self) -> &[(String, Value)] {
        &self.keywords
    }

    /// The positional argument at `index`.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    /// The keyword argument called `name`.
    pub fn keyword(&self, name: &str) -> Option<&Value> {
        self.keywords.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Extract the positional argument at `index` as a typed value.
    ///
    /// A missing argument is extracted from [`Value::None`], so optional
    /// trailing arguments can be read as `Option<T>`.
    pub fn extract<T: FromValue>(&self, index: usize) -> Result<T> {
        T::from_value(self.get(index).unwrap_or(&Value::None))
    }

    /// Extract the keyword argument called `name` as a typed value.
    pub fn extract_keyword<T: FromValue>(&self, name: &str) -> Result<T> {
        T::from_value(self.keyword(name).unwrap_or(&Value::None))
    }
}

impl Debug for Args {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let mut tuple = f.debug_tuple("Args");
        for value in &self.positional {
            tuple.field(value);
        }
        for (name, value) in &self.keywords {
            tuple.field(&format_args!("{name}={value:?}"));
        }
        tuple.finish()
    }
}

/// Build an [`Args`] list.
///
/// ```
/// # use cachefunc::args;
/// let args = args![1, "two"; mode = "fast"];
/// assert_eq!(args.positional().len(), 2);
/// assert_eq!(args.keywords().len(), 1);
/// ```
#[macro_export]
macro_rules! args {
    ($($arg:expr),* $(; $($name:ident = $kw:expr),*)?) => {{
        #[allow(unused_mut)]
        let mut __args = $crate::Args::new();
        $(__args = __args.arg($arg);)*
        $($(__args = __args.kwarg(stringify!($name), $kw);)*)?
        __args
    }};
}

/// A declared parameter.
#[derive(Clone, Debug)]
struct Param {
    name: String,
    default: Option<Value>,
}

/// The parameter list of a cached computation.
///
/// The signature merges positional and keyword spellings of the same call
/// into one canonical argument list: every declared parameter becomes
/// positional (filled from defaults if omitted), surplus positional values
/// follow them, and surplus keywords are sorted by name.
#[derive(Clone, Debug, Default)]
pub struct Signature {
    params: Vec<Param>,
    var_positional: bool,
    var_keyword: bool,
}

impl Signature {
    /// A signature without any parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// A signature accepting anything, only sorting keywords.
    pub fn variadic() -> Self {
        Self { params: vec![], var_positional: true, var_keyword: true }
    }

    /// Declare a required parameter.
    pub fn param(mut self, name: impl Into<String>) -> Self {
        self.params.push(Param { name: name.into(), default: None });
        self
    }

    /// Declare a parameter with a default value.
    pub fn param_default(mut self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        self.params.push(Param {
            name: name.into(),
            default: Some(default.into()),
        });
        self
    }

    /// Accept surplus positional arguments.
    pub fn var_positional(mut self) -> Self {
        self.var_positional = true;
        self
    }

    /// Accept surplus keyword arguments.
    pub fn var_keyword(mut self) -> Self {
        self.var_keyword = true;
        self
    }

    /// The names of the declared parameters.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|p| p.name.as_str())
    }

    /// Bring `args` into canonical form.
    ///
    /// `function` is only used in error messages.
    pub fn bind(&self, function: &str, args: &Args) -> Result<Args> {
        let declared = self.params.len();
        if args.positional.len() > declared && !self.var_positional {
            return Err(Error::invalid_arguments(
                function,
                format!(
                    "takes {declared} positional arguments but {} were given",
                    args.positional.len()
                ),
            ));
        }

        let mut slots: Vec<Option<Value>> = args
            .positional
            .iter()
            .take(declared)
            .cloned()
            .map(Some)
            .collect();
        slots.resize(declared, None);

        let mut extra = Vec::new();
        for (name, value) in &args.keywords {
            match self.params.iter().position(|p| &p.name == name) {
                Some(i) if slots[i].is_some() => {
                    return Err(Error::invalid_arguments(
                        function,
                        format!("got multiple values for argument {name:?}"),
                    ));
                }
                Some(i) => slots[i] = Some(value.clone()),
                None if self.var_keyword => {
                    if extra.iter().any(|(n, _): &(String, Value)| n == name) {
                        return Err(Error::invalid_arguments(
                            function,
                            format!("got multiple values for keyword argument {name:?}"),
                        ));
                    }
                    extra.push((name.clone(), value.clone()));
                }
                None => {
                    return Err(Error::invalid_arguments(
                        function,
                        format!("got an unexpected keyword argument {name:?}"),
                    ));
                }
            }
        }

        let mut positional = Vec::with_capacity(args.positional.len().max(declared));
        for (param, slot) in self.params.iter().zip(slots) {
            match slot.or_else(|| param.default.clone()) {
                Some(value) => positional.push(value),
                None => {
                    return Err(Error::invalid_arguments(
                        function,
                        format!("missing required argument {:?}", param.name),
                    ));
                }
            }
        }
        positional.extend(args.positional.iter().skip(declared).cloned());

        extra.sort_by(|(a, _), (b, _)| a.cmp(b));
        Ok(Args { positional, keywords: extra })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signature() -> Signature {
        Signature::new().param("x").param_default("mode", "default")
    }

    #[test]
    fn test_bind_fills_defaults() {
        let bound = signature().bind("f", &args![1]).unwrap();
        assert_eq!(bound.positional().len(), 2);
        assert!(matches!(bound.get(1), Some(Value::Str(s)) if s == "default"));
        assert!(bound.keywords().is_empty());
    }

    #[test]
    fn test_bind_errors() {
        let sig = signature();
        assert!(sig.bind("f", &args![]).is_err());
        assert!(sig.bind("f", &args![1, 2, 3]).is_err());
        assert!(sig.bind("f", &args![1; x = 2]).is_err());
        assert!(sig.bind("f", &args![1; other = 2]).is_err());
    }

    #[test]
    fn test_variadic_sorts_keywords() {
        let bound = Signature::variadic().bind("f", &args![1; b = 2, a = 3]).unwrap();
        let names: Vec<_> = bound.keywords().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
        assert_eq!(bound.positional().len(), 1);
    }
}
