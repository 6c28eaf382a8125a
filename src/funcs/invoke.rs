//! Callable descriptors and the dynamic invocation adapter.
//!
//! # Responsibilities
//! - Describe bound functions with a typed `Signature`
//! - Bind template arguments (zero-fill, type checks, variadics)
//! - Implement `try(fn, args...)`, which turns a function's error output
//!   into data instead of aborting the render
//!
//! # Design Decisions
//! - Signatures are validated once at registration
//! - `try` inspects the signature before invoking, so contract violations
//!   never run the function
//! - Argument binding errors are render errors even under `try`; only the
//!   function's own error output is captured

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use minijinja::value::{Enumerator, Object, ObjectRepr, Rest, Value, ValueKind};
use minijinja::{Error, State};

use crate::funcs::FuncError;

/// Declared kind of one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Any,
    String,
    Int,
    Float,
    Bool,
    Seq,
    Map,
}

impl ParamKind {
    /// Value substituted for a missing or `none` argument.
    pub fn zero(self) -> Value {
        match self {
            ParamKind::Any => Value::from(()),
            ParamKind::String => Value::from(""),
            ParamKind::Int => Value::from(0i64),
            ParamKind::Float => Value::from(0.0f64),
            ParamKind::Bool => Value::from(false),
            ParamKind::Seq => Value::from(Vec::<Value>::new()),
            ParamKind::Map => Value::from(BTreeMap::<String, Value>::new()),
        }
    }

    /// Check `value` against this kind, coercing scalars to strings where a
    /// string is expected.
    fn coerce(self, value: &Value) -> Option<Value> {
        match (self, value.kind()) {
            (ParamKind::Any, _) => Some(value.clone()),
            (ParamKind::String, ValueKind::String) => Some(value.clone()),
            (ParamKind::String, ValueKind::Number | ValueKind::Bool) => Some(Value::from(value.to_string())),
            (ParamKind::Int, ValueKind::Number) if value.is_integer() => Some(value.clone()),
            (ParamKind::Float, ValueKind::Number) => Some(value.clone()),
            (ParamKind::Bool, ValueKind::Bool) => Some(value.clone()),
            (ParamKind::Seq, ValueKind::Seq) => Some(value.clone()),
            (ParamKind::Map, ValueKind::Map) => Some(value.clone()),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            ParamKind::Any => "any",
            ParamKind::String => "string",
            ParamKind::Int => "integer",
            ParamKind::Float => "number",
            ParamKind::Bool => "bool",
            ParamKind::Seq => "sequence",
            ParamKind::Map => "map",
        }
    }
}

/// Declared kind of one output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Value,
    Error,
}

/// Parameter and output shape of a bound function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub params: Vec<ParamKind>,
    pub variadic: Option<ParamKind>,
    pub outputs: Vec<OutputKind>,
}

impl Signature {
    pub fn new(params: impl Into<Vec<ParamKind>>) -> Self {
        Self {
            params: params.into(),
            variadic: None,
            outputs: vec![OutputKind::Value],
        }
    }

    pub fn variadic(mut self, kind: ParamKind) -> Self {
        self.variadic = Some(kind);
        self
    }

    pub fn returns(mut self, outputs: impl Into<Vec<OutputKind>>) -> Self {
        self.outputs = outputs.into();
        self
    }

    /// `(value, error)`
    pub fn fallible(self) -> Self {
        self.returns([OutputKind::Value, OutputKind::Error])
    }

    /// `(value)`
    pub fn infallible(self) -> Self {
        self.returns([OutputKind::Value])
    }

    fn value_outputs(&self) -> usize {
        self.outputs.iter().filter(|o| **o == OutputKind::Value).count()
    }

    fn can_fail(&self) -> bool {
        self.outputs.last() == Some(&OutputKind::Error)
    }

    /// An error output may only appear last.
    pub fn validate(&self, name: &str) -> Result<(), FuncError> {
        let errors = self.outputs.iter().filter(|o| **o == OutputKind::Error).count();
        if errors > 1 || (errors == 1 && !self.can_fail()) {
            return Err(FuncError::Contract(format!(
                "`{}` declares an error output that is not last",
                name
            )));
        }
        Ok(())
    }
}

type FuncImpl = dyn Fn(&[Value]) -> Result<Vec<Value>, FuncError> + Send + Sync;

/// A named host function callable from templates.
#[derive(Clone)]
pub struct BoundFunc {
    name: Arc<str>,
    signature: Arc<Signature>,
    imp: Arc<FuncImpl>,
}

impl fmt::Debug for BoundFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundFunc")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .finish()
    }
}

impl BoundFunc {
    /// Register `imp` under `name`. `imp` receives bound arguments and
    /// returns one value per `Value` output; the error output is the `Err`.
    pub fn new<F>(name: &str, signature: Signature, imp: F) -> Result<Self, FuncError>
    where
        F: Fn(&[Value]) -> Result<Vec<Value>, FuncError> + Send + Sync + 'static,
    {
        signature.validate(name)?;
        Ok(Self {
            name: Arc::from(name),
            signature: Arc::new(signature),
            imp: Arc::new(imp),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Apply the signature to raw template arguments.
    pub fn bind_args(&self, args: &[Value]) -> Result<Vec<Value>, FuncError> {
        let sig = &self.signature;
        if args.len() > sig.params.len() && sig.variadic.is_none() {
            return Err(FuncError::TooManyArguments {
                func: self.name.to_string(),
                expected: sig.params.len(),
                got: args.len(),
            });
        }

        let mut bound = Vec::with_capacity(args.len().max(sig.params.len()));
        for (i, kind) in sig.params.iter().enumerate() {
            match args.get(i) {
                None => bound.push(kind.zero()),
                Some(arg) if arg.is_none() || arg.is_undefined() => bound.push(kind.zero()),
                Some(arg) => bound.push(self.coerce(*kind, arg, i)?),
            }
        }

        if let Some(kind) = sig.variadic {
            for (i, arg) in args.iter().enumerate().skip(sig.params.len()) {
                if arg.is_none() || arg.is_undefined() {
                    bound.push(kind.zero());
                } else {
                    bound.push(self.coerce(kind, arg, i)?);
                }
            }
        }

        Ok(bound)
    }

    fn coerce(&self, kind: ParamKind, arg: &Value, position: usize) -> Result<Value, FuncError> {
        kind.coerce(arg).ok_or_else(|| FuncError::ArgumentType {
            func: self.name.to_string(),
            position: position + 1,
            expected: kind.name(),
            got: arg.kind().to_string(),
        })
    }

    /// Run the implementation on already bound arguments.
    fn call_bound(&self, bound: &[Value]) -> Result<Vec<Value>, FuncError> {
        let values = (self.imp)(bound)?;
        let expected = self.signature.value_outputs();
        if values.len() != expected {
            return Err(FuncError::Contract(format!(
                "`{}` produced {} values but declares {}",
                self.name,
                values.len(),
                expected
            )));
        }
        Ok(values)
    }

    /// Bind and invoke.
    pub fn invoke(&self, args: &[Value]) -> Result<Vec<Value>, FuncError> {
        let bound = self.bind_args(args)?;
        self.call_bound(&bound)
    }
}

impl Object for BoundFunc {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn call(self: &Arc<Self>, _state: &State<'_, '_>, args: &[Value]) -> Result<Value, Error> {
        let mut values = self.invoke(args)?;
        Ok(match values.len() {
            0 => Value::from(()),
            1 => values.remove(0),
            _ => Value::from(values),
        })
    }

    fn render(self: &Arc<Self>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<function {}>", self.name)
    }
}

/// Outcome of one `try` invocation.
#[derive(Debug, Clone)]
pub struct TryResult {
    value: Option<Value>,
    error: Option<FuncError>,
}

impl TryResult {
    pub fn ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn error(&self) -> Option<&FuncError> {
        self.error.as_ref()
    }
}

impl Object for TryResult {
    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        match key.as_str()? {
            "value" => Some(self.value.clone().unwrap_or_else(|| Value::from(()))),
            "error" => Some(
                self.error
                    .as_ref()
                    .map(|e| Value::from(e.to_string()))
                    .unwrap_or_else(|| Value::from(())),
            ),
            "ok" => Some(Value::from(self.ok())),
            _ => None,
        }
    }

    fn enumerate(self: &Arc<Self>) -> Enumerator {
        Enumerator::Str(&["value", "error", "ok"])
    }
}

/// Invoke a function whose last output is an error, capturing the error.
pub fn invoke_try(func: &Value, args: &[Value]) -> Result<TryResult, FuncError> {
    if func.is_none() || func.is_undefined() {
        return Err(FuncError::Contract("try: nil function".to_string()));
    }
    let bound = func.downcast_object_ref::<BoundFunc>().ok_or_else(|| {
        FuncError::Contract(format!("try: not a function (got {})", func.kind()))
    })?;

    let outputs = &bound.signature.outputs;
    if outputs.len() != 1 && outputs.len() != 2 {
        return Err(FuncError::Contract(format!(
            "try: cannot call `{}` which has {} outputs",
            bound.name,
            outputs.len()
        )));
    }
    if !bound.signature.can_fail() {
        return Err(FuncError::Contract(format!(
            "try: cannot call `{}` whose last output is not an error",
            bound.name
        )));
    }

    let args = bound.bind_args(args)?;
    Ok(match bound.call_bound(&args) {
        Ok(values) => TryResult {
            value: if outputs.len() == 2 { values.into_iter().next() } else { None },
            error: None,
        },
        Err(error) => TryResult { value: None, error: Some(error) },
    })
}

/// Template entry point for `try(fn, args...)`.
pub fn try_call(func: Value, args: Rest<Value>) -> Result<Value, Error> {
    let result = invoke_try(&func, &args.0)?;
    Ok(Value::from_object(result))
}

/// Index into a sequence or string.
pub fn index_value(i: i64, seq: &Value) -> Result<Value, FuncError> {
    let out_of_range = |len: usize| FuncError::Failed(format!("idx: index {} out of range (length {})", i, len));

    match seq.kind() {
        ValueKind::Seq => {
            let len = seq.len().unwrap_or(0);
            let pos = usize::try_from(i).ok().filter(|p| *p < len).ok_or_else(|| out_of_range(len))?;
            seq.get_item_by_index(pos).map_err(|e| FuncError::Failed(e.to_string()))
        }
        ValueKind::String => {
            let s = seq.as_str().unwrap_or_default();
            let len = s.chars().count();
            usize::try_from(i)
                .ok()
                .and_then(|p| s.chars().nth(p))
                .map(|c| Value::from(c.to_string()))
                .ok_or_else(|| out_of_range(len))
        }
        other => Err(FuncError::Failed(format!("idx: cannot index into {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counted(name: &str, signature: Signature, counter: Arc<AtomicUsize>) -> Value {
        let func = BoundFunc::new(name, signature.clone(), move |args| {
            counter.fetch_add(1, Ordering::SeqCst);
            let first = args.first().cloned().unwrap_or_default();
            if first.as_str() == Some("fail") {
                return Err(FuncError::Failed("boom".to_string()));
            }
            Ok(vec![first; signature.value_outputs()])
        })
        .unwrap();
        Value::from_object(func)
    }

    #[test]
    fn test_try_success_and_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let f = counted("echo", Signature::new([ParamKind::String]).fallible(), calls.clone());

        let ok = invoke_try(&f, &[Value::from("hi")]).unwrap();
        assert!(ok.ok());
        assert_eq!(ok.value().and_then(|v| v.as_str()), Some("hi"));

        let failed = invoke_try(&f, &[Value::from("fail")]).unwrap();
        assert!(!failed.ok());
        assert!(failed.value().is_none());
        assert_eq!(failed.error().map(|e| e.to_string()).as_deref(), Some("boom"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_try_single_error_output() {
        let calls = Arc::new(AtomicUsize::new(0));
        let f = counted("check", Signature::new([ParamKind::String]).returns([OutputKind::Error]), calls);

        let result = invoke_try(&f, &[Value::from("fine")]).unwrap();
        assert!(result.ok());
        assert!(result.value().is_none());
    }

    #[test]
    fn test_try_rejects_without_invoking() {
        let calls = Arc::new(AtomicUsize::new(0));
        let none = counted("none", Signature::new(Vec::new()).returns(Vec::new()), calls.clone());
        let three = counted(
            "three",
            Signature::new(Vec::new()).returns([OutputKind::Value, OutputKind::Value, OutputKind::Error]),
            calls.clone(),
        );
        let plain = counted("plain", Signature::new(Vec::new()).infallible(), calls.clone());

        let err = invoke_try(&none, &[]).unwrap_err();
        assert!(err.to_string().contains("0 outputs"));
        let err = invoke_try(&three, &[]).unwrap_err();
        assert!(err.to_string().contains("3 outputs"));
        let err = invoke_try(&plain, &[]).unwrap_err();
        assert!(err.to_string().contains("not an error"));
        let err = invoke_try(&Value::from(42), &[]).unwrap_err();
        assert!(err.to_string().contains("not a function"));
        let err = invoke_try(&Value::from(()), &[]).unwrap_err();
        assert!(err.to_string().contains("nil function"));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_bind_zero_fills_and_checks_types() {
        let func = BoundFunc::new(
            "f",
            Signature::new([ParamKind::String, ParamKind::Int, ParamKind::Bool]),
            |args| Ok(vec![Value::from(args.to_vec())]),
        )
        .unwrap();

        let bound = func.bind_args(&[Value::from(()), Value::from(3)]).unwrap();
        assert_eq!(bound, vec![Value::from(""), Value::from(3), Value::from(false)]);

        let bound = func.bind_args(&[Value::from(12)]).unwrap();
        assert_eq!(bound[0].as_str(), Some("12"));

        let err = func.bind_args(&[Value::from("a"), Value::from("b")]).unwrap_err();
        assert!(matches!(err, FuncError::ArgumentType { position: 2, .. }));

        let err = func
            .bind_args(&[Value::from("a"), Value::from(1), Value::from(true), Value::from(1)])
            .unwrap_err();
        assert!(matches!(err, FuncError::TooManyArguments { expected: 3, got: 4, .. }));
    }

    #[test]
    fn test_variadic_binding() {
        let func = BoundFunc::new("v", Signature::new([ParamKind::String]).variadic(ParamKind::Any), |args| {
            Ok(vec![Value::from(args.len())])
        })
        .unwrap();

        let bound = func.bind_args(&[Value::from("sql"), Value::from(1), Value::from(())]).unwrap();
        assert_eq!(bound.len(), 3);
        assert!(bound[2].is_none());
    }

    #[test]
    fn test_signature_validation() {
        let bad = Signature::new(Vec::new()).returns([OutputKind::Error, OutputKind::Value]);
        assert!(BoundFunc::new("bad", bad, |_| Ok(vec![])).is_err());
    }

    #[test]
    fn test_index_value() {
        let seq = Value::from(vec![Value::from("a"), Value::from("b")]);
        assert_eq!(index_value(1, &seq).unwrap(), Value::from("b"));
        assert!(index_value(2, &seq).is_err());
        assert!(index_value(-1, &seq).is_err());
        assert_eq!(index_value(0, &Value::from("xyz")).unwrap(), Value::from("x"));
        assert!(index_value(0, &Value::from(5)).is_err());
    }
}
