//! Template-facing query helpers: `db.query`, `db.query_row`, `db.exec`.

use std::fmt;
use std::sync::Arc;

use minijinja::value::{Enumerator, Object, ObjectRepr, Value, ValueKind};
use minijinja::{Error, ErrorKind, State};
use tokio_util::sync::CancellationToken;

use crate::funcs::{BoundFunc, FuncError, ParamKind, Signature};
use crate::query::{DataSource, QueryError, Scalar};

const METHODS: &[&str] = &["query", "query_row", "exec"];

/// Convert one template argument to a bind parameter. `position` is 1-based
/// within the parameter list (after the SQL text).
pub fn to_scalar(value: &Value, position: usize) -> Result<Scalar, QueryError> {
    match value.kind() {
        ValueKind::Undefined | ValueKind::None => Ok(Scalar::Null),
        ValueKind::Bool => Ok(Scalar::Integer(i64::from(value.is_true()))),
        ValueKind::Number => {
            if let Some(i) = value.as_i64() {
                Ok(Scalar::Integer(i))
            } else {
                f64::try_from(value.clone())
                    .map(Scalar::Real)
                    .map_err(|_| QueryError::UnsupportedArgument {
                        position,
                        kind: "number out of range".to_string(),
                    })
            }
        }
        ValueKind::String => Ok(Scalar::Text(value.as_str().unwrap_or_default().to_string())),
        ValueKind::Bytes => Ok(Scalar::Blob(value.as_bytes().unwrap_or_default().to_vec())),
        other => Err(QueryError::UnsupportedArgument {
            position,
            kind: other.to_string(),
        }),
    }
}

fn split_args(args: &[Value]) -> Result<(String, Vec<Scalar>), QueryError> {
    let sql = args.first().and_then(|v| v.as_str()).unwrap_or_default().to_string();
    let params = args
        .iter()
        .skip(1)
        .enumerate()
        .map(|(i, v)| to_scalar(v, i + 1))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((sql, params))
}

/// Query helpers bound to one data source and one request's cancellation.
pub struct QueryBridge {
    query: BoundFunc,
    query_row: BoundFunc,
    exec: BoundFunc,
}

impl fmt::Debug for QueryBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryBridge").finish_non_exhaustive()
    }
}

impl QueryBridge {
    pub fn new(source: Arc<dyn DataSource>, cancel: CancellationToken) -> Result<Self, FuncError> {
        let signature = || Signature::new([ParamKind::String]).variadic(ParamKind::Any).fallible();

        let query = {
            let source = source.clone();
            let cancel = cancel.clone();
            BoundFunc::new("db.query", signature(), move |args| {
                let (sql, params) = split_args(args)?;
                let records = source.query(&sql, &params, None, &cancel)?;
                Ok(vec![Value::from_serialize(&records)])
            })?
        };

        let query_row = {
            let source = source.clone();
            let cancel = cancel.clone();
            BoundFunc::new("db.query_row", signature(), move |args| {
                let (sql, params) = split_args(args)?;
                let mut records = source.query(&sql, &params, Some(2), &cancel)?;
                match records.len() {
                    0 => Err(QueryError::NoRows.into()),
                    1 => Ok(vec![Value::from_serialize(&records.remove(0))]),
                    n => Err(QueryError::TooManyRows(n).into()),
                }
            })?
        };

        let exec = BoundFunc::new("db.exec", signature(), move |args| {
            let (sql, params) = split_args(args)?;
            let affected = source.exec(&sql, &params, &cancel)?;
            Ok(vec![Value::from(affected)])
        })?;

        Ok(Self { query, query_row, exec })
    }

    /// The bridge as a template value.
    pub fn into_value(self) -> Value {
        Value::from_object(self)
    }

    fn method(&self, name: &str) -> Option<&BoundFunc> {
        match name {
            "query" => Some(&self.query),
            "query_row" => Some(&self.query_row),
            "exec" => Some(&self.exec),
            _ => None,
        }
    }
}

impl Object for QueryBridge {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        self.method(key.as_str()?).map(|f| Value::from_object(f.clone()))
    }

    fn enumerate(self: &Arc<Self>) -> Enumerator {
        Enumerator::Str(METHODS)
    }

    fn call_method(
        self: &Arc<Self>,
        _state: &State<'_, '_>,
        method: &str,
        args: &[Value],
    ) -> Result<Value, Error> {
        let func = self
            .method(method)
            .ok_or_else(|| Error::new(ErrorKind::UnknownMethod, format!("db has no method `{}`", method)))?;
        let mut values = func.invoke(args)?;
        Ok(values.pop().unwrap_or_default())
    }

    fn render(self: &Arc<Self>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<db>")
    }
}
