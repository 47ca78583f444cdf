//! Global template functions

use minijinja::value::Rest;
use minijinja::{Error, ErrorKind, Value};

/// `{{ fail("tls.secretName is required") }}`
pub fn fail(message: String) -> Result<Value, Error> {
    Err(Error::new(ErrorKind::InvalidOperation, message))
}

/// `{{ dict("app", release.name, "tier", "db") }}`
pub fn dict(args: Rest<Value>) -> Result<Value, Error> {
    if args.len() % 2 != 0 {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            "dict expects key/value pairs",
        ));
    }
    let mut map = serde_json::Map::new();
    for pair in args.chunks(2) {
        let key = pair[0]
            .as_str()
            .ok_or_else(|| Error::new(ErrorKind::InvalidOperation, "dict keys must be strings"))?;
        let value = serde_json::to_value(&pair[1])
            .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))?;
        map.insert(key.to_string(), value);
    }
    Ok(Value::from_serialize(serde_json::Value::Object(map)))
}

pub fn list(args: Rest<Value>) -> Value {
    Value::from(args.0)
}

/// `{{ get(values.nodeSelector, "zone", "a") }}`
pub fn get(obj: Value, key: String, default: Option<Value>) -> Value {
    match obj.get_attr(&key) {
        Ok(v) if !v.is_undefined() => v,
        _ => default.unwrap_or(Value::UNDEFINED),
    }
}

/// First argument that is neither undefined, none nor an empty string
pub fn coalesce(args: Rest<Value>) -> Value {
    args.0
        .into_iter()
        .find(|v| !v.is_undefined() && !v.is_none() && v.as_str() != Some(""))
        .unwrap_or(Value::UNDEFINED)
}

/// `{{ ternary("on", "off", values.enabled) }}`
pub fn ternary(when_true: Value, when_false: Value, condition: Value) -> Value {
    if condition.is_true() {
        when_true
    } else {
        when_false
    }
}

pub fn tostring(value: Value) -> String {
    match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    }
}

pub fn uuidv4() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// RFC 3339 timestamp of the render
pub fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Go-style `printf` supporting `%s`, `%d`, `%v`, `%q` and `%%`
pub fn printf(format: String, args: Rest<Value>) -> Result<String, Error> {
    let mut out = String::with_capacity(format.len());
    let mut args = args.0.into_iter();
    let mut chars = format.chars();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let verb = chars.next().ok_or_else(|| {
            Error::new(ErrorKind::InvalidOperation, "printf format ends with '%'")
        })?;
        if verb == '%' {
            out.push('%');
            continue;
        }
        let arg = args.next().ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidOperation,
                format!("printf: missing argument for %{verb}"),
            )
        })?;
        match verb {
            's' | 'v' | 'd' => out.push_str(&tostring(arg)),
            'q' => out.push_str(&format!("{:?}", tostring(arg))),
            other => {
                return Err(Error::new(
                    ErrorKind::InvalidOperation,
                    format!("printf: unsupported verb %{other}"),
                ));
            }
        }
    }
    Ok(out)
}
