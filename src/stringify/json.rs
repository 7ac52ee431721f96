//! JSON backend

use super::{EmitState, Emitter, Format, StringifyOptions};
use crate::error::Result;
use crate::value::Value;

pub struct JsonEmitter {
    state: EmitState,
}

impl JsonEmitter {
    pub fn new(options: &StringifyOptions) -> Self {
        Self {
            state: EmitState::new(options),
        }
    }
}

/// JSON string literal with standard escaping
pub fn quote(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

impl Emitter for JsonEmitter {
    fn state(&mut self) -> &mut EmitState {
        &mut self.state
    }

    fn format(&self) -> Format {
        Format::Json
    }

    fn write_string(&mut self, s: &str) -> Result<()> {
        self.state.buf.write(&quote(s));
        Ok(())
    }

    fn write_key(&mut self, key: &str) -> Result<()> {
        self.state.buf.write(&quote(key));
        self.state.buf.write(":");
        self.state.buf.space();
        Ok(())
    }
}

pub fn render(value: &Value, options: &StringifyOptions) -> Result<String> {
    let mut emitter = JsonEmitter::new(options);
    emitter.write_value(value, 0)?;
    Ok(emitter.state.buf.into_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Array, Object};

    fn sample() -> Value {
        let mut obj = Object::new();
        obj.insert("10", "ten");
        obj.insert("2", Value::Array(Array::new(vec![Value::from(1i64), Value::from(2.5)])));
        obj.insert("b", Value::Null);
        obj.insert("a", true);
        Value::Object(obj)
    }

    #[test]
    fn test_pretty_output() {
        let text = render(&sample(), &StringifyOptions::default()).unwrap();
        let expected = "{\n  \"2\": [\n    1,\n    2.5\n  ],\n  \"10\": \"ten\",\n  \"a\": true,\n  \"b\": null\n}";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_compact_output() {
        let text = render(&sample(), &StringifyOptions::compact()).unwrap();
        assert_eq!(text, r#"{"2":[1,2.5],"10":"ten","a":true,"b":null}"#);
    }

    #[test]
    fn test_output_is_valid_json() {
        let text = render(&sample(), &StringifyOptions::default()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["10"], "ten");
    }

    #[test]
    fn test_escaping() {
        let text = render(&Value::from("a\"b\n"), &StringifyOptions::default()).unwrap();
        assert_eq!(text, r#""a\"b\n""#);
    }

    #[test]
    fn test_non_finite_number_fails_with_path() {
        let mut obj = Object::new();
        obj.insert("items", Value::Array(Array::new(vec![Value::from(1i64), Value::Number(f64::NAN)])));
        let err = render(&Value::Object(obj), &StringifyOptions::default()).unwrap_err();
        match err {
            crate::error::ForgeError::Stringify { path, .. } => assert_eq!(path, "$.items[1]"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_depth_cap() {
        let mut value = Value::from(1i64);
        for _ in 0..5 {
            value = Value::Array(Array::new(vec![value]));
        }
        let options = StringifyOptions {
            max_depth: 3,
            ..StringifyOptions::default()
        };
        assert!(render(&value, &options).is_err());
        assert!(render(&value, &StringifyOptions::default()).is_ok());
    }
}
