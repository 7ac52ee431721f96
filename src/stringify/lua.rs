//! Lua table literal backend

use super::{EmitState, Emitter, Format, StringifyOptions};
use crate::error::Result;
use crate::value::{number_key, parse_number, Value};

const KEYWORDS: &[&str] = &[
    "and", "break", "do", "else", "elseif", "end", "false", "for", "function", "goto", "if", "in",
    "local", "nil", "not", "or", "repeat", "return", "then", "true", "until", "while",
];

pub struct LuaEmitter {
    state: EmitState,
}

impl LuaEmitter {
    pub fn new(options: &StringifyOptions) -> Self {
        Self {
            state: EmitState::new(options),
        }
    }
}

/// Lua string literal
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => out.push_str(&format!("\\{:03}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_') && !KEYWORDS.contains(&key)
}

impl Emitter for LuaEmitter {
    fn state(&mut self) -> &mut EmitState {
        &mut self.state
    }

    fn format(&self) -> Format {
        Format::Lua
    }

    fn array_delimiters(&self) -> (&'static str, &'static str) {
        ("{", "}")
    }

    fn write_null(&mut self) -> Result<()> {
        self.state.buf.write("nil");
        Ok(())
    }

    fn write_string(&mut self, s: &str) -> Result<()> {
        self.state.buf.write(&quote(s));
        Ok(())
    }

    fn write_key(&mut self, key: &str) -> Result<()> {
        // Only the canonical spelling of a number becomes a numeric index, so
        // "07" and "7" stay distinct keys
        let key_text = match parse_number(key) {
            Some(n) if number_key(n) == key => format!("[{}]", key),
            _ if is_identifier(key) => key.to_string(),
            _ => format!("[{}]", quote(key)),
        };
        self.state.buf.write(&key_text);
        self.state.buf.space();
        self.state.buf.write("=");
        self.state.buf.space();
        Ok(())
    }
}

pub fn render(value: &Value, options: &StringifyOptions) -> Result<String> {
    let mut emitter = LuaEmitter::new(options);
    emitter.write_value(value, 0)?;
    Ok(emitter.state.buf.into_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Array, Object};

    #[test]
    fn test_key_forms() {
        let mut obj = Object::new();
        obj.insert("2", 1i64);
        obj.insert("name", "sword");
        obj.insert("end", true);
        obj.insert("with space", Value::Null);
        let text = render(&Value::Object(obj), &StringifyOptions::compact()).unwrap();
        assert_eq!(text, r#"{[2]=1,["end"]=true,name="sword",["with space"]=nil}"#);
    }

    #[test]
    fn test_non_canonical_numeric_keys_stay_strings() {
        let mut obj = Object::new();
        obj.insert("07", 1i64);
        obj.insert("7", 2i64);
        obj.insert("1.50", 3i64);
        obj.insert("1.5", 4i64);
        let text = render(&Value::Object(obj), &StringifyOptions::compact()).unwrap();
        assert!(text.contains(r#"["07"]=1"#), "{}", text);
        assert!(text.contains("[7]=2"), "{}", text);
        assert!(text.contains(r#"["1.50"]=3"#), "{}", text);
        assert!(text.contains("[1.5]=4"), "{}", text);
    }

    #[test]
    fn test_pretty_nested() {
        let mut obj = Object::new();
        obj.insert("ids", Value::Array(Array::new(vec![Value::from(1i64), Value::from(2i64)])));
        let text = render(&Value::Object(obj), &StringifyOptions::default()).unwrap();
        assert_eq!(text, "{\n  ids = {\n    1,\n    2\n  }\n}");
    }

    #[test]
    fn test_string_escaping() {
        assert_eq!(quote("a\"b\\c\n"), r#""a\"b\\c\n""#);
        assert_eq!(quote("\u{1}"), "\"\\001\"");
    }
}
