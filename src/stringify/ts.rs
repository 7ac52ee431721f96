//! TypeScript module backend
//!
//! Literals follow JavaScript object syntax. Enum-tagged objects are hoisted into
//! an `export enum` declaration plus an `<Name>Options` list, and the literal refers
//! to them by name.

use super::json::quote;
use super::{ordered_keys, EmitState, Emitter, Format, IndentBuffer, StringifyOptions};
use crate::error::{ForgeError, Result};
use crate::value::{format_number, Object, Tags, Value};

pub struct TsEmitter {
    state: EmitState,
    /// Hoisted enum declarations in first-seen order
    enums: Vec<(String, String)>,
}

impl TsEmitter {
    pub fn new(options: &StringifyOptions) -> Self {
        Self {
            state: EmitState::new(options),
            enums: Vec::new(),
        }
    }

    fn hoist_enum(&mut self, name: &str, object: &Object, tags: &Tags) -> Result<()> {
        let declaration = self.render_enum(name, object, tags)?;
        match self.enums.iter().find(|(n, _)| n == name) {
            Some((_, existing)) if *existing != declaration => {
                Err(self.state.error(format!("enum '{}' declared twice with different members", name)))
            }
            Some(_) => Ok(()),
            None => {
                self.enums.push((name.to_string(), declaration));
                Ok(())
            }
        }
    }

    fn render_enum(&self, name: &str, object: &Object, tags: &Tags) -> Result<String> {
        let options = &self.state.options;
        let keys = ordered_keys(object, tags);
        let mut members = Vec::with_capacity(keys.len());

        for key in keys {
            let member = object
                .get(key)
                .ok_or_else(|| self.state.error(format!("enum '{}' lost member '{}'", name, key)))?;
            let value = match member.unwrapped() {
                Value::Number(n) if n.is_finite() => format_number(*n, options.precision),
                Value::String(s) => quote(s),
                other => {
                    return Err(self.state.error(format!(
                        "enum '{}' member '{}' must be a number or string, got {}",
                        name,
                        key,
                        other.kind()
                    )))
                }
            };
            let label = match member {
                Value::Cell(cell) => cell.tags.comment.clone(),
                _ => None,
            }
            .unwrap_or_else(|| key.clone());
            members.push((key.as_str(), value, label));
        }

        let mut buf = IndentBuffer::new(options.indent);
        buf.write(&format!("export enum {}", name));
        buf.space();
        buf.write("{");
        buf.indent();
        for (i, (key, value, _)) in members.iter().enumerate() {
            if i > 0 {
                buf.write(",");
            }
            buf.newline();
            buf.write(&member_name(key));
            buf.space();
            buf.write("=");
            buf.space();
            buf.write(value);
        }
        buf.dedent();
        buf.newline();
        buf.write("}");
        buf.write("\n");

        buf.write(&format!("export const {}Options", name));
        buf.space();
        buf.write("=");
        buf.space();
        buf.write("[");
        buf.indent();
        for (i, (key, _, label)) in members.iter().enumerate() {
            if i > 0 {
                buf.write(",");
            }
            buf.newline();
            buf.write("{");
            buf.space();
            buf.write("label:");
            buf.space();
            buf.write(&quote(label));
            buf.write(",");
            buf.space();
            buf.write("value:");
            buf.space();
            buf.write(&member_access(name, key));
            buf.space();
            buf.write("}");
        }
        buf.dedent();
        buf.newline();
        buf.write("]");
        if options.ts.immutable {
            buf.write(" as const");
        }
        buf.write(";");
        Ok(buf.into_string())
    }
}

fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn is_index(key: &str) -> bool {
    !key.is_empty() && key.bytes().all(|b| b.is_ascii_digit()) && (key == "0" || !key.starts_with('0'))
}

fn member_name(key: &str) -> String {
    if is_identifier(key) {
        key.to_string()
    } else {
        quote(key)
    }
}

fn member_access(owner: &str, key: &str) -> String {
    if is_identifier(key) {
        format!("{}.{}", owner, key)
    } else {
        format!("{}[{}]", owner, quote(key))
    }
}

/// Identifier derived from an arbitrary name (`item list` → `item_list`)
pub fn identifier(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '$' { c } else { '_' })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

impl Emitter for TsEmitter {
    fn state(&mut self) -> &mut EmitState {
        &mut self.state
    }

    fn format(&self) -> Format {
        Format::Ts
    }

    fn write_string(&mut self, s: &str) -> Result<()> {
        self.state.buf.write(&quote(s));
        Ok(())
    }

    fn write_key(&mut self, key: &str) -> Result<()> {
        let key_text = if is_identifier(key) || is_index(key) {
            key.to_string()
        } else {
            quote(key)
        };
        self.state.buf.write(&key_text);
        self.state.buf.write(":");
        self.state.buf.space();
        Ok(())
    }

    fn write_object(&mut self, object: &Object, tags: &Tags, depth: usize) -> Result<()> {
        match &tags.enum_name {
            Some(name) => {
                self.check_depth(depth)?;
                let name = identifier(name);
                self.hoist_enum(&name, object, tags)?;
                self.state.buf.write(&name);
                Ok(())
            }
            None => write_plain_object(self, object, tags, depth),
        }
    }
}

/// The shared object walk, reachable from the overriding `write_object`
fn write_plain_object(emitter: &mut TsEmitter, object: &Object, tags: &Tags, depth: usize) -> Result<()> {
    struct Plain<'a>(&'a mut TsEmitter);

    impl Emitter for Plain<'_> {
        fn state(&mut self) -> &mut EmitState {
            &mut self.0.state
        }

        fn format(&self) -> Format {
            Format::Ts
        }

        fn write_string(&mut self, s: &str) -> Result<()> {
            self.0.write_string(s)
        }

        fn write_key(&mut self, key: &str) -> Result<()> {
            self.0.write_key(key)
        }

        fn write_value(&mut self, value: &Value, depth: usize) -> Result<()> {
            self.0.write_value(value, depth)
        }
    }

    Plain(emitter).write_object(object, tags, depth)
}

/// Render a TypeScript module: preamble, hoisted enums, then the value
pub fn render(value: &Value, options: &StringifyOptions) -> Result<String> {
    let mut emitter = TsEmitter::new(options);
    emitter.write_value(value, 0)?;
    let TsEmitter { state, enums } = emitter;
    let body = state.buf.into_string();

    let mut parts: Vec<String> = Vec::new();
    if let Some(preamble) = &options.ts.preamble {
        parts.push(preamble.trim_end().to_string());
    }
    parts.extend(enums.into_iter().map(|(_, declaration)| declaration));

    let suffix = if options.ts.immutable { " as const" } else { "" };
    match &options.ts.export_name {
        Some(name) => {
            let assign = if options.indent == 0 { "=" } else { " = " };
            parts.push(format!("export const {}{}{}{};", identifier(name), assign, body, suffix));
        }
        None => parts.push(format!("{}{}", body, suffix)),
    }
    Ok(parts.join("\n"))
}

// =============================================================================
// Interfaces
// =============================================================================

/// Render `typedef` payloads: `{ Interface: [{ name, type, comment? }, ...] }`
pub fn render_interfaces(payload: &Value, options: &StringifyOptions) -> Result<String> {
    let object = payload.unwrapped().as_object().ok_or_else(|| ForgeError::Stringify {
        path: "$".to_string(),
        message: format!("typedef payload must be an object, got {}", payload.kind()),
    })?;

    let mut parts: Vec<String> = Vec::new();
    if let Some(preamble) = &options.ts.preamble {
        parts.push(preamble.trim_end().to_string());
    }

    for name in ordered_keys(object, &object.tags) {
        let fields = object
            .get(name)
            .and_then(|v| v.unwrapped().as_array())
            .ok_or_else(|| ForgeError::Stringify {
                path: format!("$.{}", name),
                message: "interface fields must be an array".to_string(),
            })?;

        let mut buf = IndentBuffer::new(options.indent.max(1));
        buf.write(&format!("export interface {} {{", identifier(name)));
        buf.indent();
        for (i, field) in fields.items.iter().enumerate() {
            let field = field.unwrapped().as_object().ok_or_else(|| ForgeError::Stringify {
                path: format!("$.{}[{}]", name, i),
                message: "interface field must be an object".to_string(),
            })?;
            let text = |key: &str| field.get(key).and_then(|v| v.unwrapped().as_str()).map(str::to_string);
            let (Some(field_name), Some(ty)) = (text("name"), text("type")) else {
                return Err(ForgeError::Stringify {
                    path: format!("$.{}[{}]", name, i),
                    message: "interface field needs 'name' and 'type'".to_string(),
                });
            };
            if let Some(comment) = text("comment").filter(|c| !c.trim().is_empty()) {
                buf.newline();
                buf.write(&format!("/** {} */", comment.trim().replace("*/", "* /")));
            }
            buf.newline();
            buf.write(&format!("{}: {};", member_name(&field_name), ty));
        }
        buf.dedent();
        buf.newline();
        buf.write("}");
        parts.push(buf.into_string());
    }

    Ok(parts.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Location;
    use crate::value::{Array, Cell};

    fn enum_value() -> Value {
        let mut members = Object::new().with_tags(Tags::enumeration("Quality"));
        members.insert("Rare", 2i64);
        members.insert("Common", 1i64);
        let mut root = Object::new();
        root.insert("quality", Value::Object(members));
        Value::Object(root)
    }

    #[test]
    fn test_enum_hoisted_with_options_in_order() {
        let options = StringifyOptions::default().with_export_name("define");
        let text = render(&enum_value(), &options).unwrap();
        let expected = "export enum Quality {\n  Common = 1,\n  Rare = 2\n}\n\
export const QualityOptions = [\n  { label: \"Common\", value: Quality.Common },\n  { label: \"Rare\", value: Quality.Rare }\n] as const;\n\
export const define = {\n  quality: Quality\n} as const;";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_enum_label_from_comment() {
        let mut members = Object::new().with_tags(Tags::enumeration("Kind"));
        let mut cell = Cell::raw("1", Location::file("kind.xlsx")).with_value(Value::from(1i64));
        cell.tags = Tags::commented("Weapon");
        members.insert("Sword", cell);
        let text = render(&Value::Object(members), &StringifyOptions::compact()).unwrap();
        assert!(text.contains(r#"{label:"Weapon",value:Kind.Sword}"#), "{}", text);
        assert!(text.ends_with("Kind as const"));
    }

    #[test]
    fn test_keys_and_preamble() {
        let mut obj = Object::new();
        obj.insert("10", 1i64);
        obj.insert("07", 2i64);
        obj.insert("with-dash", 3i64);
        let mut options = StringifyOptions::compact();
        options.ts.preamble = Some("// generated".to_string());
        options.ts.immutable = false;
        let text = render(&Value::Object(obj), &options).unwrap();
        assert_eq!(text, "// generated\n{\"07\":2,10:1,\"with-dash\":3}");
    }

    #[test]
    fn test_non_scalar_enum_member_rejected() {
        let mut members = Object::new().with_tags(Tags::enumeration("Bad"));
        members.insert("A", Value::Array(Array::new(Vec::new())));
        assert!(render(&Value::Object(members), &StringifyOptions::default()).is_err());
    }

    #[test]
    fn test_interfaces() {
        let mut id = Object::new();
        id.insert("name", "id");
        id.insert("type", "number");
        id.insert("comment", "Unique id");
        let mut tags = Object::new();
        tags.insert("name", "tags");
        tags.insert("type", "string[] | null");
        let mut payload = Object::new();
        payload.insert(
            "Item",
            Value::Array(Array::new(vec![Value::Object(id), Value::Object(tags)])),
        );
        let text = render_interfaces(&Value::Object(payload), &StringifyOptions::default()).unwrap();
        assert_eq!(
            text,
            "export interface Item {\n  /** Unique id */\n  id: number;\n  tags: string[] | null;\n}"
        );
    }
}
