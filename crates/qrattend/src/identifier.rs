//! Student identifiers decoded from scan text.
//!
//! Cards carry either a JSON object (`{"codigo":"555","nombre":"Ana"}`) or a
//! printed line of the form `CODE NAME... DOCUMENT`. Both resolve to the same
//! [`Identifier`] triple.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field names accepted for the student code, in priority order.
const CODE_FIELDS: &[&str] = &["codigo", "id", "code"];

/// Field names accepted for the student name.
const NAME_FIELDS: &[&str] = &["nombre", "name"];

/// Field names accepted for the identity document number.
const DOCUMENT_FIELDS: &[&str] = &["documento", "document"];

/// A student identified by a scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    /// Student code. Non-empty for any non-blank scan.
    pub code: String,
    /// Full name, possibly empty.
    pub name: String,
    /// Identity document number, possibly empty.
    pub document: String,
}

impl Identifier {
    /// Create an identifier carrying only a code.
    #[must_use]
    pub fn from_code(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Self::default()
        }
    }

    /// Name to show the operator: the name if known, the code otherwise.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.code
        } else {
            &self.name
        }
    }
}

/// Parse raw scan text into an [`Identifier`].
///
/// JSON objects are read field by field; anything else goes through the
/// whitespace heuristic. This never fails: unrecognized text becomes the code.
///
/// # Examples
///
/// ```
/// use qrattend::identifier::parse;
///
/// let id = parse("202367506 Juan Camilo VELASQUEZ CORONADO 1006327468");
/// assert_eq!(id.code, "202367506");
/// assert_eq!(id.name, "Juan Camilo VELASQUEZ CORONADO");
/// assert_eq!(id.document, "1006327468");
/// ```
#[must_use]
pub fn parse(raw: &str) -> Identifier {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(fields)) => from_object(raw, &fields),
        _ => from_text(raw),
    }
}

fn from_object(raw: &str, fields: &Map<String, Value>) -> Identifier {
    Identifier {
        code: first_field(fields, CODE_FIELDS).unwrap_or_else(|| raw.to_string()),
        name: first_field(fields, NAME_FIELDS).unwrap_or_default(),
        document: first_field(fields, DOCUMENT_FIELDS).unwrap_or_default(),
    }
}

/// First non-blank string or number among `names`.
fn first_field(fields: &Map<String, Value>, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| match fields.get(*name)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn from_text(raw: &str) -> Identifier {
    let tokens: Vec<&str> = raw.split_whitespace().collect();
    match tokens.as_slice() {
        [code, interior @ .., document] if !interior.is_empty() => Identifier {
            code: (*code).to_string(),
            name: interior.join(" "),
            document: (*document).to_string(),
        },
        _ => Identifier::from_code(raw.trim()),
    }
}
