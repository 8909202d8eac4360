use thiserror::Error;

use crate::value::Value;

use super::{Field, Signature, TypeSpec};

/// A value that does not have the declared shape. `path` names the offending
/// field (`order.items[2].id`); an empty path is the value itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("type mismatch at {}: expected {expected}, found {found}", path_label(.path))]
pub struct TypeMismatch {
    pub path: String,
    pub expected: String,
    pub found: String,
}

fn path_label(path: &str) -> &str {
    if path.is_empty() {
        "top level"
    } else {
        path
    }
}

fn join(path: &str, field: &str) -> String {
    if path.is_empty() {
        field.to_string()
    } else {
        format!("{}.{}", path, field)
    }
}

fn mismatch(path: &str, expected: &TypeSpec, found: &Value) -> TypeMismatch {
    TypeMismatch {
        path: path.to_string(),
        expected: expected.to_string(),
        found: found.type_name().to_string(),
    }
}

fn check_fields(fields: &[Field], value: &Value, path: &str) -> Result<(), TypeMismatch> {
    for field in fields {
        let field_path = join(path, &field.name);
        match value.get(&field.name) {
            None | Some(Value::Nil) if field.spec.is_optional() => {}
            None => {
                return Err(TypeMismatch {
                    path: field_path,
                    expected: field.spec.to_string(),
                    found: "missing".to_string(),
                })
            }
            Some(item) => check(&field.spec, item, &field_path)?,
        }
    }
    Ok(())
}

pub fn check(spec: &TypeSpec, value: &Value, path: &str) -> Result<(), TypeMismatch> {
    match (spec, value) {
        (TypeSpec::Any, _) => Ok(()),
        (TypeSpec::Optional(_), Value::Nil) => Ok(()),
        (TypeSpec::Optional(inner), _) => check(inner, value, path),
        (TypeSpec::String, Value::String(_))
        | (TypeSpec::Int, Value::Int(_))
        | (TypeSpec::Float, Value::Float(_) | Value::Int(_))
        | (TypeSpec::Bool, Value::Bool(_))
        | (TypeSpec::Keyword, Value::Keyword(_))
        | (TypeSpec::Map(None), Value::Map(_)) => Ok(()),
        (TypeSpec::Map(Some(fields)), Value::Map(_)) => check_fields(fields, value, path),
        (TypeSpec::List(inner), Value::List(items)) => {
            for (i, item) in items.iter().enumerate() {
                check(inner, item, &format!("{}[{}]", path, i))?;
            }
            Ok(())
        }
        _ => Err(mismatch(path, spec, value)),
    }
}

impl Signature {
    /// Validates a tool's argument map against the parameter list. Keys not
    /// named by the signature pass through.
    pub fn validate_input(&self, args: &Value) -> Result<(), TypeMismatch> {
        if !matches!(args, Value::Map(_)) {
            return Err(TypeMismatch {
                path: String::new(),
                expected: "argument map".to_string(),
                found: args.type_name().to_string(),
            });
        }
        check_fields(&self.params, args, "")
    }

    pub fn validate_output(&self, value: &Value) -> Result<(), TypeMismatch> {
        check(&self.output, value, "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::parse_signature;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_optional_param_may_be_omitted() {
        let signature = parse_signature("(x :int, y :string?) -> {status :keyword}").unwrap();
        assert!(signature
            .validate_input(&Value::map([("x", Value::Int(5))]))
            .is_ok());

        let error = signature
            .validate_input(&Value::map([("x", Value::string("5"))]))
            .unwrap_err();
        assert_eq!(error.path, "x");
        assert_eq!(error.expected, ":int");
        assert_eq!(error.found, "string");
    }

    #[test]
    fn test_missing_required_field() {
        let signature = parse_signature("(x :int) -> :any").unwrap();
        let error = signature
            .validate_input(&Value::Map(Default::default()))
            .unwrap_err();
        assert_eq!(error.path, "x");
        assert_eq!(error.found, "missing");
    }

    #[test]
    fn test_nested_output_path() {
        let signature = parse_signature("-> {orders [{id :int}]}").unwrap();
        let value = Value::map([(
            "orders",
            Value::List(vec![
                Value::map([("id", Value::Int(1))]),
                Value::map([("id", Value::keyword("two"))]),
            ]),
        )]);
        let error = signature.validate_output(&value).unwrap_err();
        assert_eq!(error.path, "orders[1].id");
        assert_eq!(
            error.to_string(),
            "type mismatch at orders[1].id: expected :int, found keyword"
        );
    }

    #[test]
    fn test_int_widens_to_float() {
        let signature = parse_signature(":float").unwrap();
        assert!(signature.validate_output(&Value::Int(3)).is_ok());
        assert!(signature.validate_output(&Value::string("3")).is_err());
    }
}
