//! Request validation against a command's declared argument schema.
//!
//! Pure function of `(CommandSpec, request args)`: no I/O, no async.

use serde_json::{Map, Value};

use crate::catalog::CommandSpec;
use crate::error::{Expected, ValidationError};
use crate::types::ArgValue;

/// Validate `supplied` against `spec` and return the accepted values in
/// declaration order.
///
/// `null` values count as absent. Omitted optional arguments leave no
/// placeholder. Undeclared keys are ignored.
///
/// # Errors
///
/// Returns the first violation found, walking the schema in declaration
/// order.
pub fn validate(
    spec: &CommandSpec,
    supplied: Option<&Map<String, Value>>,
) -> Result<Vec<ArgValue>, ValidationError> {
    let mut accepted = Vec::with_capacity(spec.args.len());

    for (index, arg) in spec.args.iter().enumerate() {
        if arg.name.is_empty() {
            return Err(ValidationError::UnnamedArgument { index });
        }

        let raw = supplied
            .and_then(|args| args.get(&arg.name))
            .filter(|v| !v.is_null());

        let Some(raw) = raw else {
            if arg.required {
                return Err(ValidationError::MissingArgument(arg.name.clone()));
            }
            continue;
        };

        let value = ArgValue::from_json(raw).map_err(|actual| ValidationError::TypeMismatch {
            arg: arg.name.clone(),
            expected: arg.arg_type.map_or(Expected::Primitive, Expected::Type),
            actual,
        })?;

        if let Some(expected) = arg.arg_type
            && value.arg_type() != expected
        {
            return Err(ValidationError::TypeMismatch {
                arg: arg.name.clone(),
                expected: Expected::Type(expected),
                actual: value.arg_type().as_str(),
            });
        }

        if let (Some(pattern), ArgValue::String(text)) = (&arg.pattern, &value)
            && !pattern.is_match(text)
        {
            return Err(ValidationError::PatternMismatch(arg.name.clone()));
        }

        accepted.push(value);
    }

    Ok(accepted)
}
