use serde::de::DeserializeOwned;
use serde_json::Value;

use super::RpcError;
use crate::error::{Error, Result};

/// Arguments bound to a method's declared parameter names.
#[derive(Debug, Clone)]
pub struct Params {
    names: &'static [&'static str],
    values: Vec<Option<Value>>,
}

impl Params {
    /// Bind raw `params` by position (array) or by name (object).
    pub(crate) fn bind(
        names: &'static [&'static str],
        raw: Option<Value>,
    ) -> std::result::Result<Self, RpcError> {
        let mut values = vec![None; names.len()];
        match raw {
            None | Some(Value::Null) => {}
            Some(Value::Array(items)) => {
                if items.len() > names.len() {
                    return Err(RpcError::from(&Error::InvalidParams(format!(
                        "expected at most {} positional params, got {}",
                        names.len(),
                        items.len()
                    ))));
                }
                for (slot, item) in values.iter_mut().zip(items) {
                    *slot = Some(item);
                }
            }
            Some(Value::Object(map)) => {
                for (key, value) in map {
                    let Some(index) = names.iter().position(|n| *n == key) else {
                        return Err(RpcError::from(&Error::InvalidParams(format!(
                            "unexpected param '{}'",
                            key
                        ))));
                    };
                    values[index] = Some(value);
                }
            }
            Some(_) => return Err(RpcError::invalid_request()),
        }
        Ok(Self { names, values })
    }

    fn raw(&self, name: &str) -> Option<&Value> {
        let index = self.names.iter().position(|n| *n == name)?;
        self.values[index].as_ref().filter(|v| !v.is_null())
    }

    /// Optional argument; an explicit `null` counts as absent.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        match self.raw(name) {
            None => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| Error::InvalidParams(format!("param '{}': {}", name, e))),
        }
    }

    pub fn required<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        self.get(name)?
            .ok_or_else(|| Error::InvalidParams(format!("missing required param '{}'", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{INVALID_PARAMS, INVALID_REQUEST};
    use serde_json::json;

    const NAMES: &[&str] = &["psbt", "fingerprint", "path"];

    #[test]
    fn test_positional_binding() {
        let params = Params::bind(NAMES, Some(json!(["cHNidP8=", "AABBCCDD"]))).unwrap();
        assert_eq!(params.required::<String>("psbt").unwrap(), "cHNidP8=");
        assert_eq!(params.get::<String>("fingerprint").unwrap().as_deref(), Some("AABBCCDD"));
        assert_eq!(params.get::<String>("path").unwrap(), None);
    }

    #[test]
    fn test_named_binding() {
        let params = Params::bind(NAMES, Some(json!({"path": "/dev/x", "psbt": "x"}))).unwrap();
        assert_eq!(params.get::<String>("path").unwrap().as_deref(), Some("/dev/x"));
        assert_eq!(params.get::<String>("fingerprint").unwrap(), None);
    }

    #[test]
    fn test_null_is_absent() {
        let params = Params::bind(NAMES, Some(json!(["x", null, "/dev/x"]))).unwrap();
        assert_eq!(params.get::<String>("fingerprint").unwrap(), None);
        assert!(params.required::<String>("fingerprint").is_err());
    }

    #[test]
    fn test_too_many_positional() {
        let err = Params::bind(&["b64_psbt"], Some(json!(["a", "b"]))).unwrap_err();
        assert_eq!(err.code, INVALID_PARAMS);
    }

    #[test]
    fn test_unknown_name() {
        let err = Params::bind(NAMES, Some(json!({"device": "x"}))).unwrap_err();
        assert!(err.message.contains("device"));
    }

    #[test]
    fn test_scalar_params_invalid_request() {
        let err = Params::bind(NAMES, Some(json!("x"))).unwrap_err();
        assert_eq!(err.code, INVALID_REQUEST);
    }

    #[test]
    fn test_wrong_type() {
        let params = Params::bind(NAMES, Some(json!([42]))).unwrap();
        let err = params.required::<String>("psbt").unwrap_err();
        assert!(matches!(err, Error::InvalidParams(_)));
    }
}
