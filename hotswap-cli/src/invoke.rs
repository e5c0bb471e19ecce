//! Calling exported functions from the command line
//!
//! Only homogeneous scalar signatures are supported: every parameter and the
//! return value share one of `i32`, `i64` or `f64`, with up to two parameters.

use anyhow::{bail, Context, Result};
use hotswap_runtime::{BoundSymbol, Signature};
use std::fmt::Display;
use std::str::FromStr;

/// Scalar type of a supported signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scalar {
    I32,
    I64,
    F64,
}

impl FromStr for Scalar {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "i32" => Ok(Scalar::I32),
            "i64" => Ok(Scalar::I64),
            "f64" => Ok(Scalar::F64),
            other => bail!("unsupported type '{other}' (expected i32, i64 or f64)"),
        }
    }
}

/// A signature the CLI knows how to call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CallShape {
    pub(crate) scalar: Scalar,
    pub(crate) arity: usize,
}

impl CallShape {
    /// Parse a tag such as `fn(i32, i32) -> i32` or `extern "C" fn() -> f64`
    pub(crate) fn parse(signature: &Signature) -> Result<Self> {
        let tag = signature.as_str();
        let compact = signature.normalized();
        let compact = compact.strip_prefix("extern\"C\"").unwrap_or(&compact);

        let rest = compact
            .strip_prefix("fn(")
            .with_context(|| format!("signature '{tag}' must start with fn("))?;
        let (params, ret) = rest
            .split_once(")->")
            .with_context(|| format!("signature '{tag}' must return a value"))?;

        let scalar: Scalar = ret.parse()?;
        let params: Vec<&str> = if params.is_empty() {
            Vec::new()
        } else {
            params.split(',').collect()
        };

        if params.len() > 2 {
            bail!("signature '{tag}' has more than two parameters");
        }
        for param in &params {
            if param.parse::<Scalar>()? != scalar {
                bail!("signature '{tag}' mixes parameter and return types");
            }
        }

        Ok(Self {
            scalar,
            arity: params.len(),
        })
    }
}

/// Call `bound` with textual `args`, returning the result as text
///
/// # Safety
///
/// The symbol's declared signature must match the exported function.
pub(crate) unsafe fn invoke(bound: &BoundSymbol, args: &[String]) -> Result<String> {
    let signature = bound
        .signature()
        .with_context(|| format!("symbol '{}' has no declared signature", bound.name()))?;
    let shape = CallShape::parse(signature)?;

    if args.len() != shape.arity {
        bail!(
            "'{}' takes {} argument(s), got {}",
            bound.name(),
            shape.arity,
            args.len()
        );
    }

    // SAFETY: forwarded to the caller.
    unsafe {
        match shape.scalar {
            Scalar::I32 => call::<i32>(bound, args),
            Scalar::I64 => call::<i64>(bound, args),
            Scalar::F64 => call::<f64>(bound, args),
        }
    }
}

unsafe fn call<T>(bound: &BoundSymbol, args: &[String]) -> Result<String>
where
    T: Copy + Display + FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let values = args
        .iter()
        .map(|arg| {
            arg.parse::<T>()
                .with_context(|| format!("invalid argument '{arg}'"))
        })
        .collect::<Result<Vec<T>>>()?;

    // SAFETY: the caller vouches for the declared signature.
    let result = unsafe {
        match values.as_slice() {
            [] => (*bound.get::<extern "C" fn() -> T>()?)(),
            [a] => (*bound.get::<extern "C" fn(T) -> T>()?)(*a),
            [a, b] => (*bound.get::<extern "C" fn(T, T) -> T>()?)(*a, *b),
            _ => bail!("too many arguments"),
        }
    };

    Ok(result.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotswap_runtime::testing::FakeBackend;
    use hotswap_runtime::{ModuleDescriptor, ReloadCoordinator, RuntimeConfig};
    use std::sync::Arc;

    #[test]
    fn test_parse_shapes() {
        assert_eq!(
            CallShape::parse(&Signature::from("fn(i32, i32) -> i32")).unwrap(),
            CallShape {
                scalar: Scalar::I32,
                arity: 2
            }
        );
        assert_eq!(
            CallShape::parse(&Signature::from("extern \"C\" fn() -> f64")).unwrap(),
            CallShape {
                scalar: Scalar::F64,
                arity: 0
            }
        );
        assert_eq!(CallShape::parse(&Signature::from("fn(i64)->i64")).unwrap().arity, 1);
    }

    #[test]
    fn test_parse_rejects_unsupported() {
        assert!(CallShape::parse(&Signature::from("fn(i32)")).is_err());
        assert!(CallShape::parse(&Signature::from("fn(i32, f64) -> i32")).is_err());
        assert!(CallShape::parse(&Signature::from("fn(u8) -> u8")).is_err());
        assert!(CallShape::parse(&Signature::from("fn(i32, i32, i32) -> i32")).is_err());
        assert!(CallShape::parse(&Signature::from("add")).is_err());
    }

    #[test]
    fn test_invoke_through_coordinator() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("libmath.so");
        std::fs::write(&source, b"fake").unwrap();

        let config = RuntimeConfig {
            staging_dir: Some(dir.path().join("staging")),
            ..RuntimeConfig::default()
        };
        let coordinator =
            ReloadCoordinator::with_backend(config, Arc::new(FakeBackend::math()));
        coordinator
            .register_or_refresh(
                ModuleDescriptor::new("math", &source)
                    .with_symbol("add", "fn(i32, i32) -> i32")
                    .with_symbol("test_function", "fn() -> i32"),
            )
            .unwrap();

        let add = coordinator.resolve("math", "add").unwrap();
        let args = vec!["2".to_string(), "3".to_string()];
        assert_eq!(unsafe { invoke(&add, &args) }.unwrap(), "5");
        assert!(unsafe { invoke(&add, &args[..1]) }.is_err());

        let constant = coordinator.resolve("math", "test_function").unwrap();
        assert_eq!(unsafe { invoke(&constant, &[]) }.unwrap(), "42");

        let bad = vec!["two".to_string(), "3".to_string()];
        assert!(unsafe { invoke(&add, &bad) }.is_err());
    }
}
